use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::records::types::{AuditEntry, DocumentVersion, Period, Transaction};

/// Declaration order is the tie-break order between anomalies sharing a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAnomalyKind {
    MissingEntry,
    UnusualAccess,
    UnauthorizedChange,
}

impl AuditAnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingEntry => "missing_entry",
            Self::UnusualAccess => "unusual_access",
            Self::UnauthorizedChange => "unauthorized_change",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditAnomaly {
    pub kind: AuditAnomalyKind,
    /// Transaction id, actor id, or `document@version` depending on the kind.
    pub reference: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Everything the checker looks at for one period.
///
/// `entries` spans history and the period: entries before `period.start`
/// form the access baselines, in-period entries are the ones checked.
#[derive(Debug, Clone, Copy)]
pub struct AuditInput<'a> {
    pub period: Period,
    pub transactions: &'a [Transaction],
    pub entries: &'a [AuditEntry],
    pub document_versions: &'a [DocumentVersion],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditReport {
    /// Ordered by timestamp, then kind, then reference.
    pub anomalies: Vec<AuditAnomaly>,
    pub risk_level: RiskLevel,
    /// Actors whose access pattern could not be checked for lack of history.
    pub skipped_actors: Vec<String>,
}

impl AuditReport {
    pub fn count(&self, kind: AuditAnomalyKind) -> usize {
        self.anomalies.iter().filter(|a| a.kind == kind).count()
    }
}
