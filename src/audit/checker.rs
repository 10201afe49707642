use chrono::Timelike;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::anomaly::baseline::common_hours;
use crate::config::{AccessBaselinePolicy, AuditConfig};
use crate::records::types::{AuditEntry, DocumentVersion, Period, Transaction};

use super::types::{AuditAnomaly, AuditAnomalyKind, AuditInput, AuditReport, RiskLevel};

/// High on any unauthorized change, Medium on any missing entry, else Low.
pub fn risk_level(anomalies: &[AuditAnomaly]) -> RiskLevel {
    if anomalies.iter().any(|a| a.kind == AuditAnomalyKind::UnauthorizedChange) {
        RiskLevel::High
    } else if anomalies.iter().any(|a| a.kind == AuditAnomalyKind::MissingEntry) {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Flag in-period transactions that no audit entry references.
///
/// An entry naming an account covers that account's transaction only. An
/// entry without one covers the id when a single account uses it; an id
/// shared by several accounts stays uncovered.
pub fn check_missing_entries(
    period: &Period,
    transactions: &[Transaction],
    entries: &[AuditEntry],
) -> Vec<AuditAnomaly> {
    let mut scoped: HashSet<(&str, &str)> = HashSet::new();
    let mut unscoped: HashSet<&str> = HashSet::new();
    for entry in entries {
        let Some(tx_id) = entry.transaction_id.as_deref() else {
            continue;
        };
        match entry.account_id.as_deref() {
            Some(account) => {
                scoped.insert((account, tx_id));
            }
            None => {
                unscoped.insert(tx_id);
            }
        }
    }

    let mut owners: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for tx in transactions {
        owners.entry(tx.id.as_str()).or_default().insert(tx.account_id.as_str());
    }
    let shared = |id: &str| owners.get(id).is_some_and(|accounts| accounts.len() > 1);

    transactions
        .iter()
        .filter(|tx| period.contains(&tx.timestamp))
        .filter_map(|tx| {
            let id = tx.id.as_str();
            if scoped.contains(&(tx.account_id.as_str(), id)) {
                return None;
            }
            let description = match (unscoped.contains(id), shared(id)) {
                (true, false) => return None,
                (true, true) => format!(
                    "transaction {} on account {} is only covered by entries without an \
                     account, and the id is used by several accounts",
                    tx.id, tx.account_id
                ),
                (false, _) => format!(
                    "transaction {} on account {} has no audit entry",
                    tx.id, tx.account_id
                ),
            };
            Some(AuditAnomaly {
                kind: AuditAnomalyKind::MissingEntry,
                reference: tx.id.clone(),
                description,
                timestamp: tx.timestamp,
            })
        })
        .collect()
}

/// Compare each actor's in-period activity against the hours they usually work.
///
/// Returns the anomalies and the actors that had to be skipped.
pub fn check_unusual_access(
    period: &Period,
    entries: &[AuditEntry],
    config: &AuditConfig,
) -> (Vec<AuditAnomaly>, Vec<String>) {
    let mut history: BTreeMap<&str, Vec<&AuditEntry>> = BTreeMap::new();
    let mut current: BTreeMap<&str, Vec<&AuditEntry>> = BTreeMap::new();
    for entry in entries {
        if period.is_before(&entry.timestamp) {
            history.entry(entry.actor_id.as_str()).or_default().push(entry);
        } else if period.contains(&entry.timestamp) {
            current.entry(entry.actor_id.as_str()).or_default().push(entry);
        }
    }

    let pooled = match config.access_baseline {
        AccessBaselinePolicy::Pooled => {
            let all: Vec<&AuditEntry> = history.values().flatten().copied().collect();
            (all.len() >= config.min_history_entries)
                .then(|| common_hours(all.iter().map(|e| &e.timestamp)))
        }
        AccessBaselinePolicy::Skip => None,
    };

    let mut anomalies = Vec::new();
    let mut skipped = Vec::new();
    for (actor, in_period) in &current {
        let own = history.get(actor).filter(|h| h.len() >= config.min_history_entries);
        let hours: BTreeSet<u32> = match (own, &pooled) {
            (Some(own), _) => common_hours(own.iter().map(|e| &e.timestamp)),
            (None, Some(pooled)) => pooled.clone(),
            (None, None) => {
                tracing::debug!(actor = %actor, "Not enough access history, skipping actor");
                skipped.push(actor.to_string());
                continue;
            }
        };

        for entry in in_period {
            let hour = entry.timestamp.hour();
            if !hours.contains(&hour) {
                anomalies.push(AuditAnomaly {
                    kind: AuditAnomalyKind::UnusualAccess,
                    reference: actor.to_string(),
                    description: format!(
                        "{} performed '{}' at {:02}:00, outside usual hours {:?}",
                        actor, entry.action, hour, hours
                    ),
                    timestamp: entry.timestamp,
                });
            }
        }
    }

    (anomalies, skipped)
}

fn authorizes(
    entry: &AuditEntry,
    change: &DocumentVersion,
    config: &AuditConfig,
) -> bool {
    entry.document_ref.as_deref() == Some(change.document_ref.as_str())
        && entry.version.as_deref() == Some(change.version.as_str())
        && entry.timestamp <= change.observed_at
        && config
            .authorizing_actions
            .iter()
            .any(|a| a.eq_ignore_ascii_case(&entry.action))
}

/// Every in-period version change of a document needs an authorizing entry
/// for the new version, recorded no later than the change was observed.
pub fn check_unauthorized_changes(
    period: &Period,
    versions: &[DocumentVersion],
    entries: &[AuditEntry],
    config: &AuditConfig,
) -> Vec<AuditAnomaly> {
    let mut by_document: BTreeMap<&str, Vec<&DocumentVersion>> = BTreeMap::new();
    for version in versions {
        by_document.entry(version.document_ref.as_str()).or_default().push(version);
    }

    let mut anomalies = Vec::new();
    for (document, mut observed) in by_document {
        observed.sort_by(|a, b| (a.observed_at, &a.version).cmp(&(b.observed_at, &b.version)));

        for pair in observed.windows(2) {
            let (before, after) = (pair[0], pair[1]);
            if before.version == after.version || !period.contains(&after.observed_at) {
                continue;
            }
            if entries.iter().any(|e| authorizes(e, after, config)) {
                continue;
            }

            tracing::warn!(
                document = %document,
                from = %before.version,
                to = %after.version,
                "ANOMALY DETECTED: unauthorized document change"
            );
            anomalies.push(AuditAnomaly {
                kind: AuditAnomalyKind::UnauthorizedChange,
                reference: format!("{}@{}", document, after.version),
                description: format!(
                    "{} changed from version {} to {} with no authorizing audit entry",
                    document, before.version, after.version
                ),
                timestamp: after.observed_at,
            });
        }
    }
    anomalies
}

pub fn check_audit_trail(input: &AuditInput<'_>, config: &AuditConfig) -> AuditReport {
    let mut anomalies = check_missing_entries(&input.period, input.transactions, input.entries);

    let (access, skipped_actors) = check_unusual_access(&input.period, input.entries, config);
    anomalies.extend(access);
    anomalies.extend(check_unauthorized_changes(
        &input.period,
        input.document_versions,
        input.entries,
        config,
    ));

    anomalies.sort_by(|a, b| {
        (a.timestamp, a.kind, &a.reference).cmp(&(b.timestamp, b.kind, &b.reference))
    });

    let risk_level = risk_level(&anomalies);
    tracing::debug!(
        anomalies = anomalies.len(),
        skipped_actors = skipped_actors.len(),
        risk = ?risk_level,
        "Audit trail checked"
    );

    AuditReport {
        anomalies,
        risk_level,
        skipped_actors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};

    fn period() -> Period {
        Period {
            start: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
        }
    }

    fn at(day: u32, month: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, month, day, hour, 0, 0).unwrap()
    }

    fn tx(id: &str, ts: DateTime<Utc>) -> Transaction {
        Transaction {
            id: id.to_string(),
            account_id: "acc-1".to_string(),
            timestamp: ts,
            amount: BigDecimal::from(10),
            description: "coffee".to_string(),
            merchant: "coffee".to_string(),
            category: "food".to_string(),
        }
    }

    fn entry(actor: &str, tx_id: &str, action: &str, ts: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            transaction_id: Some(tx_id.to_string()),
            account_id: None,
            document_ref: None,
            version: None,
            actor_id: actor.to_string(),
            action: action.to_string(),
            timestamp: ts,
        }
    }

    fn doc_entry(
        actor: &str,
        doc: &str,
        version: &str,
        action: &str,
        ts: DateTime<Utc>,
    ) -> AuditEntry {
        AuditEntry {
            transaction_id: None,
            account_id: None,
            document_ref: Some(doc.to_string()),
            version: Some(version.to_string()),
            actor_id: actor.to_string(),
            action: action.to_string(),
            timestamp: ts,
        }
    }

    fn version(doc: &str, version: &str, observed_at: DateTime<Utc>) -> DocumentVersion {
        DocumentVersion {
            document_ref: doc.to_string(),
            version: version.to_string(),
            observed_at,
        }
    }

    #[test]
    fn test_missing_entry_for_unreferenced_transaction() {
        let txs = vec![tx("t1", at(3, 2, 9)), tx("t2", at(4, 2, 9)), tx("old", at(3, 1, 9))];
        let entries = vec![entry("alice", "t1", "create", at(3, 2, 9))];

        let anomalies = check_missing_entries(&period(), &txs, &entries);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].reference, "t2");
        assert_eq!(risk_level(&anomalies), RiskLevel::Medium);
    }

    #[test]
    fn test_shared_transaction_id_needs_account_scoped_entry() {
        let mut other = tx("t1", at(5, 2, 9));
        other.account_id = "acc-2".to_string();
        let txs = vec![tx("t1", at(3, 2, 9)), other];

        // Unscoped entry: the id belongs to two accounts, neither is covered
        let entries = vec![entry("alice", "t1", "create", at(3, 2, 9))];
        let anomalies = check_missing_entries(&period(), &txs, &entries);
        assert_eq!(anomalies.len(), 2);
        assert!(anomalies[0].description.contains("several accounts"));

        // Scoped entry covers acc-1's t1 only
        let mut scoped = entry("alice", "t1", "create", at(3, 2, 9));
        scoped.account_id = Some("acc-1".to_string());
        let anomalies = check_missing_entries(&period(), &txs, &[scoped]);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].reference, "t1");
        assert!(anomalies[0].description.contains("acc-2"));
    }

    #[test]
    fn test_unusual_access_against_own_hours() {
        let entries = vec![
            entry("alice", "h1", "view", at(10, 1, 9)),
            entry("alice", "h2", "view", at(11, 1, 10)),
            entry("alice", "t1", "view", at(3, 2, 9)),
            entry("alice", "t2", "view", at(4, 2, 3)),
        ];

        let (anomalies, skipped) =
            check_unusual_access(&period(), &entries, &AuditConfig::default());
        assert!(skipped.is_empty());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AuditAnomalyKind::UnusualAccess);
        assert_eq!(anomalies[0].timestamp, at(4, 2, 3));
    }

    #[test]
    fn test_actor_without_history_is_skipped_or_pooled() {
        let entries = vec![
            entry("alice", "h1", "view", at(10, 1, 9)),
            entry("alice", "h2", "view", at(11, 1, 10)),
            entry("bob", "t1", "view", at(3, 2, 22)),
            entry("bob", "t2", "view", at(4, 2, 9)),
        ];

        let (anomalies, skipped) =
            check_unusual_access(&period(), &entries, &AuditConfig::default());
        assert!(anomalies.is_empty());
        assert_eq!(skipped, vec!["bob".to_string()]);

        let pooled = AuditConfig {
            access_baseline: AccessBaselinePolicy::Pooled,
            ..AuditConfig::default()
        };
        let (anomalies, skipped) = check_unusual_access(&period(), &entries, &pooled);
        assert!(skipped.is_empty());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].reference, "bob");
        assert_eq!(anomalies[0].timestamp, at(3, 2, 22));
    }

    #[test]
    fn test_document_changes_need_authorization() {
        let versions = vec![
            version("stmt-1", "v3", at(20, 2, 12)),
            version("stmt-1", "v1", at(15, 1, 12)),
            version("stmt-1", "v2", at(10, 2, 12)),
            version("stmt-2", "v1", at(10, 2, 12)),
            version("stmt-2", "v1", at(11, 2, 12)),
        ];
        let entries = vec![
            doc_entry("carol", "stmt-1", "v2", "approve", at(10, 2, 11)),
            doc_entry("carol", "stmt-1", "v3", "view", at(20, 2, 11)),
        ];

        let anomalies =
            check_unauthorized_changes(&period(), &versions, &entries, &AuditConfig::default());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].reference, "stmt-1@v3");
        assert_eq!(risk_level(&anomalies), RiskLevel::High);
    }

    #[test]
    fn test_authorization_recorded_after_change_does_not_count() {
        let versions = vec![
            version("ledger", "a", at(1, 2, 8)),
            version("ledger", "b", at(2, 2, 8)),
        ];
        let entries = vec![doc_entry("dave", "ledger", "b", "update", at(2, 2, 9))];

        let anomalies =
            check_unauthorized_changes(&period(), &versions, &entries, &AuditConfig::default());
        assert_eq!(anomalies.len(), 1);
    }

    #[test]
    fn test_report_ordering_and_risk() {
        let txs = vec![tx("t1", at(5, 2, 9)), tx("t0", at(5, 2, 9))];
        let versions = vec![
            version("stmt", "v1", at(1, 2, 9)),
            version("stmt", "v2", at(5, 2, 9)),
        ];
        let input = AuditInput {
            period: period(),
            transactions: &txs,
            entries: &[],
            document_versions: &versions,
        };

        let report = check_audit_trail(&input, &AuditConfig::default());
        let order: Vec<(AuditAnomalyKind, &str)> = report
            .anomalies
            .iter()
            .map(|a| (a.kind, a.reference.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (AuditAnomalyKind::MissingEntry, "t0"),
                (AuditAnomalyKind::MissingEntry, "t1"),
                (AuditAnomalyKind::UnauthorizedChange, "stmt@v2"),
            ]
        );
        assert_eq!(report.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_clean_trail_is_low_risk() {
        let txs = vec![tx("t1", at(5, 2, 9))];
        let entries = vec![entry("alice", "t1", "create", at(5, 2, 9))];
        let input = AuditInput {
            period: period(),
            transactions: &txs,
            entries: &entries,
            document_versions: &[],
        };

        let report = check_audit_trail(&input, &AuditConfig::default());
        assert!(report.anomalies.is_empty());
        assert_eq!(report.risk_level, RiskLevel::Low);
        assert_eq!(report.skipped_actors, vec!["alice".to_string()]);
    }
}
