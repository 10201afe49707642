use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Record kinds accepted at the ingestion boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Account,
    Transaction,
    BookRecord,
    Holding,
    MarketSnapshot,
    AuditEntry,
    DocumentVersion,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Transaction => "transaction",
            Self::BookRecord => "book_record",
            Self::Holding => "holding",
            Self::MarketSnapshot => "market_snapshot",
            Self::AuditEntry => "audit_entry",
            Self::DocumentVersion => "document_version",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive date range a batch covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        let date = ts.date_naive();
        date >= self.start && date <= self.end
    }

    /// True when the timestamp falls strictly before the period.
    pub fn is_before(&self, ts: &DateTime<Utc>) -> bool {
        ts.date_naive() < self.start
    }
}

/// A bank-reported transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub account_id: String,
    pub timestamp: DateTime<Utc>,
    pub amount: BigDecimal,
    pub description: String,
    pub merchant: String,
    pub category: String,
}

/// The internal ledger counterpart of a bank transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    pub reference: String,
    pub account_id: String,
    pub timestamp: DateTime<Utc>,
    pub amount: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub account_type: String,
    pub current_balance: BigDecimal,
    pub available_balance: BigDecimal,
    pub snapshot_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub portfolio_id: String,
    pub symbol: String,
    pub quantity: BigDecimal,
    /// Total cost of the position, not per unit.
    pub cost_basis: BigDecimal,
}

/// Price and volatility proxy for one symbol, as delivered by a market feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: BigDecimal,
    pub beta: f64,
    /// Fractional price change per unit of rate shock (duration-like).
    pub rate_sensitivity: f64,
    pub as_of: Option<DateTime<Utc>>,
}

/// One line of the audit trail: who did what, and to which transaction or document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub transaction_id: Option<String>,
    /// Owner of `transaction_id`. Transaction ids are only unique per account,
    /// so an entry without one is ambiguous when the id is shared.
    #[serde(default)]
    pub account_id: Option<String>,
    pub document_ref: Option<String>,
    pub version: Option<String>,
    pub actor_id: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

/// An observed state of a versioned document (statement, ledger export, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub document_ref: String,
    pub version: String,
    pub observed_at: DateTime<Utc>,
}
