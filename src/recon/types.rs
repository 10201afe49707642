use bigdecimal::BigDecimal;
use serde::Serialize;

use crate::error::EngineError;
use crate::records::types::{BookRecord, Period, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// The bank reported a transaction the ledger does not have.
    MissingBookEntry,
    /// The ledger has an entry the bank never reported.
    MissingBankEntry,
}

impl DiscrepancyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingBookEntry => "missing_book_entry",
            Self::MissingBankEntry => "missing_bank_entry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discrepancy {
    pub kind: DiscrepancyKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_transaction: Option<Transaction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_record: Option<BookRecord>,
    pub suggested_action: String,
}

impl Discrepancy {
    pub fn missing_book_entry(tx: &Transaction) -> Self {
        Self {
            kind: DiscrepancyKind::MissingBookEntry,
            suggested_action: format!(
                "Record a ledger entry of {} dated {} for bank transaction {} ({})",
                tx.amount,
                tx.timestamp.date_naive(),
                tx.id,
                tx.description
            ),
            bank_transaction: Some(tx.clone()),
            book_record: None,
        }
    }

    pub fn missing_bank_entry(record: &BookRecord) -> Self {
        Self {
            kind: DiscrepancyKind::MissingBankEntry,
            suggested_action: format!(
                "Confirm ledger entry {} of {} dated {} with the bank or reverse it",
                record.reference,
                record.amount,
                record.timestamp.date_naive()
            ),
            bank_transaction: None,
            book_record: Some(record.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedPair {
    pub transaction_id: String,
    pub book_reference: String,
    /// Bank amount minus book amount.
    pub amount_delta: BigDecimal,
    /// Bank date minus book date, in days.
    pub date_offset_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconStatus {
    Balanced,
    Unbalanced,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub account_id: String,
    pub period: Period,
    /// Net of the in-period bank transactions.
    pub bank_balance: BigDecimal,
    /// Net of the in-period ledger entries.
    pub book_balance: BigDecimal,
    pub difference: BigDecimal,
    pub matched: Vec<MatchedPair>,
    pub discrepancies: Vec<Discrepancy>,
    pub status: ReconStatus,
    pub skipped: Vec<EngineError>,
}

impl ReconciliationReport {
    pub fn is_balanced(&self) -> bool {
        self.status == ReconStatus::Balanced
    }
}
