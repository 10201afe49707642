use serde::Serialize;

use crate::records::types::RecordKind;

/// Failures scoped to a single unit of work: one record, one holding, one
/// account or portfolio. None of these abort a batch; engines return them next
/// to their partial results.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum EngineError {
    #[error("invalid {kind} record #{index}{}: {reason}", id_suffix(.id))]
    Validation {
        kind: RecordKind,
        index: usize,
        id: Option<String>,
        reason: String,
    },

    #[error(
        "account {account_id}: baseline needs {required} transactions, got {actual}; \
         using zero deviation"
    )]
    InsufficientData {
        account_id: String,
        required: usize,
        actual: usize,
    },

    #[error("portfolio {portfolio_id}: no market snapshot for {symbol}, holding excluded")]
    MissingMarketData { portfolio_id: String, symbol: String },

    #[error("{record} belongs to account {actual_account}, not {expected_account}")]
    ForeignRecord {
        record: String,
        expected_account: String,
        actual_account: String,
    },

    #[error("holding {symbol} belongs to portfolio {actual_portfolio}, not {expected_portfolio}")]
    ForeignHolding {
        symbol: String,
        expected_portfolio: String,
        actual_portfolio: String,
    },

    #[error("unit {unit} timed out after {after_ms}ms")]
    Timeout { unit: String, after_ms: u64 },

    #[error("unit {unit} worker failed: {reason}")]
    WorkerFailed { unit: String, reason: String },
}

fn id_suffix(id: &Option<String>) -> String {
    id.as_deref().map(|i| format!(" ({i})")).unwrap_or_default()
}

impl EngineError {
    pub fn validation(
        kind: RecordKind,
        index: usize,
        id: Option<&str>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Validation {
            kind,
            index,
            id: id.map(str::to_string),
            reason: reason.into(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::InsufficientData { .. } => "insufficient_data",
            Self::MissingMarketData { .. } => "missing_market_data",
            Self::ForeignRecord { .. } => "foreign_record",
            Self::ForeignHolding { .. } => "foreign_holding",
            Self::Timeout { .. } => "timeout",
            Self::WorkerFailed { .. } => "worker_failed",
        }
    }
}
