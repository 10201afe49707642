use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::config::NormalizerConfig;
use crate::error::EngineError;

use super::decoder;
use super::types::{
    Account, AuditEntry, BookRecord, DocumentVersion, Holding, MarketSnapshot, Period, RecordKind,
    Transaction,
};

/// Raw input for one period, as handed over by the acquisition layer.
/// Records stay untyped JSON until the normalizer decodes them one by one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBatch {
    pub period: Period,
    #[serde(default)]
    pub accounts: Vec<Value>,
    #[serde(default)]
    pub transactions: Vec<Value>,
    #[serde(default, alias = "bookRecords")]
    pub book_records: Vec<Value>,
    #[serde(default)]
    pub holdings: Vec<Value>,
    #[serde(default, alias = "marketSnapshots")]
    pub market_snapshots: Vec<Value>,
    #[serde(default, alias = "auditEntries")]
    pub audit_entries: Vec<Value>,
    #[serde(default, alias = "documentVersions")]
    pub document_versions: Vec<Value>,
}

impl RawBatch {
    pub fn new(period: Period) -> Self {
        Self {
            period,
            accounts: Vec::new(),
            transactions: Vec::new(),
            book_records: Vec::new(),
            holdings: Vec::new(),
            market_snapshots: Vec::new(),
            audit_entries: Vec::new(),
            document_versions: Vec::new(),
        }
    }

    /// Load a batch from a JSON file.
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read batch file '{}': {}", path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse batch file '{}': {}", path, e))
    }

    pub fn records_mut(&mut self, kind: RecordKind) -> &mut Vec<Value> {
        match kind {
            RecordKind::Account => &mut self.accounts,
            RecordKind::Transaction => &mut self.transactions,
            RecordKind::BookRecord => &mut self.book_records,
            RecordKind::Holding => &mut self.holdings,
            RecordKind::MarketSnapshot => &mut self.market_snapshots,
            RecordKind::AuditEntry => &mut self.audit_entries,
            RecordKind::DocumentVersion => &mut self.document_versions,
        }
    }
}

/// Canonical records plus every record that failed validation.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedBatch {
    pub period: Period,
    pub accounts: Vec<Account>,
    pub transactions: Vec<Transaction>,
    pub book_records: Vec<BookRecord>,
    pub holdings: Vec<Holding>,
    pub market_snapshots: Vec<MarketSnapshot>,
    pub audit_entries: Vec<AuditEntry>,
    pub document_versions: Vec<DocumentVersion>,
    pub rejected: Vec<EngineError>,
}

impl NormalizedBatch {
    pub fn accepted_count(&self) -> usize {
        self.accounts.len()
            + self.transactions.len()
            + self.book_records.len()
            + self.holdings.len()
            + self.market_snapshots.len()
            + self.audit_entries.len()
            + self.document_versions.len()
    }
}

/// Decode every raw record of one kind. Bad records land in `rejected` and
/// never stop the rest of the batch.
fn decode_all<T>(
    kind: RecordKind,
    raw: &[Value],
    rejected: &mut Vec<EngineError>,
    decode: impl Fn(&Value) -> Result<T, String>,
    dedup_key: impl Fn(&T) -> Option<(String, String)>,
) -> Vec<T> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());

    for (index, value) in raw.iter().enumerate() {
        let decoded = decode(value).and_then(|record| match dedup_key(&record) {
            Some(key) if !seen.insert(key.clone()) => Err(format!(
                "duplicate id '{}' for account '{}'",
                key.1, key.0
            )),
            _ => Ok(record),
        });

        match decoded {
            Ok(record) => out.push(record),
            Err(reason) => {
                let id = decoder::record_id(value, kind);
                tracing::warn!(
                    kind = kind.as_str(),
                    index,
                    id = ?id,
                    reason = %reason,
                    "Rejected record"
                );
                rejected.push(EngineError::Validation {
                    kind,
                    index,
                    id,
                    reason,
                });
            }
        }
    }

    out
}

/// Validate and canonicalize a raw batch.
pub fn normalize_batch(raw: &RawBatch, config: &NormalizerConfig) -> NormalizedBatch {
    let scale = config.amount_scale;
    let mut rejected = Vec::new();

    let accounts = decode_all(
        RecordKind::Account,
        &raw.accounts,
        &mut rejected,
        |v| decoder::decode_account(v, scale),
        |a: &Account| Some((a.account_id.clone(), a.account_id.clone())),
    );
    let transactions = decode_all(
        RecordKind::Transaction,
        &raw.transactions,
        &mut rejected,
        |v| decoder::decode_transaction(v, scale),
        |t: &Transaction| Some((t.account_id.clone(), t.id.clone())),
    );
    let book_records = decode_all(
        RecordKind::BookRecord,
        &raw.book_records,
        &mut rejected,
        |v| decoder::decode_book_record(v, scale),
        |b: &BookRecord| Some((b.account_id.clone(), b.reference.clone())),
    );
    let holdings = decode_all(
        RecordKind::Holding,
        &raw.holdings,
        &mut rejected,
        |v| decoder::decode_holding(v, scale),
        |h: &Holding| Some((h.portfolio_id.clone(), h.symbol.clone())),
    );
    let market_snapshots = decode_all(
        RecordKind::MarketSnapshot,
        &raw.market_snapshots,
        &mut rejected,
        decoder::decode_market_snapshot,
        |_| None,
    );
    let audit_entries = decode_all(
        RecordKind::AuditEntry,
        &raw.audit_entries,
        &mut rejected,
        decoder::decode_audit_entry,
        |_| None,
    );
    let document_versions = decode_all(
        RecordKind::DocumentVersion,
        &raw.document_versions,
        &mut rejected,
        decoder::decode_document_version,
        |_| None,
    );

    let batch = NormalizedBatch {
        period: raw.period,
        accounts,
        transactions,
        book_records,
        holdings,
        market_snapshots,
        audit_entries,
        document_versions,
        rejected,
    };

    tracing::info!(
        accepted = batch.accepted_count(),
        rejected = batch.rejected.len(),
        "Normalized batch"
    );

    batch
}
