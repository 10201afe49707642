use bigdecimal::BigDecimal;

use crate::config::ToleranceConfig;
use crate::error::EngineError;
use crate::records::types::{Account, BookRecord, Period, Transaction};

use super::matcher::match_one_to_one;
use super::types::{Discrepancy, ReconStatus, ReconciliationReport};

/// Reconcile one account's bank transactions against its ledger entries.
///
/// Inputs are sorted before matching, so any permutation of `bank` or `book`
/// yields the same report. Records filed under another account are skipped
/// and reported rather than matched.
pub fn reconcile(
    account: &Account,
    period: &Period,
    bank: &[Transaction],
    book: &[BookRecord],
    tolerance: &ToleranceConfig,
) -> ReconciliationReport {
    let account_id = account.account_id.as_str();
    let mut skipped = Vec::new();

    let mut bank_txs: Vec<&Transaction> = Vec::with_capacity(bank.len());
    for tx in bank {
        if tx.account_id == account_id {
            bank_txs.push(tx);
        } else {
            skipped.push(EngineError::ForeignRecord {
                record: format!("transaction {}", tx.id),
                expected_account: account_id.to_string(),
                actual_account: tx.account_id.clone(),
            });
        }
    }

    let mut book_records: Vec<&BookRecord> = Vec::with_capacity(book.len());
    for record in book {
        if record.account_id == account_id {
            book_records.push(record);
        } else {
            skipped.push(EngineError::ForeignRecord {
                record: format!("book record {}", record.reference),
                expected_account: account_id.to_string(),
                actual_account: record.account_id.clone(),
            });
        }
    }

    bank_txs.sort_by(|a, b| {
        a.timestamp
            .date_naive()
            .cmp(&b.timestamp.date_naive())
            .then_with(|| a.amount.cmp(&b.amount))
            .then_with(|| a.timestamp.cmp(&b.timestamp))
            .then_with(|| a.id.cmp(&b.id))
    });
    book_records.sort_by(|a, b| {
        a.timestamp
            .date_naive()
            .cmp(&b.timestamp.date_naive())
            .then_with(|| a.amount.cmp(&b.amount))
            .then_with(|| a.timestamp.cmp(&b.timestamp))
            .then_with(|| a.reference.cmp(&b.reference))
    });

    let bank_balance = bank_txs
        .iter()
        .fold(BigDecimal::from(0), |acc, t| acc + &t.amount);
    let book_balance = book_records
        .iter()
        .fold(BigDecimal::from(0), |acc, r| acc + &r.amount);

    let output = match_one_to_one(&bank_txs, &book_records, tolerance);

    let discrepancies: Vec<Discrepancy> = output
        .bank_only
        .iter()
        .map(|tx| Discrepancy::missing_book_entry(tx))
        .chain(
            output
                .book_only
                .iter()
                .map(|record| Discrepancy::missing_bank_entry(record)),
        )
        .collect();

    let status = if discrepancies.is_empty() {
        ReconStatus::Balanced
    } else {
        ReconStatus::Unbalanced
    };

    if status == ReconStatus::Unbalanced {
        tracing::info!(
            account = %account_id,
            matched = output.matched.len(),
            missing_book = output.bank_only.len(),
            missing_bank = output.book_only.len(),
            "Reconciliation unbalanced"
        );
    } else {
        tracing::debug!(
            account = %account_id,
            matched = output.matched.len(),
            "Reconciliation balanced"
        );
    }

    ReconciliationReport {
        account_id: account_id.to_string(),
        period: *period,
        difference: &bank_balance - &book_balance,
        bank_balance,
        book_balance,
        matched: output.matched,
        discrepancies,
        status,
        skipped,
    }
}
