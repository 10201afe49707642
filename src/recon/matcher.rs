use bigdecimal::BigDecimal;
use std::cmp::Ordering;

use crate::config::ToleranceConfig;
use crate::records::types::{BookRecord, Transaction};

use super::types::MatchedPair;

#[derive(Debug)]
pub struct MatchOutput<'a> {
    pub matched: Vec<MatchedPair>,
    pub bank_only: Vec<&'a Transaction>,
    pub book_only: Vec<&'a BookRecord>,
}

/// Days between the bank and book dates (bank minus book).
pub fn date_offset_days(tx: &Transaction, record: &BookRecord) -> i64 {
    (tx.timestamp.date_naive() - record.timestamp.date_naive()).num_days()
}

pub fn within_tolerance(
    tx: &Transaction,
    record: &BookRecord,
    tolerance: &ToleranceConfig,
) -> bool {
    (&tx.amount - &record.amount).abs() <= tolerance.amount_tolerance
        && date_offset_days(tx, record).unsigned_abs() <= u64::from(tolerance.date_tolerance_days)
}

/// Order candidates: smallest amount difference, then earliest date, then
/// earliest timestamp, then reference so the pick never depends on input order.
fn candidate_order(
    a: &(usize, BigDecimal, &BookRecord),
    b: &(usize, BigDecimal, &BookRecord),
) -> Ordering {
    a.1.cmp(&b.1)
        .then_with(|| a.2.timestamp.date_naive().cmp(&b.2.timestamp.date_naive()))
        .then_with(|| a.2.timestamp.cmp(&b.2.timestamp))
        .then_with(|| a.2.reference.cmp(&b.2.reference))
}

/// Greedy one-to-one matching by amount and date tolerance.
///
/// Bank transactions are visited in the order given (callers sort them first).
/// Each book record is consumed at most once; splits of one bank transaction
/// over several book records are not attempted.
pub fn match_one_to_one<'a>(
    bank: &[&'a Transaction],
    book: &[&'a BookRecord],
    tolerance: &ToleranceConfig,
) -> MatchOutput<'a> {
    let mut book_used = vec![false; book.len()];
    let mut matched = Vec::new();
    let mut bank_only = Vec::new();

    for tx in bank {
        let best = book
            .iter()
            .enumerate()
            .filter(|(i, _)| !book_used[*i])
            .filter(|(_, record)| within_tolerance(tx, record, tolerance))
            .map(|(i, record)| (i, (&tx.amount - &record.amount).abs(), *record))
            .min_by(candidate_order);

        match best {
            Some((i, _, record)) => {
                book_used[i] = true;
                matched.push(MatchedPair {
                    transaction_id: tx.id.clone(),
                    book_reference: record.reference.clone(),
                    amount_delta: &tx.amount - &record.amount,
                    date_offset_days: date_offset_days(tx, record),
                });
            }
            None => bank_only.push(*tx),
        }
    }

    let book_only = book
        .iter()
        .enumerate()
        .filter(|(i, _)| !book_used[*i])
        .map(|(_, record)| *record)
        .collect();

    MatchOutput {
        matched,
        bank_only,
        book_only,
    }
}
