use bigdecimal::ToPrimitive;
use chrono::{Duration, Timelike};

use crate::records::types::Transaction;

use super::baseline::merchant_key;
use super::types::Baseline;

/// Amount deviates from the baseline mean by more than `sigma` standard deviations.
pub fn check_unusual_amount(transaction: &Transaction, baseline: &Baseline, sigma: f64) -> bool {
    let amount = transaction.amount.to_f64().unwrap_or(0.0);
    (amount - baseline.mean).abs() > sigma * baseline.std_dev
}

/// Hour of day is outside the account's common active hours.
pub fn check_unusual_timing(transaction: &Transaction, baseline: &Baseline) -> bool {
    !baseline.common_hours.contains(&transaction.timestamp.hour())
}

/// Merchant is not one of the account's frequent merchants.
pub fn check_new_merchant(transaction: &Transaction, baseline: &Baseline) -> bool {
    let key = merchant_key(&transaction.merchant);
    !baseline.frequent_merchants.iter().any(|m| *m == key)
}

/// At least `threshold` transactions on the same account, this one included,
/// fall in the trailing window `[t - window, t]`. Only transactions ordered
/// before this one by (timestamp, id) are counted, so later activity never
/// changes an earlier transaction's result.
pub fn check_rapid_succession(
    transaction: &Transaction,
    history: &[Transaction],
    window_secs: i64,
    threshold: usize,
) -> bool {
    let window_start = transaction.timestamp - Duration::seconds(window_secs);
    let key = (&transaction.timestamp, &transaction.id);

    let prior = history
        .iter()
        .filter(|h| h.account_id == transaction.account_id)
        .filter(|h| h.timestamp >= window_start)
        .filter(|h| (&h.timestamp, &h.id) < key)
        .count();

    prior + 1 >= threshold
}
