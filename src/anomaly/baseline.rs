use bigdecimal::ToPrimitive;
use chrono::{DateTime, Timelike, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::ScoringConfig;
use crate::records::types::Transaction;

use super::types::Baseline;

/// Merchant names are compared case-insensitively with surrounding blanks removed.
pub fn merchant_key(merchant: &str) -> String {
    merchant.trim().to_uppercase()
}

/// Hours of day whose activity count is strictly above the median of all 24
/// hourly buckets. When every active hour ties with the median (a perfectly
/// flat profile), all active hours are common.
pub fn common_hours<'a>(timestamps: impl IntoIterator<Item = &'a DateTime<Utc>>) -> BTreeSet<u32> {
    let mut buckets = [0usize; 24];
    for ts in timestamps {
        buckets[ts.hour() as usize] += 1;
    }

    let mut sorted = buckets;
    sorted.sort_unstable();
    let median = (sorted[11] + sorted[12]) as f64 / 2.0;

    let above: BTreeSet<u32> = (0..24u32)
        .filter(|h| buckets[*h as usize] as f64 > median)
        .collect();
    if !above.is_empty() {
        return above;
    }

    (0..24u32).filter(|h| buckets[*h as usize] > 0).collect()
}

/// Mean and population standard deviation.
pub fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Build a baseline from a transaction sample.
///
/// A sample smaller than `min_baseline_transactions` still yields a baseline so
/// scoring stays total: the standard deviation is pinned to zero and
/// `insufficient_data` is set for the caller to report.
pub fn compute_baseline<'a>(
    account_id: &str,
    sample: impl IntoIterator<Item = &'a Transaction>,
    config: &ScoringConfig,
) -> Baseline {
    let sample: Vec<&Transaction> = sample.into_iter().collect();

    let amounts: Vec<f64> = sample
        .iter()
        .map(|t| t.amount.to_f64().unwrap_or(0.0))
        .collect();
    let (mean, std_dev) = mean_and_std(&amounts);
    let insufficient_data = sample.len() < config.min_baseline_transactions;

    let mut merchant_counts: HashMap<String, usize> = HashMap::new();
    let mut category_frequency: BTreeMap<String, usize> = BTreeMap::new();
    for tx in &sample {
        *merchant_counts.entry(merchant_key(&tx.merchant)).or_default() += 1;
        *category_frequency.entry(tx.category.clone()).or_default() += 1;
    }

    let mut ranked: Vec<(String, usize)> = merchant_counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let frequent_merchants = ranked
        .into_iter()
        .take(config.top_merchant_count)
        .map(|(merchant, _)| merchant)
        .collect();

    Baseline {
        account_id: account_id.to_string(),
        sample_size: sample.len(),
        mean,
        std_dev: if insufficient_data { 0.0 } else { std_dev },
        frequent_merchants,
        common_hours: common_hours(sample.iter().map(|t| &t.timestamp)),
        category_frequency,
        insufficient_data,
    }
}
