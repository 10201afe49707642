use crate::config::{BaselineWindow, ScoringConfig};
use crate::error::EngineError;
use crate::records::types::Transaction;

use super::baseline::compute_baseline;
use super::rules;
use super::types::{AnomalyIndicator, Baseline, FraudAssessment, Priority, ScoringReport};

/// Score one transaction against its baseline and the account's prior activity.
/// Pure: identical inputs always produce an identical assessment.
pub fn score_transaction(
    transaction: &Transaction,
    baseline: &Baseline,
    history: &[Transaction],
    config: &ScoringConfig,
) -> FraudAssessment {
    let mut indicators = Vec::new();

    // Rule 1: Amount far from the mean
    if rules::check_unusual_amount(transaction, baseline, config.unusual_amount_sigma) {
        indicators.push(AnomalyIndicator::UnusualAmount);
    }

    // Rule 2: Outside common hours
    if rules::check_unusual_timing(transaction, baseline) {
        indicators.push(AnomalyIndicator::UnusualTiming);
    }

    // Rule 3: Merchant not seen among the frequent ones
    if rules::check_new_merchant(transaction, baseline) {
        indicators.push(AnomalyIndicator::NewMerchant);
    }

    // Rule 4: Burst of activity in the trailing window
    if rules::check_rapid_succession(
        transaction,
        history,
        config.rapid_succession_window_secs,
        config.rapid_succession_threshold,
    ) {
        indicators.push(AnomalyIndicator::RapidSuccession);
    }

    let score = (indicators.len() as f64 / AnomalyIndicator::ALL.len() as f64).clamp(0.0, 1.0);
    let priority = Priority::from_score(
        score,
        config.fraud_score_medium_threshold,
        config.fraud_score_high_threshold,
    );

    FraudAssessment {
        transaction_id: transaction.id.clone(),
        indicators,
        score,
        priority,
    }
}

fn is_before(a: &Transaction, b: &Transaction) -> bool {
    (&a.timestamp, &a.id) < (&b.timestamp, &b.id)
}

/// Score every in-period transaction of one account.
///
/// `history` holds the account's earlier transactions. Baselines never see a
/// transaction later than the one being scored: in `Disjoint` mode the
/// baseline comes from history strictly before the first scored transaction,
/// in `Inclusive` mode each transaction gets a baseline over history plus the
/// in-period transactions before it.
pub fn score_account(
    account_id: &str,
    transactions: &[Transaction],
    history: &[Transaction],
    config: &ScoringConfig,
) -> ScoringReport {
    let mut issues = Vec::new();

    let mut scored: Vec<Transaction> = Vec::with_capacity(transactions.len());
    for tx in transactions {
        if tx.account_id == account_id {
            scored.push(tx.clone());
        } else {
            issues.push(EngineError::ForeignRecord {
                record: format!("transaction {}", tx.id),
                expected_account: account_id.to_string(),
                actual_account: tx.account_id.clone(),
            });
        }
    }
    scored.sort_by(|a, b| (&a.timestamp, &a.id).cmp(&(&b.timestamp, &b.id)));

    let mut prior: Vec<Transaction> = history
        .iter()
        .filter(|h| h.account_id == account_id)
        .filter(|h| scored.first().map_or(true, |first| is_before(h, first)))
        .cloned()
        .collect();
    prior.sort_by(|a, b| (&a.timestamp, &a.id).cmp(&(&b.timestamp, &b.id)));

    let period_baseline = compute_baseline(account_id, &prior, config);
    if period_baseline.insufficient_data {
        issues.push(EngineError::InsufficientData {
            account_id: account_id.to_string(),
            required: config.min_baseline_transactions,
            actual: period_baseline.sample_size,
        });
    }

    // Velocity sees the prior history and the whole period; the rule itself
    // only counts what came before each transaction.
    let mut activity = prior.clone();
    activity.extend(scored.iter().cloned());

    let mut assessments = Vec::with_capacity(scored.len());
    for (i, tx) in scored.iter().enumerate() {
        let assessment = match config.baseline_window {
            BaselineWindow::Disjoint => score_transaction(tx, &period_baseline, &activity, config),
            BaselineWindow::Inclusive => {
                let sample = prior.iter().chain(scored[..i].iter());
                let baseline = compute_baseline(account_id, sample, config);
                score_transaction(tx, &baseline, &activity, config)
            }
        };

        if assessment.priority != Priority::None {
            tracing::warn!(
                account = %account_id,
                transaction = %assessment.transaction_id,
                score = assessment.score,
                priority = ?assessment.priority,
                indicators = ?assessment.indicators,
                "ANOMALY DETECTED"
            );
        }
        assessments.push(assessment);
    }

    tracing::debug!(
        account = %account_id,
        scored = assessments.len(),
        baseline_sample = period_baseline.sample_size,
        "Scoring complete"
    );

    ScoringReport {
        account_id: account_id.to_string(),
        baseline: period_baseline,
        assessments,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::{BTreeMap, BTreeSet};

    fn tx(id: &str, ts: DateTime<Utc>, amount: i64, merchant: &str) -> Transaction {
        Transaction {
            id: id.to_string(),
            account_id: "acc".to_string(),
            timestamp: ts,
            amount: BigDecimal::from(amount),
            description: merchant.to_string(),
            merchant: merchant.to_string(),
            category: "general".to_string(),
        }
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, minute, 0).unwrap()
    }

    fn reference_baseline() -> Baseline {
        Baseline {
            account_id: "acc".to_string(),
            sample_size: 30,
            mean: 100.0,
            std_dev: 10.0,
            frequent_merchants: vec!["GROCER".to_string()],
            common_hours: BTreeSet::from([9, 10, 11]),
            category_frequency: BTreeMap::new(),
            insufficient_data: false,
        }
    }

    #[test]
    fn test_two_indicators_score_half_priority_none() {
        let transaction = tx("t1", at(5, 3, 0), 140, "Grocer");
        let assessment = score_transaction(
            &transaction,
            &reference_baseline(),
            &[],
            &ScoringConfig::default(),
        );
        assert_eq!(
            assessment.indicators,
            vec![AnomalyIndicator::UnusualAmount, AnomalyIndicator::UnusualTiming]
        );
        assert_eq!(assessment.score, 0.5);
        assert_eq!(assessment.priority, Priority::None);
    }

    #[test]
    fn test_priority_bands() {
        let config = ScoringConfig::default();
        let burst: Vec<Transaction> = (0..3)
            .map(|i| tx(&format!("b{i}"), at(5, 3, i), 500, "Casino"))
            .collect();

        let three = score_transaction(&burst[2], &reference_baseline(), &burst[..2], &config);
        assert_eq!(three.indicators.len(), 4);
        assert_eq!(three.score, 1.0);
        assert_eq!(three.priority, Priority::High);

        let mut tame = reference_baseline();
        tame.std_dev = 1000.0;
        let medium = score_transaction(&burst[2], &tame, &burst[..2], &config);
        assert_eq!(medium.score, 0.75);
        assert_eq!(medium.priority, Priority::Medium);
    }

    #[test]
    fn test_scoring_is_idempotent() {
        let history: Vec<Transaction> = (1..=6)
            .map(|d| tx(&format!("h{d}"), at(d, 9, 0), 100 + d as i64, "Grocer"))
            .collect();
        let period = vec![
            tx("p1", at(10, 9, 0), 104, "Grocer"),
            tx("p2", at(10, 23, 0), 900, "Unknown"),
        ];
        let config = ScoringConfig::default();
        let first = score_account("acc", &period, &history, &config);
        let second = score_account("acc", &period, &history, &config);
        assert_eq!(first.assessments, second.assessments);
        assert!(first.issues.is_empty());
        assert!(first.assessments[0].indicators.is_empty());
        assert_eq!(first.assessments[1].indicators.len(), 3);
        assert_eq!(first.flagged().count(), 1);
        assert_eq!(first.assessments[1].priority, Priority::Medium);
    }

    #[test]
    fn test_rapid_burst_marks_third_to_fifth() {
        let burst: Vec<Transaction> = (0..5)
            .map(|i| {
                let ts = at(10, 9, 0) + chrono::Duration::seconds(i * 30);
                tx(&format!("r{}", i + 1), ts, 100, "Grocer")
            })
            .collect();
        let report = score_account("acc", &burst, &[], &ScoringConfig::default());

        let rapid: Vec<&str> = report
            .assessments
            .iter()
            .filter(|a| a.has(AnomalyIndicator::RapidSuccession))
            .map(|a| a.transaction_id.as_str())
            .collect();
        assert_eq!(rapid, vec!["r3", "r4", "r5"]);
    }

    #[test]
    fn test_no_look_ahead_in_disjoint_mode() {
        let history = vec![
            tx("h1", at(1, 9, 0), 100, "Grocer"),
            tx("h2", at(2, 9, 0), 100, "Grocer"),
            // Later than the scored transaction; must not shape its baseline
            tx("late", at(20, 9, 0), 10_000, "Grocer"),
        ];
        let period = vec![tx("p1", at(10, 9, 0), 100, "Grocer")];
        let report = score_account("acc", &period, &history, &ScoringConfig::default());
        assert_eq!(report.baseline.sample_size, 2);
        assert!((report.baseline.mean - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_inclusive_window_learns_within_period() {
        let period = vec![
            tx("p1", at(10, 9, 0), 100, "Grocer"),
            tx("p2", at(11, 9, 0), 100, "Grocer"),
            tx("p3", at(12, 9, 0), 100, "Grocer"),
        ];
        let config = ScoringConfig {
            baseline_window: BaselineWindow::Inclusive,
            ..ScoringConfig::default()
        };
        let report = score_account("acc", &period, &[], &config);

        // Empty history: the period-start baseline is degraded and reported.
        assert!(matches!(
            report.issues[0],
            EngineError::InsufficientData { actual: 0, .. }
        ));
        // By the third transaction the merchant and hour are known.
        assert!(report.assessments[2].indicators.is_empty());
        assert!(report.assessments[0].has(AnomalyIndicator::NewMerchant));
    }

    #[test]
    fn test_foreign_transactions_are_reported_not_scored() {
        let mut foreign = tx("x1", at(10, 9, 0), 100, "Grocer");
        foreign.account_id = "other".to_string();
        let report = score_account("acc", &[foreign], &[], &ScoringConfig::default());
        assert!(report.assessments.is_empty());
        assert!(report
            .issues
            .iter()
            .any(|e| matches!(e, EngineError::ForeignRecord { .. })));
    }
}
