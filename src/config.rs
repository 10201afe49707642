use bigdecimal::BigDecimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

use crate::risk::types::StressScenario;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub reconciliation: ToleranceConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub stress: StressConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub csv_sources: Vec<CsvSourceConfig>,
}

// ============================================================
// Normalizer Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct NormalizerConfig {
    /// Decimal places money amounts are rounded to (half-even) at ingestion.
    #[serde(default = "default_amount_scale", alias = "amountScale")]
    pub amount_scale: i64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            amount_scale: default_amount_scale(),
        }
    }
}

fn default_amount_scale() -> i64 {
    2
}

/// An extra CSV file appended to the batch before normalization.
#[derive(Debug, Deserialize, Clone)]
pub struct CsvSourceConfig {
    pub kind: crate::records::types::RecordKind,
    pub path: String,
}

// ============================================================
// Reconciliation Config
// ============================================================

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ToleranceConfig {
    #[serde(
        default = "default_amount_tolerance",
        alias = "amountTolerance",
        deserialize_with = "deserialize_decimal"
    )]
    pub amount_tolerance: BigDecimal,
    #[serde(default, alias = "dateToleranceDays")]
    pub date_tolerance_days: u32,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            amount_tolerance: default_amount_tolerance(),
            date_tolerance_days: 0,
        }
    }
}

fn default_amount_tolerance() -> BigDecimal {
    BigDecimal::new(1.into(), 2)
}

/// Accept a decimal written as a TOML string, integer or float. Floats go
/// through their shortest textual form so 0.01 stays exactly 0.01.
fn deserialize_decimal<'de, D>(deserializer: D) -> Result<BigDecimal, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DecimalRepr {
        Text(String),
        Int(i64),
        Float(f64),
    }

    let text = match DecimalRepr::deserialize(deserializer)? {
        DecimalRepr::Text(s) => s,
        DecimalRepr::Int(i) => i.to_string(),
        DecimalRepr::Float(f) => f.to_string(),
    };
    BigDecimal::from_str(text.trim()).map_err(serde::de::Error::custom)
}

// ============================================================
// Scoring Config
// ============================================================

/// Which transactions feed the baseline a transaction is scored against.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BaselineWindow {
    /// History strictly before the period only.
    #[default]
    Disjoint,
    /// History plus in-period transactions strictly before the scored one.
    Inclusive,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScoringConfig {
    #[serde(default = "default_top_merchant_count", alias = "topMerchantCount")]
    pub top_merchant_count: usize,
    #[serde(default = "default_min_baseline", alias = "minBaselineTransactions")]
    pub min_baseline_transactions: usize,
    #[serde(default = "default_sigma", alias = "unusualAmountSigma")]
    pub unusual_amount_sigma: f64,
    #[serde(
        default = "default_rapid_window",
        alias = "rapidSuccessionWindowSeconds"
    )]
    pub rapid_succession_window_secs: i64,
    #[serde(
        default = "default_rapid_threshold",
        alias = "rapidSuccessionThreshold"
    )]
    pub rapid_succession_threshold: usize,
    #[serde(default = "default_high_threshold", alias = "fraudScoreHighThreshold")]
    pub fraud_score_high_threshold: f64,
    #[serde(
        default = "default_medium_threshold",
        alias = "fraudScoreMediumThreshold"
    )]
    pub fraud_score_medium_threshold: f64,
    #[serde(default, alias = "baselineWindow")]
    pub baseline_window: BaselineWindow,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            top_merchant_count: default_top_merchant_count(),
            min_baseline_transactions: default_min_baseline(),
            unusual_amount_sigma: default_sigma(),
            rapid_succession_window_secs: default_rapid_window(),
            rapid_succession_threshold: default_rapid_threshold(),
            fraud_score_high_threshold: default_high_threshold(),
            fraud_score_medium_threshold: default_medium_threshold(),
            baseline_window: BaselineWindow::default(),
        }
    }
}

fn default_top_merchant_count() -> usize {
    10
}

fn default_min_baseline() -> usize {
    2
}

fn default_sigma() -> f64 {
    3.0
}

fn default_rapid_window() -> i64 {
    300
}

fn default_rapid_threshold() -> usize {
    3
}

fn default_high_threshold() -> f64 {
    0.9
}

fn default_medium_threshold() -> f64 {
    0.7
}

// ============================================================
// Stress Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct StressConfig {
    #[serde(default = "default_top_worst", alias = "stressTopWorstCount")]
    pub top_worst_count: usize,
    #[serde(default)]
    pub scenarios: Vec<StressScenario>,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            top_worst_count: default_top_worst(),
            scenarios: Vec::new(),
        }
    }
}

fn default_top_worst() -> usize {
    5
}

// ============================================================
// Audit Config
// ============================================================

/// What to do for an actor with no access history of their own.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessBaselinePolicy {
    /// Skip the unusual-access check for that actor.
    #[default]
    Skip,
    /// Fall back to a baseline pooled over every actor's history.
    Pooled,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    #[serde(default, alias = "accessBaseline")]
    pub access_baseline: AccessBaselinePolicy,
    #[serde(default = "default_min_history", alias = "minHistoryEntries")]
    pub min_history_entries: usize,
    #[serde(default = "default_authorizing_actions", alias = "authorizingActions")]
    pub authorizing_actions: Vec<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            access_baseline: AccessBaselinePolicy::default(),
            min_history_entries: default_min_history(),
            authorizing_actions: default_authorizing_actions(),
        }
    }
}

fn default_min_history() -> usize {
    2
}

fn default_authorizing_actions() -> Vec<String> {
    ["update", "approve", "authorize", "modify"]
        .into_iter()
        .map(String::from)
        .collect()
}

// ============================================================
// Batch Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default = "default_max_workers", alias = "maxWorkers")]
    pub max_workers: usize,
    #[serde(default = "default_unit_timeout_ms", alias = "unitTimeoutMs")]
    pub unit_timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            unit_timeout_ms: default_unit_timeout_ms(),
        }
    }
}

fn default_max_workers() -> usize {
    4
}

fn default_unit_timeout_ms() -> u64 {
    30_000
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if !(0..=12).contains(&self.normalizer.amount_scale) {
            return Err(eyre::eyre!(
                "amount_scale must be between 0 and 12, got {}",
                self.normalizer.amount_scale
            ));
        }
        if self.reconciliation.amount_tolerance < BigDecimal::from(0) {
            return Err(eyre::eyre!("amount_tolerance must not be negative"));
        }

        let scoring = &self.scoring;
        for (name, value) in [
            ("fraud_score_high_threshold", scoring.fraud_score_high_threshold),
            ("fraud_score_medium_threshold", scoring.fraud_score_medium_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(eyre::eyre!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if scoring.fraud_score_medium_threshold > scoring.fraud_score_high_threshold {
            return Err(eyre::eyre!(
                "fraud_score_medium_threshold ({}) exceeds fraud_score_high_threshold ({})",
                scoring.fraud_score_medium_threshold,
                scoring.fraud_score_high_threshold
            ));
        }
        if scoring.top_merchant_count == 0 {
            return Err(eyre::eyre!("top_merchant_count must be at least 1"));
        }
        if scoring.rapid_succession_window_secs <= 0 || scoring.rapid_succession_threshold == 0 {
            return Err(eyre::eyre!(
                "rapid succession window and threshold must be positive"
            ));
        }
        if !scoring.unusual_amount_sigma.is_finite() || scoring.unusual_amount_sigma < 0.0 {
            return Err(eyre::eyre!("unusual_amount_sigma must be a non-negative number"));
        }

        if self.stress.top_worst_count == 0 {
            return Err(eyre::eyre!("top_worst_count must be at least 1"));
        }
        for scenario in &self.stress.scenarios {
            scenario
                .validate()
                .map_err(|e| eyre::eyre!("Stress scenario '{}': {}", scenario.name, e))?;
        }

        if self.batch.max_workers == 0 || self.batch.unit_timeout_ms == 0 {
            return Err(eyre::eyre!("max_workers and unit_timeout_ms must be positive"));
        }
        Ok(())
    }
}
