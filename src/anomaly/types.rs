use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::EngineError;

/// Indicators the scorer can raise for a transaction. Declaration order is the
/// order indicators appear in an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyIndicator {
    UnusualAmount,
    UnusualTiming,
    NewMerchant,
    RapidSuccession,
}

impl AnomalyIndicator {
    pub const ALL: [AnomalyIndicator; 4] = [
        Self::UnusualAmount,
        Self::UnusualTiming,
        Self::NewMerchant,
        Self::RapidSuccession,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnusualAmount => "unusual_amount",
            Self::UnusualTiming => "unusual_timing",
            Self::NewMerchant => "new_merchant",
            Self::RapidSuccession => "rapid_succession",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    None,
    Medium,
    High,
}

impl Priority {
    /// Thresholds are exclusive: a score equal to the medium threshold stays `None`.
    pub fn from_score(score: f64, medium_threshold: f64, high_threshold: f64) -> Self {
        if score > high_threshold {
            Self::High
        } else if score > medium_threshold {
            Self::Medium
        } else {
            Self::None
        }
    }
}

/// Statistical summary of an account's normal behaviour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Baseline {
    pub account_id: String,
    pub sample_size: usize,
    pub mean: f64,
    /// Population standard deviation; zero when `insufficient_data` is set.
    pub std_dev: f64,
    /// Normalized merchant keys, most frequent first.
    pub frequent_merchants: Vec<String>,
    /// Hours of day (UTC) with above-median activity.
    pub common_hours: BTreeSet<u32>,
    pub category_frequency: BTreeMap<String, usize>,
    pub insufficient_data: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FraudAssessment {
    pub transaction_id: String,
    pub indicators: Vec<AnomalyIndicator>,
    pub score: f64,
    pub priority: Priority,
}

impl FraudAssessment {
    pub fn has(&self, indicator: AnomalyIndicator) -> bool {
        self.indicators.contains(&indicator)
    }
}

/// Scoring output for one account and period.
#[derive(Debug, Clone, Serialize)]
pub struct ScoringReport {
    pub account_id: String,
    /// Baseline as of the start of the period.
    pub baseline: Baseline,
    pub assessments: Vec<FraudAssessment>,
    pub issues: Vec<EngineError>,
}

impl ScoringReport {
    pub fn flagged(&self) -> impl Iterator<Item = &FraudAssessment> {
        self.assessments
            .iter()
            .filter(|a| a.priority != Priority::None)
    }
}
