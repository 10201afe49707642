use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::error::EngineError;

/// A hypothetical market shock. Shocks are fractional price changes:
/// `-0.3` means prices fall by 30%.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressScenario {
    pub name: String,
    #[serde(default, alias = "marketShock")]
    pub market_shock: f64,
    #[serde(default, alias = "rateShock")]
    pub rate_shock: f64,
    /// Scale the market shock by each holding's beta.
    #[serde(default, alias = "betaAdjusted")]
    pub beta_adjusted: bool,
    /// Per-symbol shocks that replace the market shock for that symbol.
    /// Keys are upper-cased like holding symbols.
    #[serde(
        default,
        alias = "symbolShocks",
        deserialize_with = "deserialize_symbol_shocks"
    )]
    pub symbol_shocks: BTreeMap<String, f64>,
}

fn deserialize_symbol_shocks<'de, D>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, f64>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(symbol, shock)| (symbol.trim().to_uppercase(), shock))
        .collect())
}

impl StressScenario {
    pub fn market(name: &str, market_shock: f64) -> Self {
        Self {
            name: name.to_string(),
            market_shock,
            rate_shock: 0.0,
            beta_adjusted: false,
            symbol_shocks: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let shocks = std::iter::once(self.market_shock)
            .chain(std::iter::once(self.rate_shock))
            .chain(self.symbol_shocks.values().copied());
        for shock in shocks {
            if !shock.is_finite() {
                return Err("shocks must be finite numbers".to_string());
            }
        }
        if self.market_shock < -1.0 || self.symbol_shocks.values().any(|s| *s < -1.0) {
            return Err("a price shock below -100% is not meaningful".to_string());
        }
        Ok(())
    }
}

/// A holding joined with its market snapshot, in analytics precision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricedHolding {
    pub symbol: String,
    pub quantity: f64,
    pub price: f64,
    pub cost_basis: f64,
    pub beta: f64,
    pub rate_sensitivity: f64,
}

impl PricedHolding {
    pub fn market_value(&self) -> f64 {
        self.quantity * self.price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldingExposure {
    pub symbol: String,
    pub market_value: f64,
    /// Share of gross portfolio value.
    pub weight: f64,
    pub beta: f64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskMetrics {
    pub total_market_value: f64,
    pub gross_exposure: f64,
    pub total_cost_basis: f64,
    pub unrealized_pnl: f64,
    /// Value-weighted average of holding betas.
    pub portfolio_beta: f64,
    /// Sum of market value times beta.
    pub beta_weighted_exposure: f64,
    /// Largest single-holding absolute weight.
    pub concentration: f64,
    pub largest_holding: Option<String>,
    pub exposures: Vec<HoldingExposure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioAssessment {
    pub portfolio_id: String,
    pub metrics: RiskMetrics,
    pub holdings: Vec<PricedHolding>,
    pub missing_market_data: Vec<EngineError>,
    /// Holdings of another portfolio handed in by mistake.
    pub skipped: Vec<EngineError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldingImpact {
    pub symbol: String,
    pub base_value: f64,
    pub stressed_value: f64,
    pub value_delta: f64,
    pub delta_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StressResult {
    pub scenario: String,
    pub base_value: f64,
    pub stressed_value: f64,
    pub value_delta: f64,
    pub delta_percent: f64,
    /// Worst performers first.
    pub worst_holdings: Vec<HoldingImpact>,
}
