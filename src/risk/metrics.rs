use bigdecimal::{BigDecimal, ToPrimitive};
use std::collections::HashMap;

use crate::error::EngineError;
use crate::records::types::{Holding, MarketSnapshot};

use super::types::{HoldingExposure, PortfolioAssessment, PricedHolding, RiskMetrics};

fn to_f64(value: &BigDecimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Index snapshots by symbol. On duplicates the latest `as_of` wins, and an
/// undated snapshot never replaces a dated one.
fn index_snapshots(snapshots: &[MarketSnapshot]) -> HashMap<&str, &MarketSnapshot> {
    let mut by_symbol: HashMap<&str, &MarketSnapshot> = HashMap::new();
    for snap in snapshots {
        match by_symbol.get(snap.symbol.as_str()) {
            Some(existing) if existing.as_of > snap.as_of => {}
            _ => {
                by_symbol.insert(snap.symbol.as_str(), snap);
            }
        }
    }
    by_symbol
}

/// Join holdings with market data and compute portfolio risk metrics.
///
/// A holding without a snapshot is left out of every aggregate and recorded
/// as `MissingMarketData`; it is never dropped silently.
pub fn assess_portfolio(
    portfolio_id: &str,
    holdings: &[Holding],
    snapshots: &[MarketSnapshot],
) -> PortfolioAssessment {
    let by_symbol = index_snapshots(snapshots);
    let mut missing_market_data = Vec::new();
    let mut skipped = Vec::new();
    let mut priced = Vec::with_capacity(holdings.len());

    for holding in holdings {
        if holding.portfolio_id != portfolio_id {
            skipped.push(EngineError::ForeignHolding {
                symbol: holding.symbol.clone(),
                expected_portfolio: portfolio_id.to_string(),
                actual_portfolio: holding.portfolio_id.clone(),
            });
            continue;
        }

        match by_symbol.get(holding.symbol.as_str()) {
            Some(snap) => priced.push(PricedHolding {
                symbol: holding.symbol.clone(),
                quantity: to_f64(&holding.quantity),
                price: to_f64(&snap.price),
                cost_basis: to_f64(&holding.cost_basis),
                beta: snap.beta,
                rate_sensitivity: snap.rate_sensitivity,
            }),
            None => {
                tracing::warn!(
                    portfolio = %portfolio_id,
                    symbol = %holding.symbol,
                    "No market snapshot for holding, excluding it"
                );
                missing_market_data.push(EngineError::MissingMarketData {
                    portfolio_id: portfolio_id.to_string(),
                    symbol: holding.symbol.clone(),
                });
            }
        }
    }
    priced.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    let metrics = compute_metrics(&priced);
    tracing::debug!(
        portfolio = %portfolio_id,
        holdings = priced.len(),
        missing = missing_market_data.len(),
        skipped = skipped.len(),
        value = metrics.total_market_value,
        beta = metrics.portfolio_beta,
        "Portfolio assessed"
    );

    PortfolioAssessment {
        portfolio_id: portfolio_id.to_string(),
        metrics,
        holdings: priced,
        missing_market_data,
        skipped,
    }
}

/// Weighted exposure, beta and concentration over priced holdings.
/// Weights are taken against gross value so short positions count as exposure.
pub fn compute_metrics(holdings: &[PricedHolding]) -> RiskMetrics {
    let total_market_value: f64 = holdings.iter().map(|h| h.market_value()).sum();
    let gross_exposure: f64 = holdings.iter().map(|h| h.market_value().abs()).sum();
    let total_cost_basis: f64 = holdings.iter().map(|h| h.cost_basis).sum();
    let beta_weighted_exposure: f64 = holdings.iter().map(|h| h.market_value() * h.beta).sum();

    let weight_of = |value: f64| {
        if gross_exposure > 0.0 {
            value / gross_exposure
        } else {
            0.0
        }
    };

    let exposures: Vec<HoldingExposure> = holdings
        .iter()
        .map(|h| HoldingExposure {
            symbol: h.symbol.clone(),
            market_value: h.market_value(),
            weight: weight_of(h.market_value()),
            beta: h.beta,
            unrealized_pnl: h.market_value() - h.cost_basis,
        })
        .collect();

    let mut concentration = 0.0;
    let mut largest_holding = None;
    for exposure in &exposures {
        if exposure.weight.abs() > concentration {
            concentration = exposure.weight.abs();
            largest_holding = Some(exposure.symbol.clone());
        }
    }

    RiskMetrics {
        total_market_value,
        gross_exposure,
        total_cost_basis,
        unrealized_pnl: total_market_value - total_cost_basis,
        portfolio_beta: weight_of(beta_weighted_exposure),
        beta_weighted_exposure,
        concentration,
        largest_holding,
        exposures,
    }
}
