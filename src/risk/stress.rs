use super::types::{HoldingImpact, PricedHolding, StressResult, StressScenario};

fn percent_change(base: f64, delta: f64) -> f64 {
    if base == 0.0 {
        0.0
    } else {
        delta / base.abs() * 100.0
    }
}

/// Fractional price change a scenario applies to one holding.
pub fn holding_shock(holding: &PricedHolding, scenario: &StressScenario) -> f64 {
    let price_shock = match scenario.symbol_shocks.get(&holding.symbol) {
        Some(shock) => *shock,
        None if scenario.beta_adjusted => scenario.market_shock * holding.beta,
        None => scenario.market_shock,
    };
    price_shock - holding.rate_sensitivity * scenario.rate_shock
}

/// Evaluate one scenario against the unmodified holdings.
/// Linear model: `new_price = price * (1 + shock)`, floored at zero.
pub fn apply_scenario(
    holdings: &[PricedHolding],
    scenario: &StressScenario,
    top_k: usize,
) -> StressResult {
    let mut impacts: Vec<HoldingImpact> = holdings
        .iter()
        .map(|h| {
            let stressed_price = (h.price * (1.0 + holding_shock(h, scenario))).max(0.0);
            let base_value = h.market_value();
            let stressed_value = h.quantity * stressed_price;
            let value_delta = stressed_value - base_value;
            HoldingImpact {
                symbol: h.symbol.clone(),
                base_value,
                stressed_value,
                value_delta,
                delta_percent: percent_change(base_value, value_delta),
            }
        })
        .collect();

    let base_value: f64 = impacts.iter().map(|i| i.base_value).sum();
    let stressed_value: f64 = impacts.iter().map(|i| i.stressed_value).sum();
    let value_delta = stressed_value - base_value;

    impacts.sort_by(|a, b| {
        a.value_delta
            .total_cmp(&b.value_delta)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    impacts.truncate(top_k);

    StressResult {
        scenario: scenario.name.clone(),
        base_value,
        stressed_value,
        value_delta,
        delta_percent: percent_change(base_value, value_delta),
        worst_holdings: impacts,
    }
}

/// Run every scenario independently; results follow scenario order.
pub fn run_stress_test(
    holdings: &[PricedHolding],
    scenarios: &[StressScenario],
    top_k: usize,
) -> Vec<StressResult> {
    scenarios
        .iter()
        .map(|scenario| {
            let result = apply_scenario(holdings, scenario, top_k);
            tracing::debug!(
                scenario = %result.scenario,
                delta = result.value_delta,
                delta_percent = result.delta_percent,
                "Stress scenario evaluated"
            );
            result
        })
        .collect()
}
