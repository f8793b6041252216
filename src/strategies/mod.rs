pub mod avellaneda;
pub mod optimism_tax;
pub mod symmetric;
#[cfg(test)]
pub mod test_helpers;

use std::collections::HashMap;

use crate::config::StrategyConfig;
use crate::types::{Fill, MarketSnapshot, Quote, PRICE_MAX, PRICE_MIN};

/// A strategy is a pure function from a market snapshot to at most one
/// desired quote. The same code runs against the live engine and the mock
/// venue in tests.
pub trait Strategy: Send {
    fn name(&self) -> &'static str;

    /// Zero or one desired quote for this market this cycle.
    fn compute_quotes(&self, snap: &MarketSnapshot) -> Option<Quote>;

    /// Optional fill feedback.
    fn on_fill(&mut self, _fill: &Fill) {}

    /// Optional live re-parameterization.
    fn update_params(&mut self, _params: &HashMap<String, f64>) {}
}

/// One instance is shared across all quoted markets.
pub fn build_strategy(cfg: &StrategyConfig) -> Box<dyn Strategy> {
    match cfg {
        StrategyConfig::Symmetric(p) => Box::new(symmetric::Symmetric::new(p.clone())),
        StrategyConfig::Avellaneda(p) => Box::new(avellaneda::Avellaneda::new(p.clone())),
        StrategyConfig::OptimismTax(p) => Box::new(optimism_tax::OptimismTax::new(p.clone())),
    }
}

/// Round a computed price and clamp it into the tradable [1, 99] range.
#[inline]
pub fn clamp_price(p: f64) -> i64 {
    (p.round() as i64).clamp(PRICE_MIN, PRICE_MAX)
}
