use std::collections::HashMap;

use crate::config::AvellanedaParams;
use crate::strategies::{clamp_price, Strategy};
use crate::types::{MarketSnapshot, Quote};

/// Avellaneda-Stoikov quoting: center on an inventory-shifted reservation
/// price and quote the model's optimal spread around it.
///
/// With fair value s, inventory q, risk aversion gamma, arrival intensity k,
/// volatility sigma and horizon tau (hours of tau/3600):
///
///   r     = s - q * gamma * sigma^2 * (tau/3600)
///   delta = (gamma * sigma^2 * (tau/3600) + (2/gamma) * ln(1 + gamma/k)) * 100
///
/// The x100 scaling assumes sigma is quoted in percentage terms; the factor
/// is a calibration choice carried from the reference parameters.
pub struct Avellaneda {
    params: AvellanedaParams,
}

impl Avellaneda {
    pub fn new(params: AvellanedaParams) -> Self {
        Self { params }
    }

    fn horizon_s(&self, snap: &MarketSnapshot) -> f64 {
        if self.params.use_time_to_expiry {
            if let Some(tte) = snap.time_to_expiry_s {
                if tte > 0.0 {
                    return tte;
                }
            }
        }
        self.params.fixed_horizon_s
    }
}

impl Strategy for Avellaneda {
    fn name(&self) -> &'static str {
        "avellaneda"
    }

    fn compute_quotes(&self, snap: &MarketSnapshot) -> Option<Quote> {
        if !snap.is_quotable() {
            return None;
        }
        let p = &self.params;

        let tau = self.horizon_s(snap);
        if tau < p.min_time_to_expiry_s {
            return None;
        }
        let tau_h = tau / 3_600.0;

        let s = snap.microprice.unwrap_or(snap.mid);
        let q = snap.net_position.unwrap_or(0) as f64;

        let inventory_term = p.gamma * p.sigma * p.sigma * tau_h;
        let reservation = s - q * inventory_term;

        let delta = ((inventory_term + (2.0 / p.gamma) * (1.0 + p.gamma / p.k).ln()) * 100.0)
            .clamp(p.min_spread, p.max_spread);

        let bid = clamp_price(reservation - delta / 2.0);
        let ask = clamp_price(reservation + delta / 2.0);
        if ask <= bid {
            return None;
        }

        let q_int = snap.net_position.unwrap_or(0);
        let bid_size = if q_int >= p.max_position { 0 } else { p.size };
        let ask_size = if q_int <= -p.max_position { 0 } else { p.size };
        if bid_size == 0 && ask_size == 0 {
            return None;
        }

        Some(Quote {
            bid_price: bid,
            bid_size,
            ask_price: ask,
            ask_size,
        })
    }

    fn update_params(&mut self, params: &HashMap<String, f64>) {
        if let Some(&v) = params.get("gamma") {
            if v > 0.0 {
                self.params.gamma = v;
            }
        }
        if let Some(&v) = params.get("sigma") {
            self.params.sigma = v;
        }
        if let Some(&v) = params.get("k") {
            if v > 0.0 {
                self.params.k = v;
            }
        }
        if let Some(&v) = params.get("size") {
            self.params.size = v as i64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::test_helpers::snapshot;

    fn params() -> AvellanedaParams {
        AvellanedaParams {
            gamma: 0.5,
            sigma: 0.15,
            k: 1.5,
            fixed_horizon_s: 3_600.0,
            use_time_to_expiry: true,
            min_time_to_expiry_s: 300.0,
            max_position: 100,
            size: 10,
            min_spread: 2.0,
            max_spread: 20.0,
        }
    }

    fn snap_with_tte(bid: i64, ask: i64, net: i64, tte: f64) -> MarketSnapshot {
        let mut s = snapshot(bid, ask);
        s.net_position = Some(net);
        s.time_to_expiry_s = Some(tte);
        s
    }

    /// Scenario: gamma=0.5, sigma=0.15, k=1.5, tau=3600s, long 20 contracts,
    /// book 45/55.
    /// Expected: reservation below mid (long inventory leans quotes down),
    /// spread clamped into [2, 20], strict bid < ask inside [1, 99], and the
    /// ask no higher than the flat-inventory ask.
    #[test]
    fn test_long_inventory_leans_down() {
        let strat = Avellaneda::new(params());
        let long = strat.compute_quotes(&snap_with_tte(45, 55, 20, 3_600.0)).unwrap();
        let flat = strat.compute_quotes(&snap_with_tte(45, 55, 0, 3_600.0)).unwrap();

        // r = 50 - 20 * 0.5 * 0.0225 * 1.0 = 49.775
        assert!(long.ask_price <= flat.ask_price, "long ask must not rise");
        assert!(long.bid_price <= flat.bid_price);
        let spread = long.ask_price - long.bid_price;
        assert!((2..=21).contains(&spread), "spread {} outside bounds", spread);
        assert!(long.bid_price >= 1 && long.ask_price <= 99);
        assert!(long.bid_price < long.ask_price);
    }

    /// Scenario: the model spread for these parameters explodes past 20c.
    /// Expected: clamped to max_spread; quotes land at r +/- 10.
    #[test]
    fn test_spread_clamps_to_max() {
        let strat = Avellaneda::new(params());
        let q = strat.compute_quotes(&snap_with_tte(45, 55, 0, 3_600.0)).unwrap();
        // delta unclamped = (0.01125 + 4 ln(4/3)) * 100 ≈ 116 → 20
        assert_eq!(q.ask_price - q.bid_price, 20);
        assert_eq!(q.bid_price, 40);
        assert_eq!(q.ask_price, 60);
    }

    /// Scenario: inventory exactly at +max_position / -max_position.
    /// Expected: the adding side zeroes out, the reducing side stays.
    #[test]
    fn test_position_gates() {
        let strat = Avellaneda::new(params());
        let at_max = strat.compute_quotes(&snap_with_tte(45, 55, 100, 3_600.0)).unwrap();
        assert_eq!(at_max.bid_size, 0);
        assert!(at_max.ask_size > 0);

        let at_min = strat.compute_quotes(&snap_with_tte(45, 55, -100, 3_600.0)).unwrap();
        assert_eq!(at_min.ask_size, 0);
        assert!(at_min.bid_size > 0);
    }

    /// Scenario: market 200s from expiry with the 300s floor.
    /// Expected: no quote near settlement.
    #[test]
    fn test_terminal_floor() {
        let strat = Avellaneda::new(params());
        assert!(strat.compute_quotes(&snap_with_tte(45, 55, 0, 200.0)).is_none());
        assert!(strat.compute_quotes(&snap_with_tte(45, 55, 0, 300.0)).is_some());
    }

    /// Scenario: time_to_expiry disabled in config.
    /// Expected: the fixed horizon is used even when the snapshot carries a
    /// (short) expiry.
    #[test]
    fn test_fixed_horizon_fallback() {
        let mut p = params();
        p.use_time_to_expiry = false;
        let strat = Avellaneda::new(p);
        assert!(strat.compute_quotes(&snap_with_tte(45, 55, 0, 200.0)).is_some());
    }

    /// Scenario: microprice present and skewed away from mid.
    /// Expected: quotes center on the microprice, not the plain mid.
    #[test]
    fn test_microprice_preferred() {
        let strat = Avellaneda::new(params());
        let mut snap = snap_with_tte(45, 55, 0, 3_600.0);
        snap.microprice = Some(53.0);
        let q = strat.compute_quotes(&snap).unwrap();
        assert_eq!(q.bid_price, 43);
        assert_eq!(q.ask_price, 63);
    }

    /// Scenario: unquotable book (spread over 20c).
    /// Expected: no quote regardless of parameters.
    #[test]
    fn test_unquotable_book() {
        let strat = Avellaneda::new(params());
        assert!(strat.compute_quotes(&snap_with_tte(20, 60, 0, 3_600.0)).is_none());
    }
}
