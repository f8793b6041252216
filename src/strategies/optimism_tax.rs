use std::collections::HashMap;

use crate::config::ZoneParams;
use crate::strategies::{clamp_price, Strategy};
use crate::types::{MarketSnapshot, Quote};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Zone {
    Longshot,
    Middle,
    NearlyCertain,
}

/// Zone-aware sizing that leans against the longshot bias: retail overpays
/// for cheap YES contracts and underpays for nearly-certain ones, so sell
/// harder into the low zone and buy harder into the high zone.
pub struct OptimismTax {
    params: ZoneParams,
}

impl OptimismTax {
    pub fn new(params: ZoneParams) -> Self {
        Self { params }
    }

    fn zone(&self, best_bid: i64) -> Zone {
        if best_bid <= self.params.longshot_threshold {
            Zone::Longshot
        } else if best_bid >= self.params.nearly_certain_threshold {
            Zone::NearlyCertain
        } else {
            Zone::Middle
        }
    }
}

impl Strategy for OptimismTax {
    fn name(&self) -> &'static str {
        "optimism-tax"
    }

    fn compute_quotes(&self, snap: &MarketSnapshot) -> Option<Quote> {
        if !snap.is_quotable() {
            return None;
        }
        let p = &self.params;
        if let Some(tte) = snap.time_to_expiry_s {
            if tte < p.min_tte_s {
                return None;
            }
        }

        // Adverse flow: widen, or stand down if already at the cap.
        let mut spread = p.spread_cents;
        if snap.adverse {
            spread += p.adverse_widen_cents;
            if spread > p.max_spread {
                return None;
            }
        }

        let half = spread as f64 / 2.0;
        let bid = clamp_price(snap.mid - half);
        let ask = clamp_price(snap.mid + half);
        if ask <= bid {
            return None;
        }

        let base = p.size as f64;
        let boosted = (base * p.zone_size_mult).ceil() as i64;
        let trimmed = (base * 0.5).floor() as i64;

        let zone = self.zone(snap.best_bid);
        let (mut bid_size, ask_size) = match zone {
            // Sell the overpriced longshot, keep the bid small.
            Zone::Longshot => (trimmed, boosted),
            // Buy the cheap near-certain side, keep the ask small.
            Zone::NearlyCertain => (boosted, trimmed),
            Zone::Middle => (p.size, p.size),
        };

        // Longshot exposure cap: once loaded up, only flatten via asks.
        if zone == Zone::Longshot {
            if let Some(net) = snap.net_position {
                if net >= p.longshot_cap {
                    bid_size = 0;
                }
            }
        }

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
        if let Some(&v) = params.get("size") {
            self.params.size = v as i64;
        }
        if let Some(&v) = params.get("zone_size_mult") {
            self.params.zone_size_mult = v;
        }
        if let Some(&v) = params.get("spread_cents") {
            self.params.spread_cents = v as i64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::test_helpers::snapshot;

    fn strat() -> OptimismTax {
        OptimismTax::new(ZoneParams {
            longshot_threshold: 15,
            nearly_certain_threshold: 85,
            size: 10,
            zone_size_mult: 1.5,
            spread_cents: 4,
            max_spread: 20,
            adverse_widen_cents: 2,
            longshot_cap: 50,
            min_tte_s: 60.0,
        })
    }

    /// Scenario: best bid 10c -- deep in the longshot zone.
    /// Expected: ask side boosted to ceil(10 * 1.5) = 15, bid trimmed to 5.
    #[test]
    fn test_longshot_sells_harder() {
        let q = strat().compute_quotes(&snapshot(10, 14)).unwrap();
        assert_eq!(q.ask_size, 15);
        assert_eq!(q.bid_size, 5);
    }

    /// Scenario: best bid 90c -- nearly-certain zone.
    /// Expected: bid boosted to 15, ask trimmed to 5.
    #[test]
    fn test_nearly_certain_buys_harder() {
        let q = strat().compute_quotes(&snapshot(90, 94)).unwrap();
        assert_eq!(q.bid_size, 15);
        assert_eq!(q.ask_size, 5);
    }

    /// Scenario: mid-band market at 48/52.
    /// Expected: symmetric sizes and the plain centered spread.
    #[test]
    fn test_middle_band_symmetric() {
        let q = strat().compute_quotes(&snapshot(48, 52)).unwrap();
        assert_eq!((q.bid_size, q.ask_size), (10, 10));
        assert_eq!((q.bid_price, q.ask_price), (48, 52));
    }

    /// Scenario: adverse flag on a mid-band market.
    /// Expected: the effective spread widens by the configured cents.
    #[test]
    fn test_adverse_widens() {
        let mut snap = snapshot(48, 52);
        snap.adverse = true;
        let q = strat().compute_quotes(&snap).unwrap();
        assert_eq!((q.bid_price, q.ask_price), (47, 53));
    }

    /// Scenario: adverse flag with the spread already at the cap.
    /// Expected: stand down entirely rather than quote wider than allowed.
    #[test]
    fn test_adverse_at_cap_stands_down() {
        let mut s = strat();
        s.params.spread_cents = 20;
        let mut snap = snapshot(40, 60);
        snap.spread = 20;
        snap.adverse = true;
        assert!(s.compute_quotes(&snap).is_none());
    }

    /// Scenario: longshot zone with net exposure at the zone cap.
    /// Expected: bid side zeroed -- position can only flatten via asks.
    #[test]
    fn test_longshot_cap_blocks_bid() {
        let mut snap = snapshot(10, 14);
        snap.net_position = Some(50);
        let q = strat().compute_quotes(&snap).unwrap();
        assert_eq!(q.bid_size, 0);
        assert!(q.ask_size > 0);
    }

    /// Scenario: same exposure in the middle band.
    /// Expected: the longshot cap does not apply outside its zone.
    #[test]
    fn test_cap_only_in_longshot_zone() {
        let mut snap = snapshot(48, 52);
        snap.net_position = Some(50);
        let q = strat().compute_quotes(&snap).unwrap();
        assert_eq!(q.bid_size, 10);
    }

    /// Scenario: market 30s from expiry with a 60s floor.
    /// Expected: terminal rule suppresses the quote.
    #[test]
    fn test_terminal_floor() {
        let mut snap = snapshot(48, 52);
        snap.time_to_expiry_s = Some(30.0);
        assert!(strat().compute_quotes(&snap).is_none());
    }
}
