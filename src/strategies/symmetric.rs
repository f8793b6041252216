use std::collections::HashMap;

use crate::config::SymmetricParams;
use crate::strategies::{clamp_price, Strategy};
use crate::types::{MarketSnapshot, Quote};

/// Fixed spread centered on mid, equal size both sides. The baseline
/// everything else is measured against.
pub struct Symmetric {
    params: SymmetricParams,
}

impl Symmetric {
    pub fn new(params: SymmetricParams) -> Self {
        Self { params }
    }
}

impl Strategy for Symmetric {
    fn name(&self) -> &'static str {
        "symmetric"
    }

    fn compute_quotes(&self, snap: &MarketSnapshot) -> Option<Quote> {
        if !snap.is_quotable() {
            return None;
        }
        if let Some(tte) = snap.time_to_expiry_s {
            if tte < self.params.min_tte_s {
                return None;
            }
        }

        let half = self.params.spread_cents as f64 / 2.0;
        let bid = clamp_price(snap.mid - half);
        let ask = clamp_price(snap.mid + half);
        if ask <= bid {
            return None;
        }

        Some(Quote {
            bid_price: bid,
            bid_size: self.params.size,
            ask_price: ask,
            ask_size: self.params.size,
        })
    }

    fn update_params(&mut self, params: &HashMap<String, f64>) {
        if let Some(&v) = params.get("spread_cents") {
            self.params.spread_cents = v as i64;
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

    fn strat() -> Symmetric {
        Symmetric::new(SymmetricParams {
            spread_cents: 4,
            size: 10,
            min_tte_s: 60.0,
        })
    }

    /// Scenario: healthy book, bid 48 / ask 52 (mid 50), spread target 4.
    /// Expected: quote at 48/52 with size 10 per side.
    #[test]
    fn test_centered_quote() {
        let q = strat().compute_quotes(&snapshot(48, 52)).unwrap();
        assert_eq!((q.bid_price, q.ask_price), (48, 52));
        assert_eq!((q.bid_size, q.ask_size), (10, 10));
    }

    /// Scenario: mid=3 with a 10c target spread (low-price boundary).
    /// Expected: bid clamps to 1, ask lands at 8, ordering still strict.
    #[test]
    fn test_low_price_clamp() {
        let mut s = strat();
        s.params.spread_cents = 10;
        let q = s.compute_quotes(&snapshot(2, 4)).unwrap();
        assert_eq!(q.bid_price, 1);
        assert_eq!(q.ask_price, 8);
        assert!(q.bid_price < q.ask_price);
    }

    /// Scenario: book spread wider than 20c.
    /// Expected: not quotable -- no quote.
    #[test]
    fn test_wide_book_not_quotable() {
        assert!(strat().compute_quotes(&snapshot(30, 55)).is_none());
    }

    /// Scenario: crossed/degenerate books.
    /// Expected: no quote when bid >= ask or a touch sits at the boundary.
    #[test]
    fn test_degenerate_books() {
        let s = strat();
        assert!(s.compute_quotes(&snapshot(52, 48)).is_none());
        assert!(s.compute_quotes(&snapshot(50, 50)).is_none());
        let mut snap = snapshot(48, 52);
        snap.best_ask = 99;
        snap.spread = 51;
        assert!(s.compute_quotes(&snap).is_none());
    }

    /// Scenario: market 30s from expiry with a 60s floor.
    /// Expected: terminal rule suppresses the quote.
    #[test]
    fn test_terminal_floor() {
        let mut snap = snapshot(48, 52);
        snap.time_to_expiry_s = Some(30.0);
        assert!(strat().compute_quotes(&snap).is_none());
        snap.time_to_expiry_s = Some(120.0);
        assert!(strat().compute_quotes(&snap).is_some());
    }

    /// Scenario: update_params with new spread and size.
    /// Expected: subsequent quotes reflect the new parameters.
    #[test]
    fn test_update_params() {
        let mut s = strat();
        let mut kv = HashMap::new();
        kv.insert("spread_cents".to_string(), 8.0);
        kv.insert("size".to_string(), 25.0);
        s.update_params(&kv);
        let q = s.compute_quotes(&snapshot(48, 52)).unwrap();
        assert_eq!((q.bid_price, q.ask_price), (46, 54));
        assert_eq!(q.bid_size, 25);
    }
}
