// Shared fixtures for strategy and engine tests. Compiled only under test.

use crate::types::MarketSnapshot;

/// Healthy snapshot with the given touch, 100 contracts per side, no
/// position, no expiry, not adverse.
pub fn snapshot(best_bid: i64, best_ask: i64) -> MarketSnapshot {
    MarketSnapshot {
        ticker: "KXTEST-26DEC31".to_string(),
        best_bid,
        best_ask,
        bid_size: 100,
        ask_size: 100,
        mid: (best_bid + best_ask) as f64 / 2.0,
        spread: best_ask - best_bid,
        microprice: None,
        imbalance: None,
        net_position: None,
        time_to_expiry_s: None,
        adverse: false,
    }
}
