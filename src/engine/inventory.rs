use std::collections::HashMap;

use thiserror::Error;

use crate::types::{Action, Fill, PositionView, Side};

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("negative {side} contract count {count} for {ticker}")]
    NegativeContracts {
        ticker: String,
        side: Side,
        count: i64,
    },
    #[error("non-finite cost basis for {ticker}")]
    InvalidCostBasis { ticker: String },
}

/// Per-market holdings. Counts are signed so the short-cover arithmetic is
/// always defined; the venue should never actually hand us a short, and the
/// engine halts if one shows up (see `InventoryTracker::validate`).
///
/// Cost bases are cents paid for longs and cents received for shorts. They
/// reset to zero only when the matching contract count reaches zero.
#[derive(Clone, Debug, Default)]
pub struct Position {
    pub yes_contracts: i64,
    pub no_contracts: i64,
    pub yes_cost_basis: f64,
    pub no_cost_basis: f64,
}

impl Position {
    #[inline]
    pub fn net_exposure(&self) -> i64 {
        self.yes_contracts - self.no_contracts
    }

    #[inline]
    pub fn total_cost_basis(&self) -> f64 {
        self.yes_cost_basis + self.no_cost_basis
    }

    #[inline]
    pub fn is_flat(&self) -> bool {
        self.yes_contracts == 0 && self.no_contracts == 0
    }

    /// Apply one fill to the side it names. Returns realized PnL in cents.
    fn apply(&mut self, side: Side, action: Action, count: i64, price: i64) -> f64 {
        let (contracts, basis) = match side {
            Side::Yes => (&mut self.yes_contracts, &mut self.yes_cost_basis),
            Side::No => (&mut self.no_contracts, &mut self.no_cost_basis),
        };

        let c = *contracts;
        let mut realized = 0.0;

        match action {
            Action::Buy if c >= 0 => {
                // Adding to flat/long.
                *basis += (count * price) as f64;
            }
            Action::Buy => {
                // Covering a short; basis holds proceeds received.
                let avg_short = *basis / (-c) as f64;
                let close = count.min(-c);
                let open = count - close;
                realized = close as f64 * (avg_short - price as f64);
                *basis -= close as f64 * avg_short;
                *basis += (open * price) as f64;
            }
            Action::Sell if c <= 0 => {
                // Opening/extending a short: proceeds become basis to unwind.
                *basis += (count * price) as f64;
            }
            Action::Sell => {
                // Closing a long; overflow flips short at the fill price.
                let avg_long = *basis / c as f64;
                let close = count.min(c);
                let over = count - close;
                realized = close as f64 * (price as f64 - avg_long);
                *basis -= close as f64 * avg_long;
                *basis += (over * price) as f64;
            }
        }

        match action {
            Action::Buy => *contracts += count,
            Action::Sell => *contracts -= count,
        }
        if *contracts == 0 {
            *basis = 0.0;
        }
        realized
    }
}

/// Per-market positions plus process-level PnL counters. Owned exclusively
/// by the quoting task; the control plane reads cloned views.
#[derive(Default)]
pub struct InventoryTracker {
    positions: HashMap<String, Position>,
    marks: HashMap<String, i64>,
    realized_total: f64,
    realized_today: f64,
    fills_today: u64,
    volume_today: u64,
}

impl InventoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a fill and return its realized PnL in cents.
    pub fn on_fill(&mut self, fill: &Fill) -> f64 {
        let pos = self.positions.entry(fill.ticker.clone()).or_default();
        let realized = pos.apply(fill.side, fill.action, fill.count, fill.price);
        self.realized_total += realized;
        self.realized_today += realized;
        self.fills_today += 1;
        self.volume_today += fill.count as u64;
        realized
    }

    /// Seed a position from the venue portfolio at startup. The venue reports
    /// one aggregate cost figure, split proportionally between the YES and NO
    /// bases by contract count.
    pub fn initialize_from_portfolio(
        &mut self,
        ticker: &str,
        yes_contracts: i64,
        no_contracts: i64,
        total_cost_cents: f64,
    ) {
        let total = yes_contracts + no_contracts;
        let (yes_cb, no_cb) = if total > 0 {
            let yes_share = total_cost_cents * yes_contracts as f64 / total as f64;
            (yes_share, total_cost_cents - yes_share)
        } else {
            (0.0, 0.0)
        };
        self.positions.insert(
            ticker.to_string(),
            Position {
                yes_contracts,
                no_contracts,
                yes_cost_basis: yes_cb,
                no_cost_basis: no_cb,
            },
        );
    }

    pub fn set_mark(&mut self, ticker: &str, price: i64) {
        self.marks.insert(ticker.to_string(), price);
    }

    pub fn mark(&self, ticker: &str) -> Option<i64> {
        self.marks.get(ticker).copied()
    }

    pub fn position(&self, ticker: &str) -> Option<&Position> {
        self.positions.get(ticker)
    }

    pub fn remove(&mut self, ticker: &str) {
        self.positions.remove(ticker);
        self.marks.remove(ticker);
    }

    /// Mark-to-market value minus cost basis, per ticker. A flat net
    /// exposure contributes nothing regardless of boxed contracts.
    pub fn unrealized_for(&self, ticker: &str) -> f64 {
        let Some(pos) = self.positions.get(ticker) else {
            return 0.0;
        };
        if pos.net_exposure() == 0 {
            return 0.0;
        }
        let Some(&mark) = self.marks.get(ticker) else {
            return 0.0;
        };
        let value = pos.yes_contracts as f64 * mark as f64
            + pos.no_contracts as f64 * (100 - mark) as f64;
        value - pos.total_cost_basis()
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.positions
            .keys()
            .map(|t| self.unrealized_for(t))
            .sum()
    }

    /// Sum of absolute net exposures, in contracts.
    pub fn total_exposure(&self) -> i64 {
        self.positions
            .values()
            .map(|p| p.net_exposure().abs())
            .sum()
    }

    pub fn realized_total(&self) -> f64 {
        self.realized_total
    }

    pub fn realized_today(&self) -> f64 {
        self.realized_today
    }

    pub fn fills_today(&self) -> u64 {
        self.fills_today
    }

    pub fn volume_today(&self) -> u64 {
        self.volume_today
    }

    pub fn reset_daily(&mut self) {
        self.realized_today = 0.0;
        self.fills_today = 0;
        self.volume_today = 0;
    }

    /// Invariant check run after every fill. A violation is fatal upstream.
    pub fn validate(&self) -> Result<(), InventoryError> {
        for (ticker, pos) in &self.positions {
            if pos.yes_contracts < 0 {
                return Err(InventoryError::NegativeContracts {
                    ticker: ticker.clone(),
                    side: Side::Yes,
                    count: pos.yes_contracts,
                });
            }
            if pos.no_contracts < 0 {
                return Err(InventoryError::NegativeContracts {
                    ticker: ticker.clone(),
                    side: Side::No,
                    count: pos.no_contracts,
                });
            }
            if !pos.yes_cost_basis.is_finite() || !pos.no_cost_basis.is_finite() {
                return Err(InventoryError::InvalidCostBasis {
                    ticker: ticker.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn views(&self) -> Vec<PositionView> {
        let mut out: Vec<PositionView> = self
            .positions
            .iter()
            .map(|(ticker, pos)| PositionView {
                ticker: ticker.clone(),
                yes_contracts: pos.yes_contracts,
                no_contracts: pos.no_contracts,
                net_exposure: pos.net_exposure(),
                cost_basis: pos.total_cost_basis(),
                unrealized_pnl: self.unrealized_for(ticker),
            })
            .collect();
        out.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(ticker: &str, side: Side, action: Action, count: i64, price: i64) -> Fill {
        Fill {
            order_id: "ord".into(),
            ticker: ticker.into(),
            side,
            action,
            count,
            price,
            ts_ms: 0,
        }
    }

    // ── first-averaging arithmetic ──

    /// Scenario: BUY 10 YES @ 50, then SELL 5 YES @ 55.
    /// Expected: yes_contracts=5, yes_cost_basis=250, realized=+25,
    /// fills_today=2, volume_today=15.
    #[test]
    fn test_inventory_roundtrip() {
        let mut inv = InventoryTracker::new();
        assert_eq!(inv.on_fill(&fill("T", Side::Yes, Action::Buy, 10, 50)), 0.0);
        let realized = inv.on_fill(&fill("T", Side::Yes, Action::Sell, 5, 55));
        assert!((realized - 25.0).abs() < 1e-9, "realized {}", realized);

        let pos = inv.position("T").unwrap();
        assert_eq!(pos.yes_contracts, 5);
        assert!((pos.yes_cost_basis - 250.0).abs() < 1e-9);
        assert!((inv.realized_total() - 25.0).abs() < 1e-9);
        assert_eq!(inv.fills_today(), 2);
        assert_eq!(inv.volume_today(), 15);
    }

    /// Scenario: two buys at different prices, then a full close.
    /// Expected: realized uses the blended average cost; the basis resets to
    /// exactly zero when the count reaches zero.
    #[test]
    fn test_average_cost_close() {
        let mut inv = InventoryTracker::new();
        inv.on_fill(&fill("T", Side::Yes, Action::Buy, 10, 40));
        inv.on_fill(&fill("T", Side::Yes, Action::Buy, 10, 50));
        // avg = 45; close 20 @ 60 → 20 * 15 = 300
        let realized = inv.on_fill(&fill("T", Side::Yes, Action::Sell, 20, 60));
        assert!((realized - 300.0).abs() < 1e-9);
        let pos = inv.position("T").unwrap();
        assert_eq!(pos.yes_contracts, 0);
        assert_eq!(pos.yes_cost_basis, 0.0);
    }

    /// Scenario: short 10 NO @ 60 (sell from flat), cover 10 @ 45.
    /// Expected: basis carries the proceeds; cover realizes 10 * (60 - 45).
    #[test]
    fn test_short_cover() {
        let mut inv = InventoryTracker::new();
        inv.on_fill(&fill("T", Side::No, Action::Sell, 10, 60));
        let pos = inv.position("T").unwrap();
        assert_eq!(pos.no_contracts, -10);
        assert!((pos.no_cost_basis - 600.0).abs() < 1e-9);

        let realized = inv.on_fill(&fill("T", Side::No, Action::Buy, 10, 45));
        assert!((realized - 150.0).abs() < 1e-9, "realized {}", realized);
        let pos = inv.position("T").unwrap();
        assert_eq!(pos.no_contracts, 0);
        assert_eq!(pos.no_cost_basis, 0.0);
    }

    /// Scenario: long 5 YES @ 50, sell 8 @ 55 (overfill flips short by 3).
    /// Expected: realized on the 5 closed, remaining basis = 3 * 55 in
    /// short proceeds, count = -3.
    #[test]
    fn test_sell_overflow_flips_short() {
        let mut inv = InventoryTracker::new();
        inv.on_fill(&fill("T", Side::Yes, Action::Buy, 5, 50));
        let realized = inv.on_fill(&fill("T", Side::Yes, Action::Sell, 8, 55));
        assert!((realized - 25.0).abs() < 1e-9);
        let pos = inv.position("T").unwrap();
        assert_eq!(pos.yes_contracts, -3);
        assert!((pos.yes_cost_basis - 165.0).abs() < 1e-9);
        assert!(inv.validate().is_err(), "short position must flag");
    }

    /// Scenario: buy 12 while short 4 (cover 4, open 8 long).
    /// Expected: realized on the covered 4; leftover 8 open at the fill price.
    #[test]
    fn test_cover_overflow_flips_long() {
        let mut inv = InventoryTracker::new();
        inv.on_fill(&fill("T", Side::Yes, Action::Sell, 4, 60));
        let realized = inv.on_fill(&fill("T", Side::Yes, Action::Buy, 12, 50));
        // cover: 4 * (60 - 50) = 40
        assert!((realized - 40.0).abs() < 1e-9);
        let pos = inv.position("T").unwrap();
        assert_eq!(pos.yes_contracts, 8);
        assert!((pos.yes_cost_basis - 400.0).abs() < 1e-9);
    }

    /// Scenario: the same fill sequence replayed onto a fresh tracker.
    /// Expected: identical position state and realized PnL (determinism).
    #[test]
    fn test_replay_determinism() {
        let fills = vec![
            fill("T", Side::Yes, Action::Buy, 10, 42),
            fill("T", Side::No, Action::Buy, 6, 55),
            fill("T", Side::Yes, Action::Sell, 4, 47),
            fill("T", Side::No, Action::Sell, 6, 58),
            fill("T", Side::Yes, Action::Buy, 2, 45),
        ];
        let run = |fills: &[Fill]| {
            let mut inv = InventoryTracker::new();
            for f in fills {
                inv.on_fill(f);
            }
            let p = inv.position("T").unwrap().clone();
            (p, inv.realized_total())
        };
        let (p1, r1) = run(&fills);
        let (p2, r2) = run(&fills);
        assert_eq!(p1.yes_contracts, p2.yes_contracts);
        assert_eq!(p1.no_contracts, p2.no_contracts);
        assert!((p1.total_cost_basis() - p2.total_cost_basis()).abs() < 1e-9);
        assert!((r1 - r2).abs() < 1e-9);
    }

    /// Scenario: arbitrary mixed fills.
    /// Expected: total_cost_basis is always the sum of the two side bases.
    #[test]
    fn test_cost_basis_sum_invariant() {
        let mut inv = InventoryTracker::new();
        for f in [
            fill("T", Side::Yes, Action::Buy, 7, 33),
            fill("T", Side::No, Action::Buy, 9, 61),
            fill("T", Side::Yes, Action::Sell, 3, 38),
        ] {
            inv.on_fill(&f);
            let pos = inv.position("T").unwrap();
            assert!(
                (pos.total_cost_basis() - (pos.yes_cost_basis + pos.no_cost_basis)).abs() < 1e-12
            );
            assert!(pos.total_cost_basis().is_finite());
        }
    }

    // ── unrealized PnL ──

    /// Scenario: 10 YES at basis 400, mark 55.
    /// Expected: unrealized = 10 * 55 - 400 = 150.
    #[test]
    fn test_unrealized_long_yes() {
        let mut inv = InventoryTracker::new();
        inv.on_fill(&fill("T", Side::Yes, Action::Buy, 10, 40));
        inv.set_mark("T", 55);
        assert!((inv.unrealized_for("T") - 150.0).abs() < 1e-9);
    }

    /// Scenario: boxed position (5 YES + 5 NO), any mark.
    /// Expected: net exposure 0 → unrealized contribution forced to 0.
    #[test]
    fn test_unrealized_zero_when_flat() {
        let mut inv = InventoryTracker::new();
        inv.on_fill(&fill("T", Side::Yes, Action::Buy, 5, 40));
        inv.on_fill(&fill("T", Side::No, Action::Buy, 5, 70));
        inv.set_mark("T", 80);
        assert_eq!(inv.position("T").unwrap().net_exposure(), 0);
        assert_eq!(inv.unrealized_for("T"), 0.0);
    }

    /// Scenario: no mark received yet for a held position.
    /// Expected: unrealized contribution is 0 until a mark arrives.
    #[test]
    fn test_unrealized_requires_mark() {
        let mut inv = InventoryTracker::new();
        inv.on_fill(&fill("T", Side::Yes, Action::Buy, 10, 40));
        assert_eq!(inv.unrealized_for("T"), 0.0);
    }

    // ── portfolio seed / daily reset ──

    /// Scenario: venue portfolio reports 6 YES + 2 NO with 400c total cost.
    /// Expected: cost splits 300/100 proportionally by contract count.
    #[test]
    fn test_portfolio_proportional_split() {
        let mut inv = InventoryTracker::new();
        inv.initialize_from_portfolio("T", 6, 2, 400.0);
        let pos = inv.position("T").unwrap();
        assert!((pos.yes_cost_basis - 300.0).abs() < 1e-9);
        assert!((pos.no_cost_basis - 100.0).abs() < 1e-9);
        assert_eq!(pos.net_exposure(), 4);
    }

    /// Scenario: fills accumulate, then the daily reset fires.
    /// Expected: today-counters clear, lifetime realized PnL survives.
    #[test]
    fn test_daily_reset() {
        let mut inv = InventoryTracker::new();
        inv.on_fill(&fill("T", Side::Yes, Action::Buy, 10, 50));
        inv.on_fill(&fill("T", Side::Yes, Action::Sell, 10, 56));
        assert_eq!(inv.fills_today(), 2);
        inv.reset_daily();
        assert_eq!(inv.fills_today(), 0);
        assert_eq!(inv.volume_today(), 0);
        assert_eq!(inv.realized_today(), 0.0);
        assert!((inv.realized_total() - 60.0).abs() < 1e-9);
    }

    /// Scenario: exposures of +4 and -7 across two markets.
    /// Expected: total_exposure sums absolute values (11).
    #[test]
    fn test_total_exposure() {
        let mut inv = InventoryTracker::new();
        inv.initialize_from_portfolio("A", 4, 0, 200.0);
        inv.initialize_from_portfolio("B", 0, 7, 350.0);
        assert_eq!(inv.total_exposure(), 11);
    }
}
