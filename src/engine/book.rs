use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::types::{complement, Side};

/// Deltas that arrive before the first snapshot wait here. Past this point
/// the feed is considered desynced and the book must be rebuilt.
const MAX_BUFFERED_DELTAS: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeltaResult {
    Applied,
    /// Held until a snapshot arrives.
    Buffered,
    /// Buffer overflowed; caller must resubscribe for a fresh snapshot.
    Desync,
}

struct BufferedDelta {
    side: Side,
    price: i64,
    delta: i64,
}

/// Per-market book built from venue snapshots and additive deltas.
///
/// Both sides are bid ladders in venue form: YES bids and NO bids, keyed by
/// price in cents. The ask side is a view: a NO bid at p is a YES ask at
/// 100 - p. Keeping the conversion in the accessors is what stops the
/// complement arithmetic from drifting between call sites.
pub struct OrderBook {
    ticker: String,
    yes_bids: BTreeMap<i64, i64>,
    no_bids: BTreeMap<i64, i64>,
    /// Bumped on every mutation.
    seq: u64,
    last_update_ms: i64,
    synced: bool,
    pending: VecDeque<BufferedDelta>,
}

impl OrderBook {
    pub fn new(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            yes_bids: BTreeMap::new(),
            no_bids: BTreeMap::new(),
            seq: 0,
            last_update_ms: 0,
            synced: false,
            pending: VecDeque::new(),
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Replace both sides atomically. Levels with qty <= 0 are dropped.
    /// Anything buffered is superseded: the snapshot already reflects it.
    pub fn apply_snapshot(
        &mut self,
        yes: Vec<(i64, i64)>,
        no: Vec<(i64, i64)>,
        now_ms: i64,
    ) {
        self.yes_bids = yes.into_iter().filter(|&(_, q)| q > 0).collect();
        self.no_bids = no.into_iter().filter(|&(_, q)| q > 0).collect();
        self.pending.clear();
        self.synced = true;
        self.seq += 1;
        self.last_update_ms = now_ms;
    }

    /// Additive update: new_qty = old_qty + delta; levels at or below zero
    /// are removed.
    pub fn apply_delta(
        &mut self,
        side: Side,
        price: i64,
        delta: i64,
        now_ms: i64,
    ) -> DeltaResult {
        if !self.synced {
            self.pending.push_back(BufferedDelta { side, price, delta });
            if self.pending.len() > MAX_BUFFERED_DELTAS {
                self.invalidate();
                return DeltaResult::Desync;
            }
            return DeltaResult::Buffered;
        }

        let ladder = match side {
            Side::Yes => &mut self.yes_bids,
            Side::No => &mut self.no_bids,
        };
        let qty = ladder.entry(price).or_insert(0);
        *qty += delta;
        if *qty <= 0 {
            ladder.remove(&price);
        }
        self.seq += 1;
        self.last_update_ms = now_ms;
        DeltaResult::Applied
    }

    /// Discard all state; the caller is expected to resubscribe.
    pub fn invalidate(&mut self) {
        self.yes_bids.clear();
        self.no_bids.clear();
        self.pending.clear();
        self.synced = false;
        self.seq += 1;
    }

    // ─── Derived views ───

    /// Best YES bid: (price, qty).
    pub fn best_bid(&self) -> Option<(i64, i64)> {
        self.yes_bids.iter().next_back().map(|(&p, &q)| (p, q))
    }

    /// Best YES ask, derived from the best NO bid: (100 - no_bid, qty).
    pub fn best_ask(&self) -> Option<(i64, i64)> {
        self.no_bids
            .iter()
            .next_back()
            .map(|(&p, &q)| (complement(p), q))
    }

    /// ((bid, bid_qty), (ask, ask_qty)) when both touches exist.
    pub fn bbo(&self) -> Option<((i64, i64), (i64, i64))> {
        Some((self.best_bid()?, self.best_ask()?))
    }

    pub fn mid(&self) -> Option<f64> {
        let ((bid, _), (ask, _)) = self.bbo()?;
        Some((bid + ask) as f64 / 2.0)
    }

    pub fn spread(&self) -> Option<i64> {
        let ((bid, _), (ask, _)) = self.bbo()?;
        Some(ask - bid)
    }

    /// Size-weighted mid: (bid * ask_qty + ask * bid_qty) / (bid_qty + ask_qty).
    pub fn microprice(&self) -> Option<f64> {
        let ((bid, bid_qty), (ask, ask_qty)) = self.bbo()?;
        let total = bid_qty + ask_qty;
        if total <= 0 {
            return None;
        }
        Some((bid * ask_qty + ask * bid_qty) as f64 / total as f64)
    }

    /// Top-n levels per side: bids descending by price, asks ascending.
    pub fn depth(&self, n: usize) -> (Vec<(i64, i64)>, Vec<(i64, i64)>) {
        let bids = self
            .yes_bids
            .iter()
            .rev()
            .take(n)
            .map(|(&p, &q)| (p, q))
            .collect();
        let asks = self
            .no_bids
            .iter()
            .rev()
            .take(n)
            .map(|(&p, &q)| (complement(p), q))
            .collect();
        (bids, asks)
    }

    pub fn total_bid_depth(&self) -> i64 {
        self.yes_bids.values().sum()
    }

    pub fn total_ask_depth(&self) -> i64 {
        self.no_bids.values().sum()
    }

    /// (bid_depth - ask_depth) / (bid_depth + ask_depth); None on an empty book.
    pub fn imbalance(&self) -> Option<f64> {
        let bid = self.total_bid_depth();
        let ask = self.total_ask_depth();
        let total = bid + ask;
        if total <= 0 {
            return None;
        }
        Some((bid - ask) as f64 / total as f64)
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        if self.last_update_ms == 0 {
            i64::MAX
        } else {
            now_ms - self.last_update_ms
        }
    }

    pub fn is_stale(&self, now_ms: i64, max_age_ms: i64) -> bool {
        !self.synced || self.age_ms(now_ms) > max_age_ms
    }
}

/// Ticker → book. Owned exclusively by the quoting task.
#[derive(Default)]
pub struct OrderBookManager {
    books: HashMap<String, OrderBook>,
}

impl OrderBookManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, ticker: &str) -> Option<&OrderBook> {
        self.books.get(ticker)
    }

    pub fn ensure(&mut self, ticker: &str) -> &mut OrderBook {
        self.books
            .entry(ticker.to_string())
            .or_insert_with(|| OrderBook::new(ticker))
    }

    pub fn remove(&mut self, ticker: &str) {
        self.books.remove(ticker);
    }

    pub fn tickers(&self) -> impl Iterator<Item = &String> {
        self.books.keys()
    }
}
