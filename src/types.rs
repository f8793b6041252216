use serde::Serialize;
use tokio::sync::oneshot;

/// Contract prices are integer cents. 0 and 100 do not trade.
pub const PRICE_MIN: i64 = 1;
pub const PRICE_MAX: i64 = 99;

/// YES ask at p is the same order as a NO bid at 100 - p.
#[inline]
pub fn complement(price: i64) -> i64 {
    100 - price
}

// ─── Market primitives ───

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }

}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Buy,
    Sell,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
        }
    }
}

/// Which half of our two-sided quote an order belongs to.
/// Bid = buying YES; Ask = selling YES (placed as a NO buy at the venue).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QuoteSide {
    Bid,
    Ask,
}

impl QuoteSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteSide::Bid => "bid",
            QuoteSide::Ask => "ask",
        }
    }
}

// ─── Fills ───

/// An execution reported by the venue fill channel.
#[derive(Clone, Debug)]
pub struct Fill {
    pub order_id: String,
    pub ticker: String,
    pub side: Side,
    pub action: Action,
    pub count: i64,
    pub price: i64,
    pub ts_ms: i64,
}

// ─── Strategy contract ───

/// Immutable view of one market handed to the strategy each cycle.
#[derive(Clone, Debug)]
pub struct MarketSnapshot {
    pub ticker: String,
    pub best_bid: i64,
    pub best_ask: i64,
    pub bid_size: i64,
    pub ask_size: i64,
    pub mid: f64,
    pub spread: i64,
    pub microprice: Option<f64>,
    pub imbalance: Option<f64>,
    /// Net exposure in contracts (yes - no). None when we hold nothing.
    pub net_position: Option<i64>,
    pub time_to_expiry_s: Option<f64>,
    pub adverse: bool,
}

impl MarketSnapshot {
    /// A book is quotable when both touches exist strictly inside (0, 99),
    /// are properly ordered, and the spread is not absurd.
    pub fn is_quotable(&self) -> bool {
        self.best_bid > 0
            && self.best_bid < PRICE_MAX
            && self.best_ask > 0
            && self.best_ask < PRICE_MAX
            && self.best_bid < self.best_ask
            && self.spread <= 20
    }
}

/// Desired two-sided quote for one market. A size of 0 means
/// "do not quote that side this cycle".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Quote {
    pub bid_price: i64,
    pub bid_size: i64,
    pub ask_price: i64,
    pub ask_size: i64,
}

// ─── Engine events ───

/// Typed events decoded from the venue WebSocket.
#[derive(Clone, Debug)]
pub enum WsEvent {
    Snapshot {
        ticker: String,
        yes: Vec<(i64, i64)>,
        no: Vec<(i64, i64)>,
    },
    Delta {
        ticker: String,
        side: Side,
        price: i64,
        delta: i64,
    },
    /// Venue-computed mark price for a market.
    Mark {
        ticker: String,
        price: i64,
        ts_ms: i64,
    },
    Fill(Fill),
    Connected,
    Disconnected,
}

/// Commands the engine sends to the order gateway task.
#[derive(Clone, Debug)]
pub enum GatewayCmd {
    Place {
        internal_id: u64,
        ticker: String,
        quote_side: QuoteSide,
        /// Quote-space price (YES cents). The gateway converts asks to NO bids.
        price: i64,
        count: i64,
    },
    Cancel {
        internal_id: u64,
        venue_id: String,
        ticker: String,
        quote_side: QuoteSide,
    },
    /// Flatten path: one batched venue call, one ack per entry.
    CancelBatch { items: Vec<CancelRef> },
}

#[derive(Clone, Debug)]
pub struct CancelRef {
    pub internal_id: u64,
    pub venue_id: String,
    pub ticker: String,
    pub quote_side: QuoteSide,
}

/// Resolution of a gateway command, fed back through the engine channel.
#[derive(Clone, Debug)]
pub struct GatewayAck {
    pub internal_id: u64,
    pub ticker: String,
    pub quote_side: QuoteSide,
    pub result: AckResult,
}

#[derive(Clone, Debug)]
pub enum AckResult {
    Placed { venue_id: String },
    PlaceFailed { reason: String, rate_limited: bool },
    Canceled,
    /// Cancel failed and the order is believed still resting.
    CancelFailed { reason: String },
}

/// Operator commands from the control plane. Replies ride oneshot channels
/// so the engine task stays the only owner of the state being read.
pub enum ControlCommand {
    Pause,
    Resume,
    Flatten,
    AddMarket {
        ticker: String,
        /// Replies with the active market count after the add.
        reply: oneshot::Sender<usize>,
    },
    RemoveMarket {
        ticker: String,
        reply: oneshot::Sender<usize>,
    },
    GetState(oneshot::Sender<StateSnapshot>),
    GetMetrics(oneshot::Sender<MetricsSnapshot>),
    Shutdown,
}

/// Everything the engine task consumes, in producer order.
pub enum EngineEvent {
    Ws(WsEvent),
    Gateway(GatewayAck),
    Command(ControlCommand),
    Tick,
}

// ─── Control-plane views ───

#[derive(Clone, Debug, Serialize)]
pub struct PnlView {
    #[serde(rename = "realizedToday")]
    pub realized_today: f64,
    #[serde(rename = "fillsToday")]
    pub fills_today: u64,
    #[serde(rename = "volumeToday")]
    pub volume_today: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct RiskView {
    #[serde(rename = "totalExposure")]
    pub total_exposure: i64,
    #[serde(rename = "utilizationPercent")]
    pub utilization_percent: f64,
    #[serde(rename = "dailyPnL")]
    pub daily_pnl: f64,
    pub halted: bool,
    #[serde(rename = "haltReason")]
    pub halt_reason: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DrawdownView {
    pub drawdown: f64,
    #[serde(rename = "positionMultiplier")]
    pub position_multiplier: f64,
    pub peak: f64,
    pub current: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CircuitBreakerView {
    #[serde(rename = "isTriggered")]
    pub is_triggered: bool,
    pub reason: Option<String>,
    #[serde(rename = "consecutiveLosses")]
    pub consecutive_losses: u32,
    #[serde(rename = "cooldownEndsAt")]
    pub cooldown_ends_at: Option<i64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PositionView {
    pub ticker: String,
    #[serde(rename = "yesContracts")]
    pub yes_contracts: i64,
    #[serde(rename = "noContracts")]
    pub no_contracts: i64,
    #[serde(rename = "netExposure")]
    pub net_exposure: i64,
    #[serde(rename = "costBasis")]
    pub cost_basis: f64,
    #[serde(rename = "unrealizedPnl")]
    pub unrealized_pnl: f64,
}

/// Reply to GET /state.
#[derive(Clone, Debug, Serialize)]
pub struct StateSnapshot {
    pub paused: bool,
    pub halted: bool,
    pub running: bool,
    pub connected: bool,
    pub connection: &'static str,
    #[serde(rename = "rateLimited")]
    pub rate_limited: bool,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
    pub pnl: PnlView,
    pub risk: RiskView,
    pub drawdown: DrawdownView,
    #[serde(rename = "circuitBreaker")]
    pub circuit_breaker: CircuitBreakerView,
    pub positions: Vec<PositionView>,
}

/// Reply to GET /metrics.
#[derive(Clone, Debug, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_s: u64,
    pub fills_today: u64,
    pub volume_today: u64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub active_orders: usize,
    pub latency_p50: f64,
    pub latency_p95: f64,
    pub active_markets: usize,
}

// ─── Telemetry events ───

pub enum TelemetryEvent {
    OrderSent(OrderRecord),
    Fill(FillRecord),
    Risk(RiskRecord),
    Latency(LatencyRecord),
}

pub struct OrderRecord {
    pub ts_ms: i64,
    pub internal_id: u64,
    pub ticker: String,
    pub quote_side: QuoteSide,
    pub price: i64,
    pub count: i64,
}

pub struct FillRecord {
    pub ts_ms: i64,
    pub order_id: String,
    pub ticker: String,
    pub side: Side,
    pub action: Action,
    pub count: i64,
    pub price: i64,
    pub realized_pnl: f64,
}

pub struct RiskRecord {
    pub ts_ms: i64,
    pub event: &'static str,
    pub detail: String,
}

pub struct LatencyRecord {
    pub ts_ms: i64,
    pub event: &'static str,
    pub latency_us: u64,
}
