use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::types::Side;

// ─── WebSocket commands ───

#[derive(Debug, Serialize)]
pub struct SubscribeCmd {
    pub id: i32,
    pub cmd: &'static str,
    pub params: SubscribeParams,
}

#[derive(Debug, Serialize)]
pub struct SubscribeParams {
    pub channels: Vec<&'static str>,
    pub market_tickers: Vec<String>,
}

impl SubscribeCmd {
    pub fn subscribe(id: i32, tickers: Vec<String>) -> Self {
        Self {
            id,
            cmd: "subscribe",
            params: SubscribeParams {
                channels: vec!["orderbook_delta", "ticker", "fill"],
                market_tickers: tickers,
            },
        }
    }
}

// ─── WebSocket messages ───

#[derive(Debug, Deserialize)]
pub struct WsMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub sid: Option<i32>,
    pub seq: Option<i64>,
    pub msg: Option<WsMessageBody>,
}

/// Union of the message bodies we subscribe to. Snapshot levels arrive as
/// [[price_cents, quantity], ...]; deltas as a single signed change.
#[derive(Debug, Default, Deserialize)]
pub struct WsMessageBody {
    pub market_ticker: Option<String>,
    // orderbook_snapshot
    pub yes: Option<Vec<[i64; 2]>>,
    pub no: Option<Vec<[i64; 2]>>,
    // orderbook_delta
    pub price: Option<i64>,
    pub delta: Option<i64>,
    pub side: Option<String>,
    // ticker
    pub yes_bid: Option<i64>,
    pub yes_ask: Option<i64>,
    pub last_price: Option<i64>,
    pub ts: Option<i64>,
    // fill
    pub order_id: Option<String>,
    pub action: Option<String>,
    pub count: Option<i64>,
    pub yes_price: Option<i64>,
    pub no_price: Option<i64>,
}

// ─── Orders ───

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderAction {
    Buy,
    Sell,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Yes,
    No,
}

impl From<Side> for OrderSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Yes => OrderSide::Yes,
            Side::No => OrderSide::No,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueOrderStatus {
    Resting,
    Executed,
    Canceled,
    Pending,
    #[serde(other)]
    Unknown,
}

/// Body for POST /portfolio/orders. Prices go in the side-specific field.
#[derive(Clone, Debug, Serialize)]
pub struct CreateOrderRequest {
    pub ticker: String,
    pub action: OrderAction,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yes_price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_price: Option<i64>,
    pub client_order_id: String,
}

impl CreateOrderRequest {
    pub fn limit_buy(ticker: &str, side: OrderSide, price_cents: i64, count: i64) -> Self {
        let (yes_price, no_price) = match side {
            OrderSide::Yes => (Some(price_cents), None),
            OrderSide::No => (None, Some(price_cents)),
        };
        Self {
            ticker: ticker.to_string(),
            action: OrderAction::Buy,
            side,
            order_type: OrderType::Limit,
            count,
            yes_price,
            no_price,
            client_order_id: generate_client_order_id(),
        }
    }
}

/// Timestamp + counter keeps ids unique without pulling in a uuid crate.
pub fn generate_client_order_id() -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("mm_{}_{}", chrono::Utc::now().timestamp_millis(), n)
}

#[derive(Clone, Debug, Deserialize)]
pub struct VenueOrder {
    pub order_id: String,
    pub ticker: String,
    pub status: VenueOrderStatus,
    #[serde(default)]
    pub remaining_count: Option<i64>,
    #[serde(default)]
    pub client_order_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OrderResponse {
    pub order: VenueOrder,
}

#[derive(Clone, Debug, Serialize)]
pub struct BatchCancelRequest {
    pub ids: Vec<String>,
}

// ─── Portfolio ───

#[derive(Clone, Debug, Deserialize)]
pub struct MarketPosition {
    pub ticker: String,
    /// Signed contract count: positive = YES, negative = NO.
    #[serde(default)]
    pub position: i64,
    /// Aggregate cost of the open position, in cents.
    #[serde(default)]
    pub market_exposure: i64,
    #[serde(default)]
    pub realized_pnl: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PositionsResponse {
    #[serde(default)]
    pub market_positions: Vec<MarketPosition>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BalanceResponse {
    #[serde(default)]
    pub balance: i64,
}
