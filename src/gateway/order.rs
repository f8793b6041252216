use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::types::{
    complement, AckResult, CancelRef, EngineEvent, GatewayAck, GatewayCmd, QuoteSide,
};
use crate::venue::types::{CreateOrderRequest, OrderSide};
use crate::venue::{VenueClient, VenueError};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 250;
const BACKOFF_CAP_MS: u64 = 4_000;
/// Consecutive transient errors before the venue circuit opens.
const CIRCUIT_THRESHOLD: u32 = 5;
const CIRCUIT_OPEN_MS: u64 = 10_000;

/// Venue-health circuit shared across all outbound calls. While open, new
/// placements fail fast; cancels still go out because they reduce risk.
#[derive(Default)]
pub struct Circuit {
    state: Mutex<CircuitState>,
}

#[derive(Default)]
struct CircuitState {
    consecutive_errors: u32,
    open_until: Option<Instant>,
}

impl Circuit {
    fn is_open(&self) -> bool {
        let st = self.state.lock().unwrap();
        st.open_until.is_some_and(|until| Instant::now() < until)
    }

    fn on_success(&self) {
        let mut st = self.state.lock().unwrap();
        st.consecutive_errors = 0;
        st.open_until = None;
    }

    fn on_transient_error(&self) {
        let mut st = self.state.lock().unwrap();
        st.consecutive_errors += 1;
        if st.consecutive_errors >= CIRCUIT_THRESHOLD {
            st.open_until = Some(Instant::now() + Duration::from_millis(CIRCUIT_OPEN_MS));
        }
    }
}

/// Order gateway: executes engine commands against the venue off the engine
/// task and feeds acks back through the engine channel.
///
/// Each command runs in its own task so a slow call on one market never
/// serializes mutations on another; the per-(ticker, side) ordering the
/// order manager needs comes from its own in-flight lock, not from here.
///
/// With no venue client (dry run) every command is acked as if it succeeded
/// immediately.
pub async fn order_gateway<V: VenueClient>(
    mut cmd_rx: mpsc::Receiver<GatewayCmd>,
    engine_tx: mpsc::Sender<EngineEvent>,
    venue: Option<Arc<V>>,
) {
    info!(dry_run = venue.is_none(), "order gateway started");
    let circuit = Arc::new(Circuit::default());

    while let Some(cmd) = cmd_rx.recv().await {
        match &venue {
            None => {
                for ack in dry_run_acks(cmd) {
                    if engine_tx.send(EngineEvent::Gateway(ack)).await.is_err() {
                        info!("engine channel closed, gateway exiting");
                        return;
                    }
                }
            }
            Some(venue) => {
                let venue = venue.clone();
                let engine_tx = engine_tx.clone();
                let circuit = circuit.clone();
                tokio::spawn(async move {
                    for ack in execute(cmd, venue.as_ref(), &circuit).await {
                        let _ = engine_tx.send(EngineEvent::Gateway(ack)).await;
                    }
                });
            }
        }
    }
    info!("order gateway stopped");
}

fn dry_run_acks(cmd: GatewayCmd) -> Vec<GatewayAck> {
    match cmd {
        GatewayCmd::Place {
            internal_id,
            ticker,
            quote_side,
            ..
        } => vec![GatewayAck {
            internal_id,
            ticker,
            quote_side,
            result: AckResult::Placed {
                venue_id: format!("dry-{}", internal_id),
            },
        }],
        GatewayCmd::Cancel {
            internal_id,
            ticker,
            quote_side,
            ..
        } => vec![GatewayAck {
            internal_id,
            ticker,
            quote_side,
            result: AckResult::Canceled,
        }],
        GatewayCmd::CancelBatch { items } => items
            .into_iter()
            .map(|item| GatewayAck {
                internal_id: item.internal_id,
                ticker: item.ticker,
                quote_side: item.quote_side,
                result: AckResult::Canceled,
            })
            .collect(),
    }
}

async fn execute<V: VenueClient>(cmd: GatewayCmd, venue: &V, circuit: &Circuit) -> Vec<GatewayAck> {
    match cmd {
        GatewayCmd::Place {
            internal_id,
            ticker,
            quote_side,
            price,
            count,
        } => vec![
            place(venue, circuit, internal_id, ticker, quote_side, price, count).await,
        ],
        GatewayCmd::Cancel {
            internal_id,
            venue_id,
            ticker,
            quote_side,
        } => vec![cancel(venue, circuit, internal_id, venue_id, ticker, quote_side).await],
        GatewayCmd::CancelBatch { items } => cancel_batch(venue, circuit, items).await,
    }
}

async fn place<V: VenueClient>(
    venue: &V,
    circuit: &Circuit,
    internal_id: u64,
    ticker: String,
    quote_side: QuoteSide,
    price: i64,
    count: i64,
) -> GatewayAck {
    if circuit.is_open() {
        return GatewayAck {
            internal_id,
            ticker,
            quote_side,
            result: AckResult::PlaceFailed {
                reason: "venue circuit open".into(),
                rate_limited: false,
            },
        };
    }

    // Ask-side quotes go to the venue as NO bids at the complement price.
    let req = match quote_side {
        QuoteSide::Bid => CreateOrderRequest::limit_buy(&ticker, OrderSide::Yes, price, count),
        QuoteSide::Ask => {
            CreateOrderRequest::limit_buy(&ticker, OrderSide::No, complement(price), count)
        }
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        match venue.place_order(req.clone()).await {
            Ok(order) => {
                circuit.on_success();
                return GatewayAck {
                    internal_id,
                    ticker,
                    quote_side,
                    result: AckResult::Placed {
                        venue_id: order.order_id,
                    },
                };
            }
            Err(err) => {
                if err.is_retryable() {
                    circuit.on_transient_error();
                }
                if err.is_retryable() && attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(backoff(attempt)).await;
                    continue;
                }
                warn!(%ticker, side = quote_side.as_str(), %err, "place failed");
                return GatewayAck {
                    internal_id,
                    ticker,
                    quote_side,
                    result: AckResult::PlaceFailed {
                        reason: err.to_string(),
                        rate_limited: matches!(err, VenueError::RateLimited),
                    },
                };
            }
        }
    }
}

async fn cancel<V: VenueClient>(
    venue: &V,
    circuit: &Circuit,
    internal_id: u64,
    venue_id: String,
    ticker: String,
    quote_side: QuoteSide,
) -> GatewayAck {
    let mut attempt = 0;
    let result = loop {
        attempt += 1;
        match venue.cancel_order(&venue_id).await {
            Ok(()) => {
                circuit.on_success();
                break AckResult::Canceled;
            }
            // The venue no longer knows the order: it is already gone.
            Err(VenueError::UnknownOrder) => break AckResult::Canceled,
            Err(err) => {
                if err.is_retryable() {
                    circuit.on_transient_error();
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }
                }
                warn!(%ticker, side = quote_side.as_str(), %err, "cancel failed");
                break AckResult::CancelFailed {
                    reason: err.to_string(),
                };
            }
        }
    };
    GatewayAck {
        internal_id,
        ticker,
        quote_side,
        result,
    }
}

async fn cancel_batch<V: VenueClient>(
    venue: &V,
    circuit: &Circuit,
    items: Vec<CancelRef>,
) -> Vec<GatewayAck> {
    let ids: Vec<String> = items.iter().map(|i| i.venue_id.clone()).collect();
    match venue.batch_cancel(ids).await {
        Ok(()) => {
            circuit.on_success();
            items
                .into_iter()
                .map(|item| GatewayAck {
                    internal_id: item.internal_id,
                    ticker: item.ticker,
                    quote_side: item.quote_side,
                    result: AckResult::Canceled,
                })
                .collect()
        }
        Err(err) => {
            // Fall back to one-by-one so a partial batch failure cannot
            // leave unknown resting orders behind.
            warn!(%err, "batch cancel failed, falling back to singles");
            let mut acks = Vec::with_capacity(items.len());
            for item in items {
                acks.push(
                    cancel(
                        venue,
                        circuit,
                        item.internal_id,
                        item.venue_id,
                        item.ticker,
                        item.quote_side,
                    )
                    .await,
                );
            }
            acks
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis((BACKOFF_BASE_MS << (attempt - 1)).min(BACKOFF_CAP_MS))
}
