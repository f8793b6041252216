use std::collections::HashMap;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use super::SubscriptionSet;
use crate::types::{Action, EngineEvent, Fill, Side, WsEvent};
use crate::venue::auth::RequestSigner;
use crate::venue::types::{SubscribeCmd, WsMessage};

const BACKOFF_START_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 30_000;

/// Pure producer: connects to the venue WS, subscribes to the current
/// market set, decodes frames into typed events, and forwards them to the
/// engine channel in arrival order.
///
/// Reconnects with capped exponential backoff. A sequence gap tears the
/// connection down on purpose: reconnecting yields fresh snapshots, which
/// is the same recovery path as a desynced book. Subscription-set changes
/// (add/remove market, forced resync) also go through reconnect.
pub async fn venue_ws_feed(
    engine_tx: mpsc::Sender<EngineEvent>,
    mut subs_rx: watch::Receiver<SubscriptionSet>,
    ws_url: String,
    signer: Option<RequestSigner>,
) {
    let sign_path = ws_url
        .find("/trade-api")
        .map(|i| ws_url[i..].to_string())
        .unwrap_or_else(|| "/trade-api/ws/v2".to_string());
    let mut backoff_ms = BACKOFF_START_MS;

    loop {
        let subs = subs_rx.borrow_and_update().clone();
        if subs.tickers.is_empty() {
            if subs_rx.changed().await.is_err() {
                return;
            }
            continue;
        }

        let mut request = match ws_url.as_str().into_client_request() {
            Ok(req) => req,
            Err(e) => {
                warn!(%ws_url, error = %e, "bad websocket url");
                return;
            }
        };
        if let Some(signer) = &signer {
            for (name, value) in signer.headers("GET", &sign_path) {
                match HeaderValue::from_str(&value) {
                    Ok(v) => {
                        request.headers_mut().insert(name, v);
                    }
                    Err(e) => warn!(header = name, error = %e, "skipping auth header"),
                }
            }
        }

        info!(tickers = subs.tickers.len(), "connecting venue websocket");
        let ws = match connect_async(request).await {
            Ok((ws, _)) => {
                backoff_ms = BACKOFF_START_MS;
                ws
            }
            Err(e) => {
                warn!(error = %e, backoff_ms, "websocket connect failed");
                tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(BACKOFF_CAP_MS);
                continue;
            }
        };
        let (mut write, mut read) = ws.split();

        let sub = SubscribeCmd::subscribe(1, subs.tickers.clone());
        let payload = match serde_json::to_string(&sub) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "subscribe serialization failed");
                return;
            }
        };
        if let Err(e) = write.send(Message::Text(payload)).await {
            warn!(error = %e, "subscribe send failed, reconnecting");
            continue;
        }
        if engine_tx
            .send(EngineEvent::Ws(WsEvent::Connected))
            .await
            .is_err()
        {
            return;
        }

        // Per-subscription sequence tracking for gap detection.
        let mut last_seq: HashMap<i32, i64> = HashMap::new();
        let mut ping_interval = tokio::time::interval(tokio::time::Duration::from_secs(10));
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            warn!(error = %e, "websocket error, reconnecting");
                            break;
                        }
                        None => {
                            warn!("websocket stream ended, reconnecting");
                            break;
                        }
                    };
                    let Message::Text(text) = msg else { continue };

                    match decode_frame(&text, &mut last_seq) {
                        Decoded::Event(event) => {
                            if engine_tx.send(EngineEvent::Ws(event)).await.is_err() {
                                return;
                            }
                        }
                        Decoded::SeqGap { sid, expected, got } => {
                            warn!(sid, expected, got, "sequence gap, resubscribing");
                            break;
                        }
                        Decoded::Ignored => {}
                    }
                }
                _ = ping_interval.tick() => {
                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                changed = subs_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    info!("subscription set changed, reconnecting");
                    break;
                }
            }
        }

        if engine_tx
            .send(EngineEvent::Ws(WsEvent::Disconnected))
            .await
            .is_err()
        {
            return;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(BACKOFF_CAP_MS);
    }
}

enum Decoded {
    Event(WsEvent),
    SeqGap { sid: i32, expected: i64, got: i64 },
    Ignored,
}

fn decode_frame(text: &str, last_seq: &mut HashMap<i32, i64>) -> Decoded {
    let Ok(msg) = serde_json::from_str::<WsMessage>(text) else {
        return Decoded::Ignored;
    };

    if let (Some(sid), Some(seq)) = (msg.sid, msg.seq) {
        if let Some(&prev) = last_seq.get(&sid) {
            if seq != prev + 1 {
                return Decoded::SeqGap {
                    sid,
                    expected: prev + 1,
                    got: seq,
                };
            }
        }
        last_seq.insert(sid, seq);
    }

    match decode_body(&msg) {
        Some(event) => Decoded::Event(event),
        None => Decoded::Ignored,
    }
}

fn decode_body(msg: &WsMessage) -> Option<WsEvent> {
    let body = msg.msg.as_ref()?;
    let ticker = body.market_ticker.clone()?;

    match msg.msg_type.as_str() {
        "orderbook_snapshot" => Some(WsEvent::Snapshot {
            ticker,
            yes: body
                .yes
                .as_ref()
                .map(|ls| ls.iter().map(|&[p, q]| (p, q)).collect())
                .unwrap_or_default(),
            no: body
                .no
                .as_ref()
                .map(|ls| ls.iter().map(|&[p, q]| (p, q)).collect())
                .unwrap_or_default(),
        }),
        "orderbook_delta" => Some(WsEvent::Delta {
            ticker,
            side: parse_side(body.side.as_deref()?)?,
            price: body.price?,
            delta: body.delta?,
        }),
        "ticker" => {
            let price = body.last_price.or_else(|| {
                Some((body.yes_bid? + body.yes_ask?) / 2)
            })?;
            Some(WsEvent::Mark {
                ticker,
                price,
                ts_ms: body.ts.map(|s| s * 1_000).unwrap_or_default(),
            })
        }
        "fill" => {
            let side = parse_side(body.side.as_deref()?)?;
            let price = match side {
                Side::Yes => body.yes_price,
                Side::No => body.no_price.or(body.yes_price.map(|p| 100 - p)),
            }?;
            Some(WsEvent::Fill(Fill {
                order_id: body.order_id.clone()?,
                ticker,
                side,
                action: parse_action(body.action.as_deref()?)?,
                count: body.count?,
                price,
                ts_ms: body.ts.map(|s| s * 1_000).unwrap_or_default(),
            }))
        }
        _ => None,
    }
}

fn parse_side(s: &str) -> Option<Side> {
    match s {
        "yes" => Some(Side::Yes),
        "no" => Some(Side::No),
        _ => None,
    }
}

fn parse_action(s: &str) -> Option<Action> {
    match s {
        "buy" => Some(Action::Buy),
        "sell" => Some(Action::Sell),
        _ => None,
    }
}
