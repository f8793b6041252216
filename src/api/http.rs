use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::info;

use crate::market::scanner::{ScanResult, Scanner};
use crate::types::{ControlCommand, EngineEvent, MetricsSnapshot, StateSnapshot};

/// Shared handler state: a sender into the engine channel plus the scanner
/// and its cached results. Reads of engine state go through oneshot
/// replies; the engine task stays the only owner.
#[derive(Clone)]
pub struct ApiState {
    pub engine_tx: mpsc::Sender<EngineEvent>,
    pub scanner: Arc<Scanner>,
    pub scan_cache: Arc<RwLock<Vec<ScanResult>>>,
}

pub async fn serve_api(state: ApiState, addr: SocketAddr) -> anyhow::Result<()> {
    use anyhow::Context;

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding control plane on {}", addr))?;
    info!(%addr, "control plane listening");
    axum::serve(listener, app).await.context("control plane server")
}

fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/state", get(engine_state))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/flatten", post(flatten))
        .route("/markets/:ticker", post(add_market).delete(remove_market))
        .route("/scan", get(cached_scan).post(run_scan))
        .with_state(state)
}

const ENGINE_GONE: (StatusCode, &str) = (StatusCode::SERVICE_UNAVAILABLE, "engine unavailable");

async fn command(
    state: &ApiState,
    cmd: ControlCommand,
) -> Result<(), (StatusCode, &'static str)> {
    state
        .engine_tx
        .send(EngineEvent::Command(cmd))
        .await
        .map_err(|_| ENGINE_GONE)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().timestamp_millis(),
    }))
}

async fn engine_state(
    State(state): State<ApiState>,
) -> Result<Json<StateSnapshot>, (StatusCode, &'static str)> {
    let (reply, rx) = oneshot::channel();
    command(&state, ControlCommand::GetState(reply)).await?;
    rx.await.map(Json).map_err(|_| ENGINE_GONE)
}

async fn metrics(
    State(state): State<ApiState>,
) -> Result<Json<MetricsSnapshot>, (StatusCode, &'static str)> {
    let (reply, rx) = oneshot::channel();
    command(&state, ControlCommand::GetMetrics(reply)).await?;
    rx.await.map(Json).map_err(|_| ENGINE_GONE)
}

async fn pause(
    State(state): State<ApiState>,
) -> Result<Json<Value>, (StatusCode, &'static str)> {
    command(&state, ControlCommand::Pause).await?;
    Ok(Json(json!({ "paused": true })))
}

async fn resume(
    State(state): State<ApiState>,
) -> Result<Json<Value>, (StatusCode, &'static str)> {
    command(&state, ControlCommand::Resume).await?;
    Ok(Json(json!({ "paused": false })))
}

async fn flatten(
    State(state): State<ApiState>,
) -> Result<Json<Value>, (StatusCode, &'static str)> {
    command(&state, ControlCommand::Flatten).await?;
    Ok(Json(json!({ "flattened": true })))
}

async fn add_market(
    State(state): State<ApiState>,
    Path(ticker): Path<String>,
) -> Result<Json<Value>, (StatusCode, &'static str)> {
    let (reply, rx) = oneshot::channel();
    command(&state, ControlCommand::AddMarket { ticker: ticker.clone(), reply }).await?;
    let total = rx.await.map_err(|_| ENGINE_GONE)?;
    Ok(Json(json!({ "added": ticker, "totalMarkets": total })))
}

async fn remove_market(
    State(state): State<ApiState>,
    Path(ticker): Path<String>,
) -> Result<Json<Value>, (StatusCode, &'static str)> {
    let (reply, rx) = oneshot::channel();
    command(&state, ControlCommand::RemoveMarket { ticker: ticker.clone(), reply }).await?;
    let total = rx.await.map_err(|_| ENGINE_GONE)?;
    Ok(Json(json!({ "removed": ticker, "totalMarkets": total })))
}

async fn cached_scan(State(state): State<ApiState>) -> Json<Value> {
    let results = state.scan_cache.read().await;
    Json(json!({ "results": &*results }))
}

async fn run_scan(
    State(state): State<ApiState>,
) -> Result<Json<Value>, (StatusCode, String)> {
    match state.scanner.scan().await {
        Ok(results) => {
            *state.scan_cache.write().await = results.clone();
            Ok(Json(json!({ "results": results })))
        }
        Err(e) => Err((StatusCode::BAD_GATEWAY, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScannerConfig;
    use std::collections::HashMap;

    fn scanner() -> Arc<Scanner> {
        Arc::new(Scanner::new(
            "http://localhost:1".into(),
            ScannerConfig {
                enabled: false,
                interval_s: 300,
                min_volume_24h: 0,
                min_depth: 0,
                max_spread: 10,
                category_weights: HashMap::new(),
                avoid_categories: Vec::new(),
            },
        ))
    }

    /// Scenario: GET /health.
    /// Expected: ok status plus a timestamp.
    #[tokio::test]
    async fn test_health() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
        assert!(body["timestamp"].as_i64().is_some());
    }

    /// Scenario: the engine channel is closed when a command arrives.
    /// Expected: 503 instead of a hang or panic.
    #[tokio::test]
    async fn test_engine_gone_is_503() {
        let (engine_tx, rx) = mpsc::channel(1);
        drop(rx);
        let state = ApiState {
            engine_tx,
            scanner: scanner(),
            scan_cache: Arc::new(RwLock::new(Vec::new())),
        };
        let err = pause(State(state)).await.unwrap_err();
        assert_eq!(err.0, StatusCode::SERVICE_UNAVAILABLE);
    }

    /// Scenario: pause/resume/flatten round-trips against a stub engine
    /// that acks every command.
    /// Expected: the documented response bodies.
    #[tokio::test]
    async fn test_command_responses() {
        let (engine_tx, mut rx) = mpsc::channel(16);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let EngineEvent::Command(cmd) = event {
                    match cmd {
                        ControlCommand::AddMarket { reply, .. } => {
                            let _ = reply.send(3);
                        }
                        ControlCommand::RemoveMarket { reply, .. } => {
                            let _ = reply.send(2);
                        }
                        _ => {}
                    }
                }
            }
        });
        let state = ApiState {
            engine_tx,
            scanner: scanner(),
            scan_cache: Arc::new(RwLock::new(Vec::new())),
        };

        let Json(body) = pause(State(state.clone())).await.unwrap();
        assert_eq!(body["paused"], true);
        let Json(body) = resume(State(state.clone())).await.unwrap();
        assert_eq!(body["paused"], false);
        let Json(body) = flatten(State(state.clone())).await.unwrap();
        assert_eq!(body["flattened"], true);

        let Json(body) = add_market(State(state.clone()), Path("KXA".into()))
            .await
            .unwrap();
        assert_eq!(body["added"], "KXA");
        assert_eq!(body["totalMarkets"], 3);

        let Json(body) = remove_market(State(state), Path("KXA".into()))
            .await
            .unwrap();
        assert_eq!(body["totalMarkets"], 2);
    }
}
