use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, RwLock};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kalshi_maker::api::http::{serve_api, ApiState};
use kalshi_maker::config::Config;
use kalshi_maker::engine::runner::{run_engine, PortfolioSeed};
use kalshi_maker::feeds::venue_ws::venue_ws_feed;
use kalshi_maker::feeds::SubscriptionSet;
use kalshi_maker::gateway::order::order_gateway;
use kalshi_maker::market::scanner::{scanner_loop, Scanner};
use kalshi_maker::telemetry::writer::telemetry_writer;
use kalshi_maker::types::{ControlCommand, EngineEvent};
use kalshi_maker::venue::auth::RequestSigner;
use kalshi_maker::venue::rest::RestClient;
use kalshi_maker::venue::VenueClient;

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

/// Exit codes: 0 normal, 1 config/startup error, 2 unhandled fatal in the
/// quoting task.
async fn run() -> i32 {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration error");
            return 1;
        }
    };
    info!(
        demo = config.venue.demo,
        dry_run = config.dry_run,
        strategy = config.quoting.strategy.name(),
        markets = ?config.quoting.markets,
        "starting market maker"
    );

    let signer = if config.venue.api_key_id.is_empty() {
        None
    } else {
        match RequestSigner::from_pem(&config.venue.api_key_id, &config.venue.private_key_pem) {
            Ok(s) => Some(s),
            Err(e) if config.dry_run => {
                warn!(error = %e, "credentials unusable, continuing in dry run");
                None
            }
            Err(e) => {
                error!(error = %e, "credentials unusable");
                return 1;
            }
        }
    };

    let venue: Option<Arc<RestClient>> = if config.dry_run {
        None
    } else {
        let Some(signer) = signer.clone() else {
            error!("live mode requires KALSHI_API_KEY_ID and a private key");
            return 1;
        };
        match RestClient::new(
            config.venue.rest_base(),
            signer,
            config.order_timeout_ms,
            config.rate_limit_per_s,
        ) {
            Ok(c) => Some(Arc::new(c)),
            Err(e) => {
                error!(error = %e, "venue client init failed");
                return 1;
            }
        }
    };

    // Seed positions and sanity-check the account before quoting anything.
    let mut seeds: Vec<PortfolioSeed> = Vec::new();
    if let Some(venue) = &venue {
        match venue.fetch_balance().await {
            Ok(b) => info!(balance_cents = b.balance, "venue balance"),
            Err(e) => warn!(error = %e, "balance fetch failed"),
        }
        match venue.fetch_positions().await {
            Ok(resp) => {
                seeds = resp
                    .market_positions
                    .into_iter()
                    .filter(|p| p.position != 0)
                    .map(|p| PortfolioSeed {
                        ticker: p.ticker,
                        yes_contracts: p.position.max(0),
                        no_contracts: (-p.position).max(0),
                        cost_cents: p.market_exposure as f64,
                    })
                    .collect();
                info!(positions = seeds.len(), "portfolio loaded");
            }
            Err(e) => warn!(error = %e, "portfolio fetch failed, starting flat"),
        }
    }

    let (event_tx, event_rx) = mpsc::channel::<EngineEvent>(4096);
    let (gateway_tx, gateway_rx) = mpsc::channel(256);
    let (telem_tx, telem_rx) = mpsc::channel(4096);
    let (subs_tx, subs_rx) = watch::channel(SubscriptionSet::default());

    tokio::spawn(telemetry_writer(telem_rx));
    tokio::spawn(order_gateway(gateway_rx, event_tx.clone(), venue.clone()));
    tokio::spawn(venue_ws_feed(
        event_tx.clone(),
        subs_rx,
        config.venue.ws_url(),
        signer,
    ));

    if config.api.enabled {
        let scanner = Arc::new(Scanner::new(
            config.venue.rest_base(),
            config.scanner.clone(),
        ));
        let cache = Arc::new(RwLock::new(Vec::new()));
        if config.scanner.enabled {
            tokio::spawn(scanner_loop(
                scanner.clone(),
                cache.clone(),
                config.scanner.interval_s,
            ));
        }
        let api_state = ApiState {
            engine_tx: event_tx.clone(),
            scanner,
            scan_cache: cache,
        };
        let addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));
        tokio::spawn(async move {
            if let Err(e) = serve_api(api_state, addr).await {
                error!(error = %e, "control plane exited");
            }
        });
    }

    // Heartbeat: drives cooldown expiry and the daily rollover.
    let tick_tx = event_tx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            interval.tick().await;
            if tick_tx.send(EngineEvent::Tick).await.is_err() {
                break;
            }
        }
    });

    let signal_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("signal received, shutting down");
            let _ = signal_tx
                .send(EngineEvent::Command(ControlCommand::Shutdown))
                .await;
        }
    });

    let engine = tokio::spawn(run_engine(
        config, seeds, event_rx, gateway_tx, telem_tx, subs_tx,
    ));
    match engine.await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "quoting task died");
            2
        }
    }
}
