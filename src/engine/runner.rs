use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::engine::book::{DeltaResult, OrderBookManager};
use crate::engine::inventory::InventoryTracker;
use crate::engine::orders::OrderManager;
use crate::engine::risk::RiskEngine;
use crate::feeds::SubscriptionSet;
use crate::strategies::{build_strategy, Strategy};
use crate::types::*;

const LATENCY_SAMPLES: usize = 512;
const SHUTDOWN_DRAIN_MS: u64 = 5_000;

/// Initial position pulled from the venue portfolio at startup. The venue
/// reports one aggregate cost; the tracker splits it across sides.
pub struct PortfolioSeed {
    pub ticker: String,
    pub yes_contracts: i64,
    pub no_contracts: i64,
    pub cost_cents: f64,
}

/// The quoting engine: single task, owns every piece of mutable state.
/// Feeds, gateway acks, control commands, and the timer all arrive through
/// one channel in producer order; nothing here is shared or locked.
struct Engine {
    config: Config,
    books: OrderBookManager,
    inventory: InventoryTracker,
    risk: RiskEngine,
    orders: OrderManager,
    strategy: Box<dyn Strategy>,

    active: HashSet<String>,
    paused: bool,
    connected: bool,
    rate_limited: bool,
    last_error: Option<String>,

    /// Coalesced re-quote queue: one pending entry per ticker, FIFO by
    /// first request. The flag clears before the snapshot is built so a
    /// mutation during computation re-arms it.
    requote_queue: VecDeque<String>,
    requote_pending: HashSet<String>,

    /// Re-quote cycle latencies (microseconds) for p50/p95.
    latency_us: VecDeque<u64>,

    started_at: Instant,
    current_day: chrono::NaiveDate,
    subs_generation: u64,

    gateway_tx: mpsc::Sender<GatewayCmd>,
    telem_tx: mpsc::Sender<TelemetryEvent>,
    subs_tx: watch::Sender<SubscriptionSet>,
}

/// Run the quoting engine until the channel closes or Shutdown arrives.
pub async fn run_engine(
    config: Config,
    seeds: Vec<PortfolioSeed>,
    mut event_rx: mpsc::Receiver<EngineEvent>,
    gateway_tx: mpsc::Sender<GatewayCmd>,
    telem_tx: mpsc::Sender<TelemetryEvent>,
    subs_tx: watch::Sender<SubscriptionSet>,
) {
    let strategy = build_strategy(&config.quoting.strategy);
    let risk = RiskEngine::new(
        config.risk,
        config.quoting.daily_loss_limit_cents,
        config.quoting.exposure_limit_contracts,
    );
    let mut engine = Engine {
        active: config.quoting.markets.iter().cloned().collect(),
        books: OrderBookManager::new(),
        inventory: InventoryTracker::new(),
        risk,
        orders: OrderManager::new(),
        strategy,
        paused: false,
        connected: false,
        rate_limited: false,
        last_error: None,
        requote_queue: VecDeque::new(),
        requote_pending: HashSet::new(),
        latency_us: VecDeque::with_capacity(LATENCY_SAMPLES),
        started_at: Instant::now(),
        current_day: chrono::Utc::now().date_naive(),
        subs_generation: 0,
        gateway_tx,
        telem_tx,
        subs_tx,
        config,
    };

    for seed in seeds {
        engine.inventory.initialize_from_portfolio(
            &seed.ticker,
            seed.yes_contracts,
            seed.no_contracts,
            seed.cost_cents,
        );
    }

    info!(
        markets = engine.active.len(),
        strategy = engine.strategy.name(),
        "quoting engine started"
    );
    engine.push_subscriptions();

    while let Some(event) = event_rx.recv().await {
        let now_ms = chrono::Utc::now().timestamp_millis();
        match event {
            EngineEvent::Ws(ev) => engine.on_ws(ev, now_ms).await,
            EngineEvent::Gateway(ack) => engine.on_gateway_ack(ack).await,
            EngineEvent::Tick => engine.on_tick(now_ms),
            EngineEvent::Command(cmd) => {
                if engine.on_command(cmd, now_ms).await {
                    engine.graceful_shutdown(&mut event_rx).await;
                    break;
                }
            }
        }
        engine.drain_requotes(now_ms).await;
    }
    info!("quoting engine stopped");
}

impl Engine {
    fn push_subscriptions(&mut self) {
        self.subs_generation += 1;
        let mut tickers: Vec<String> = self.active.iter().cloned().collect();
        tickers.sort();
        let _ = self.subs_tx.send(SubscriptionSet {
            generation: self.subs_generation,
            tickers,
        });
    }

    fn schedule_requote(&mut self, ticker: &str) {
        if self.requote_pending.insert(ticker.to_string()) {
            self.requote_queue.push_back(ticker.to_string());
        }
    }

    fn schedule_all(&mut self) {
        let tickers: Vec<String> = self.active.iter().cloned().collect();
        for t in tickers {
            self.schedule_requote(&t);
        }
    }

    // ─── Event handlers ───

    async fn on_ws(&mut self, event: WsEvent, now_ms: i64) {
        match event {
            WsEvent::Snapshot { ticker, yes, no } => {
                self.books.ensure(&ticker).apply_snapshot(yes, no, now_ms);
                self.schedule_requote(&ticker);
            }
            WsEvent::Delta {
                ticker,
                side,
                price,
                delta,
            } => {
                match self.books.ensure(&ticker).apply_delta(side, price, delta, now_ms) {
                    DeltaResult::Applied => self.schedule_requote(&ticker),
                    DeltaResult::Buffered => {}
                    DeltaResult::Desync => {
                        warn!(%ticker, "book desync, forcing resubscribe");
                        // Quoting for the ticker pauses via the unsynced
                        // book until the fresh snapshot lands.
                        self.schedule_requote(&ticker);
                        self.push_subscriptions();
                    }
                }
            }
            WsEvent::Mark { ticker, price, .. } => {
                self.inventory.set_mark(&ticker, price);
                self.risk.adverse.update_price(&ticker, price, now_ms);
                self.schedule_requote(&ticker);
            }
            WsEvent::Fill(fill) => self.on_fill(fill, now_ms).await,
            WsEvent::Connected => {
                self.connected = true;
                self.last_error = None;
            }
            WsEvent::Disconnected => {
                self.connected = false;
                // Books are untrustworthy until the next snapshot; an
                // unsynced book quotes nothing, which cancels resting
                // orders on the next pass.
                let tickers: Vec<String> = self.active.iter().cloned().collect();
                for t in &tickers {
                    self.books.ensure(t).invalidate();
                }
                self.schedule_all();
            }
        }
    }

    async fn on_fill(&mut self, fill: Fill, now_ms: i64) {
        self.orders.on_fill(&fill);
        let realized = self.inventory.on_fill(&fill);
        self.strategy.on_fill(&fill);

        let mark = self.inventory.mark(&fill.ticker).unwrap_or(match fill.side {
            Side::Yes => fill.price,
            Side::No => 100 - fill.price,
        });
        self.risk.adverse.record_fill(&fill, mark, now_ms);
        self.risk.on_fill_pnl(
            realized,
            self.inventory.realized_total(),
            self.inventory.realized_today(),
            self.inventory.total_exposure(),
            now_ms,
        );

        let _ = self.telem_tx.try_send(TelemetryEvent::Fill(FillRecord {
            ts_ms: now_ms,
            order_id: fill.order_id.clone(),
            ticker: fill.ticker.clone(),
            side: fill.side,
            action: fill.action,
            count: fill.count,
            price: fill.price,
            realized_pnl: realized,
        }));

        // Inventory invariants are load-bearing: a violation means our
        // view of the venue is wrong, so stop trading, not just this market.
        if let Err(e) = self.inventory.validate() {
            error!(error = %e, "inventory invariant violated, halting");
            self.risk.halt(&format!("inventory invariant: {}", e), true);
            let _ = self.telem_tx.try_send(TelemetryEvent::Risk(RiskRecord {
                ts_ms: now_ms,
                event: "fatal_halt",
                detail: e.to_string(),
            }));
            self.flatten_all().await;
            return;
        }

        if self.risk.is_halted() {
            let reason = self.risk.halt_reason().unwrap_or("unknown").to_string();
            warn!(%reason, "risk halt after fill");
            let _ = self.telem_tx.try_send(TelemetryEvent::Risk(RiskRecord {
                ts_ms: now_ms,
                event: "halt",
                detail: reason,
            }));
            self.flatten_all().await;
            return;
        }

        self.schedule_requote(&fill.ticker);
    }

    async fn on_gateway_ack(&mut self, ack: GatewayAck) {
        match &ack.result {
            AckResult::Placed { .. } => {
                self.rate_limited = false;
            }
            AckResult::PlaceFailed {
                reason,
                rate_limited,
            } => {
                if *rate_limited {
                    self.rate_limited = true;
                }
                self.last_error = Some(reason.clone());
            }
            AckResult::CancelFailed { reason } => {
                self.last_error = Some(reason.clone());
            }
            AckResult::Canceled => {}
        }

        let ticker = ack.ticker.clone();
        let follow = self.orders.on_ack(&ack);
        self.send_cmds(follow).await;
        self.schedule_requote(&ticker);
    }

    fn on_tick(&mut self, _now_ms: i64) {
        let today = chrono::Utc::now().date_naive();
        if today != self.current_day {
            info!("daily rollover, resetting counters");
            self.current_day = today;
            self.inventory.reset_daily();
        }
        // Cooldowns (circuit breaker, adverse flags) expire on wall time;
        // the periodic pass re-arms quoting without needing a book event.
        self.schedule_all();
    }

    /// Returns true when the engine should shut down.
    async fn on_command(&mut self, cmd: ControlCommand, now_ms: i64) -> bool {
        match cmd {
            ControlCommand::Pause => {
                info!("paused");
                self.paused = true;
                self.schedule_all();
            }
            ControlCommand::Resume => {
                info!("resumed");
                self.paused = false;
                self.risk.clear_halt();
                self.schedule_all();
            }
            ControlCommand::Flatten => {
                info!("flatten requested");
                self.paused = true;
                self.flatten_all().await;
            }
            ControlCommand::AddMarket { ticker, reply } => {
                let ticker = ticker.to_uppercase();
                info!(%ticker, "adding market");
                self.active.insert(ticker.clone());
                self.push_subscriptions();
                self.schedule_requote(&ticker);
                let _ = reply.send(self.active.len());
            }
            ControlCommand::RemoveMarket { ticker, reply } => {
                let ticker = ticker.to_uppercase();
                info!(%ticker, "removing market");
                self.active.remove(&ticker);
                let batch = self.orders.cancel_market(&ticker);
                if !batch.is_empty() {
                    let _ = self.gateway_tx.send(GatewayCmd::CancelBatch { items: batch }).await;
                }
                self.books.remove(&ticker);
                self.risk.adverse.remove(&ticker);
                self.push_subscriptions();
                let _ = reply.send(self.active.len());
            }
            ControlCommand::GetState(reply) => {
                let _ = reply.send(self.state_snapshot(now_ms));
            }
            ControlCommand::GetMetrics(reply) => {
                let _ = reply.send(self.metrics_snapshot());
            }
            ControlCommand::Shutdown => return true,
        }
        false
    }

    async fn flatten_all(&mut self) {
        let batch = self.orders.flatten();
        if !batch.is_empty() {
            let _ = self
                .gateway_tx
                .send(GatewayCmd::CancelBatch { items: batch })
                .await;
        }
    }

    // ─── Re-quoting ───

    async fn drain_requotes(&mut self, now_ms: i64) {
        while let Some(ticker) = self.requote_queue.pop_front() {
            self.requote_pending.remove(&ticker);
            let start = Instant::now();
            self.requote(&ticker, now_ms).await;
            let elapsed_us = start.elapsed().as_micros() as u64;
            if self.latency_us.len() == LATENCY_SAMPLES {
                self.latency_us.pop_front();
            }
            self.latency_us.push_back(elapsed_us);
            let _ = self.telem_tx.try_send(TelemetryEvent::Latency(LatencyRecord {
                ts_ms: now_ms,
                event: "requote",
                latency_us: elapsed_us,
            }));
        }
    }

    async fn requote(&mut self, ticker: &str, now_ms: i64) {
        let gated = self.paused
            || self.risk.is_halted()
            || self.risk.breaker.is_triggered(now_ms)
            || self.risk.adverse.is_adverse(ticker, now_ms)
            || !self.active.contains(ticker);

        let desired = if gated {
            None
        } else {
            self.desired_quote(ticker, now_ms)
        };

        let (bid, ask) = match desired {
            Some(q) => (
                (q.bid_size > 0).then_some((q.bid_price, q.bid_size)),
                (q.ask_size > 0).then_some((q.ask_price, q.ask_size)),
            ),
            None => (None, None),
        };

        let mut cmds = self.orders.reconcile(ticker, QuoteSide::Bid, bid);
        cmds.extend(self.orders.reconcile(ticker, QuoteSide::Ask, ask));
        self.send_cmds(cmds).await;
    }

    fn desired_quote(&mut self, ticker: &str, now_ms: i64) -> Option<Quote> {
        let snap = self.build_snapshot(ticker, now_ms)?;
        let quote = self.strategy.compute_quotes(&snap)?;

        // Scale by the drawdown multiplier; floor to whole contracts.
        let mult = self.risk.position_multiplier();
        let mut bid_size = (quote.bid_size as f64 * mult).floor() as i64;
        let mut ask_size = (quote.ask_size as f64 * mult).floor() as i64;

        // Per-market position cap: clip whatever would push |net| past it.
        let cap = self.config.quoting.max_position_per_market;
        let net = self
            .inventory
            .position(ticker)
            .map(|p| p.net_exposure())
            .unwrap_or(0);
        bid_size = bid_size.min((cap - net).max(0));
        ask_size = ask_size.min((cap + net).max(0));

        if bid_size == 0 && ask_size == 0 {
            return None;
        }
        Some(Quote {
            bid_price: quote.bid_price,
            bid_size,
            ask_price: quote.ask_price,
            ask_size,
        })
    }

    fn build_snapshot(&self, ticker: &str, now_ms: i64) -> Option<MarketSnapshot> {
        let book = self.books.get(ticker)?;
        if book.is_stale(now_ms, self.config.quoting.max_book_age_ms) {
            return None;
        }
        let ((best_bid, bid_size), (best_ask, ask_size)) = book.bbo()?;

        // A still-elevated score warns the zone strategy to widen before
        // the hard cooldown gate trips.
        let adverse = self.risk.adverse.score(ticker)
            >= self.config.risk.adverse.score_threshold / 2.0;

        Some(MarketSnapshot {
            ticker: ticker.to_string(),
            best_bid,
            best_ask,
            bid_size,
            ask_size,
            mid: (best_bid + best_ask) as f64 / 2.0,
            spread: best_ask - best_bid,
            microprice: book.microprice(),
            imbalance: book.imbalance(),
            net_position: self.inventory.position(ticker).map(|p| p.net_exposure()),
            time_to_expiry_s: None,
            adverse,
        })
    }

    async fn send_cmds(&mut self, cmds: Vec<GatewayCmd>) {
        for cmd in cmds {
            if let GatewayCmd::Place {
                internal_id,
                ref ticker,
                quote_side,
                price,
                count,
            } = cmd
            {
                let _ = self.telem_tx.try_send(TelemetryEvent::OrderSent(OrderRecord {
                    ts_ms: chrono::Utc::now().timestamp_millis(),
                    internal_id,
                    ticker: ticker.clone(),
                    quote_side,
                    price,
                    count,
                }));
            }
            if self.gateway_tx.send(cmd).await.is_err() {
                warn!("gateway channel closed");
                return;
            }
        }
    }

    // ─── Control-plane views ───

    fn state_snapshot(&self, _now_ms: i64) -> StateSnapshot {
        let exposure = self.inventory.total_exposure();
        let limit = self.risk.exposure_limit();
        StateSnapshot {
            paused: self.paused,
            halted: self.risk.is_halted(),
            running: true,
            connected: self.connected,
            connection: if self.connected { "ok" } else { "reconnecting" },
            rate_limited: self.rate_limited,
            last_error: self.last_error.clone(),
            pnl: PnlView {
                realized_today: self.inventory.realized_today(),
                fills_today: self.inventory.fills_today(),
                volume_today: self.inventory.volume_today(),
            },
            risk: RiskView {
                total_exposure: exposure,
                utilization_percent: if limit > 0 {
                    exposure as f64 / limit as f64 * 100.0
                } else {
                    0.0
                },
                daily_pnl: self.inventory.realized_today(),
                halted: self.risk.is_halted(),
                halt_reason: self.risk.halt_reason().map(String::from),
            },
            drawdown: self.risk.drawdown.view(),
            circuit_breaker: self.risk.breaker.view(),
            positions: self.inventory.views(),
        }
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_s: self.started_at.elapsed().as_secs(),
            fills_today: self.inventory.fills_today(),
            volume_today: self.inventory.volume_today(),
            realized_pnl: self.inventory.realized_total(),
            unrealized_pnl: self.inventory.unrealized_pnl(),
            active_orders: self.orders.active_order_count(),
            latency_p50: self.latency_percentile_ms(50),
            latency_p95: self.latency_percentile_ms(95),
            active_markets: self.active.len(),
        }
    }

    fn latency_percentile_ms(&self, pct: usize) -> f64 {
        if self.latency_us.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<u64> = self.latency_us.iter().copied().collect();
        sorted.sort_unstable();
        let idx = (sorted.len() * pct / 100).min(sorted.len() - 1);
        sorted[idx] as f64 / 1_000.0
    }

    // ─── Shutdown ───

    /// Pause, flatten, and drain outstanding venue calls with a deadline.
    async fn graceful_shutdown(&mut self, event_rx: &mut mpsc::Receiver<EngineEvent>) {
        info!("graceful shutdown: flattening");
        self.paused = true;
        self.flatten_all().await;

        let deadline = tokio::time::Instant::now()
            + tokio::time::Duration::from_millis(SHUTDOWN_DRAIN_MS);
        while self.orders.has_in_flight() {
            match tokio::time::timeout_at(deadline, event_rx.recv()).await {
                Ok(Some(EngineEvent::Gateway(ack))) => {
                    let follow = self.orders.on_ack(&ack);
                    self.send_cmds(follow).await;
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => {
                    warn!("shutdown drain ended with calls outstanding");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use crate::gateway::order::order_gateway;
    use crate::types::{Action, Side};
    use crate::venue::rest::RestClient;
    use std::collections::HashMap;
    use tokio::sync::oneshot;
    use tokio::time::{sleep, Duration};

    fn test_config(markets: Vec<&str>) -> Config {
        Config {
            venue: VenueConfig {
                api_key_id: String::new(),
                private_key_pem: String::new(),
                demo: true,
                base_path: None,
            },
            quoting: QuotingConfig {
                markets: markets.into_iter().map(String::from).collect(),
                strategy: StrategyConfig::Symmetric(SymmetricParams {
                    spread_cents: 4,
                    size: 10,
                    min_tte_s: 60.0,
                }),
                size_per_side: 10,
                min_spread: 2,
                max_spread: 20,
                max_position_per_market: 100,
                daily_loss_limit_cents: 25_000.0,
                exposure_limit_contracts: 500,
                max_book_age_ms: 60_000,
            },
            risk: RiskConfig {
                drawdown: DrawdownParams {
                    scale_start: 5_000.0,
                    half_size: 10_000.0,
                    halt: 20_000.0,
                },
                circuit_breaker: CircuitBreakerParams {
                    max_consecutive_losses: 5,
                    rapid_window_ms: 60_000,
                    rapid_loss_threshold: 8,
                    cooldown_ms: 300_000,
                },
                adverse: AdverseParams {
                    window_ms: 60_000,
                    consec_threshold: 4,
                    price_move_cents: 3,
                    fill_rate_per_min: 10.0,
                    score_threshold: 60.0,
                    cooldown_ms: 120_000,
                },
            },
            api: ApiConfig {
                enabled: false,
                port: 0,
            },
            scanner: ScannerConfig {
                enabled: false,
                interval_s: 300,
                min_volume_24h: 0,
                min_depth: 0,
                max_spread: 10,
                category_weights: HashMap::new(),
                avoid_categories: Vec::new(),
            },
            order_timeout_ms: 1_000,
            rate_limit_per_s: 8.0,
            dry_run: true,
        }
    }

    /// Engine + dry-run gateway wired together; returns the event sender.
    fn spawn_stack(config: Config) -> mpsc::Sender<EngineEvent> {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (gateway_tx, gateway_rx) = mpsc::channel(256);
        let (telem_tx, mut telem_rx) = mpsc::channel(1024);
        let (subs_tx, _subs_rx) = watch::channel(SubscriptionSet::default());

        tokio::spawn(async move { while telem_rx.recv().await.is_some() {} });
        tokio::spawn(order_gateway::<RestClient>(gateway_rx, event_tx.clone(), None));
        tokio::spawn(run_engine(config, Vec::new(), event_rx, gateway_tx, telem_tx, subs_tx));
        event_tx
    }

    async fn get_state(tx: &mpsc::Sender<EngineEvent>) -> StateSnapshot {
        let (reply, rx) = oneshot::channel();
        tx.send(EngineEvent::Command(ControlCommand::GetState(reply)))
            .await
            .unwrap();
        rx.await.unwrap()
    }

    async fn get_metrics(tx: &mpsc::Sender<EngineEvent>) -> MetricsSnapshot {
        let (reply, rx) = oneshot::channel();
        tx.send(EngineEvent::Command(ControlCommand::GetMetrics(reply)))
            .await
            .unwrap();
        rx.await.unwrap()
    }

    async fn send_snapshot(tx: &mpsc::Sender<EngineEvent>, ticker: &str) {
        tx.send(EngineEvent::Ws(WsEvent::Snapshot {
            ticker: ticker.into(),
            yes: vec![(48, 100)],
            no: vec![(48, 100)], // ask at 52
        }))
        .await
        .unwrap();
    }

    fn fill(ticker: &str, side: Side, action: Action, count: i64, price: i64) -> Fill {
        Fill {
            order_id: "x".into(),
            ticker: ticker.into(),
            side,
            action,
            count,
            price,
            ts_ms: 0,
        }
    }

    /// Scenario: a snapshot arrives for a configured market.
    /// Expected: the engine quotes both sides through the gateway; acks
    /// leave two active orders visible in metrics.
    #[tokio::test]
    async fn test_snapshot_produces_two_sided_quote() {
        let tx = spawn_stack(test_config(vec!["KXA"]));
        send_snapshot(&tx, "KXA").await;
        sleep(Duration::from_millis(100)).await;

        let metrics = get_metrics(&tx).await;
        assert_eq!(metrics.active_orders, 2);
        assert_eq!(metrics.active_markets, 1);
    }

    /// Scenario: pause, then resume, around a live quote.
    /// Expected: pause cancels both orders; resume re-quotes on the next
    /// book event.
    #[tokio::test]
    async fn test_pause_cancels_resume_requotes() {
        let tx = spawn_stack(test_config(vec!["KXA"]));
        send_snapshot(&tx, "KXA").await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(get_metrics(&tx).await.active_orders, 2);

        tx.send(EngineEvent::Command(ControlCommand::Pause))
            .await
            .unwrap();
        sleep(Duration::from_millis(100)).await;
        let state = get_state(&tx).await;
        assert!(state.paused);
        assert_eq!(get_metrics(&tx).await.active_orders, 0);

        tx.send(EngineEvent::Command(ControlCommand::Resume))
            .await
            .unwrap();
        send_snapshot(&tx, "KXA").await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(get_metrics(&tx).await.active_orders, 2);
    }

    /// Scenario: a buy fill then a profitable sell fill.
    /// Expected: realized PnL, fill and volume counters surface in /state.
    #[tokio::test]
    async fn test_fills_update_pnl() {
        let tx = spawn_stack(test_config(vec!["KXA"]));
        tx.send(EngineEvent::Ws(WsEvent::Fill(fill(
            "KXA",
            Side::Yes,
            Action::Buy,
            10,
            50,
        ))))
        .await
        .unwrap();
        tx.send(EngineEvent::Ws(WsEvent::Fill(fill(
            "KXA",
            Side::Yes,
            Action::Sell,
            5,
            55,
        ))))
        .await
        .unwrap();
        sleep(Duration::from_millis(100)).await;

        let state = get_state(&tx).await;
        assert_eq!(state.pnl.fills_today, 2);
        assert_eq!(state.pnl.volume_today, 15);
        assert!((state.pnl.realized_today - 25.0).abs() < 1e-9);
        let pos = &state.positions[0];
        assert_eq!(pos.yes_contracts, 5);
        assert!((pos.cost_basis - 250.0).abs() < 1e-9);
    }

    /// Scenario: losses breach the daily loss limit.
    /// Expected: the engine halts with a reason and cancels resting quotes.
    #[tokio::test]
    async fn test_daily_loss_halts_and_flattens() {
        let mut config = test_config(vec!["KXA"]);
        config.quoting.daily_loss_limit_cents = 100.0;
        let tx = spawn_stack(config);

        send_snapshot(&tx, "KXA").await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(get_metrics(&tx).await.active_orders, 2);

        // Buy 10 @ 60, sell 10 @ 40 → realized -200 < -100 limit.
        tx.send(EngineEvent::Ws(WsEvent::Fill(fill(
            "KXA",
            Side::Yes,
            Action::Buy,
            10,
            60,
        ))))
        .await
        .unwrap();
        tx.send(EngineEvent::Ws(WsEvent::Fill(fill(
            "KXA",
            Side::Yes,
            Action::Sell,
            10,
            40,
        ))))
        .await
        .unwrap();
        sleep(Duration::from_millis(150)).await;

        let state = get_state(&tx).await;
        assert!(state.halted);
        assert!(state.risk.halt_reason.unwrap().contains("daily loss"));
        assert_eq!(get_metrics(&tx).await.active_orders, 0);
    }

    /// Scenario: add a market, quote it, then remove it.
    /// Expected: add replies with the new count; remove cancels its orders
    /// and replies with the shrunken count.
    #[tokio::test]
    async fn test_add_remove_market() {
        let tx = spawn_stack(test_config(vec![]));

        let (reply, rx) = oneshot::channel();
        tx.send(EngineEvent::Command(ControlCommand::AddMarket {
            ticker: "kxb".into(),
            reply,
        }))
        .await
        .unwrap();
        assert_eq!(rx.await.unwrap(), 1);

        send_snapshot(&tx, "KXB").await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(get_metrics(&tx).await.active_orders, 2);

        let (reply, rx) = oneshot::channel();
        tx.send(EngineEvent::Command(ControlCommand::RemoveMarket {
            ticker: "KXB".into(),
            reply,
        }))
        .await
        .unwrap();
        assert_eq!(rx.await.unwrap(), 0);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(get_metrics(&tx).await.active_orders, 0);
    }

    /// Scenario: flatten while quoting.
    /// Expected: all orders cancel and quoting stays stopped (paused) until
    /// resume.
    #[tokio::test]
    async fn test_flatten_stops_quoting() {
        let tx = spawn_stack(test_config(vec!["KXA"]));
        send_snapshot(&tx, "KXA").await;
        sleep(Duration::from_millis(100)).await;

        tx.send(EngineEvent::Command(ControlCommand::Flatten))
            .await
            .unwrap();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(get_metrics(&tx).await.active_orders, 0);

        // A fresh book event must not re-quote while flattened.
        send_snapshot(&tx, "KXA").await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(get_metrics(&tx).await.active_orders, 0);
        assert!(get_state(&tx).await.paused);
    }

    /// Scenario: the book moves one cent.
    /// Expected: the engine replaces both sides at the new prices (cancel
    /// then place per side, observed as still exactly two orders).
    #[tokio::test]
    async fn test_book_move_replaces_quotes() {
        let tx = spawn_stack(test_config(vec!["KXA"]));
        send_snapshot(&tx, "KXA").await;
        sleep(Duration::from_millis(100)).await;

        tx.send(EngineEvent::Ws(WsEvent::Snapshot {
            ticker: "KXA".into(),
            yes: vec![(50, 100)],
            no: vec![(46, 100)], // ask 54, mid 52
        }))
        .await
        .unwrap();
        sleep(Duration::from_millis(150)).await;
        assert_eq!(get_metrics(&tx).await.active_orders, 2);
    }

    /// Scenario: a disconnect while quotes rest.
    /// Expected: books invalidate and resting quotes cancel until the next
    /// snapshot after reconnect.
    #[tokio::test]
    async fn test_disconnect_pulls_quotes() {
        let tx = spawn_stack(test_config(vec!["KXA"]));
        send_snapshot(&tx, "KXA").await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(get_metrics(&tx).await.active_orders, 2);

        tx.send(EngineEvent::Ws(WsEvent::Disconnected)).await.unwrap();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(get_metrics(&tx).await.active_orders, 0);
        assert!(!get_state(&tx).await.connected);

        tx.send(EngineEvent::Ws(WsEvent::Connected)).await.unwrap();
        send_snapshot(&tx, "KXA").await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(get_metrics(&tx).await.active_orders, 2);
    }
}
