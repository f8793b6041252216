use std::collections::{HashMap, VecDeque};

use crate::config::{AdverseParams, CircuitBreakerParams, DrawdownParams, RiskConfig};
use crate::types::{Action, CircuitBreakerView, DrawdownView, Fill, Side};

// ─── Drawdown ─────────────────────────────────────────────────────────────────

/// Tracks peak/current PnL and scales position size as drawdown deepens.
/// Peak never decreases between resets, so a book that starts at 0 and
/// bleeds to -200 carries a 200c drawdown.
pub struct DrawdownManager {
    params: DrawdownParams,
    peak: f64,
    current: f64,
}

impl DrawdownManager {
    pub fn new(params: DrawdownParams) -> Self {
        Self {
            params,
            peak: 0.0,
            current: 0.0,
        }
    }

    pub fn on_pnl_update(&mut self, pnl: f64) {
        self.current = pnl;
        if pnl > self.peak {
            self.peak = pnl;
        }
    }

    #[inline]
    pub fn drawdown(&self) -> f64 {
        self.peak - self.current
    }

    /// Size multiplier: full size below scale_start, scaled into half size,
    /// then into zero at the halt line.
    pub fn multiplier(&self) -> f64 {
        let dd = self.drawdown();
        let p = &self.params;
        if dd >= p.halt {
            0.0
        } else if dd >= p.half_size {
            0.5 * (p.halt - dd) / (p.halt - p.half_size)
        } else if dd >= p.scale_start {
            1.0 - 0.5 * dd / p.halt
        } else {
            1.0
        }
    }

    pub fn should_halt(&self) -> bool {
        self.drawdown() >= self.params.halt
    }

    pub fn reset(&mut self) {
        self.peak = self.current;
    }

    pub fn view(&self) -> DrawdownView {
        DrawdownView {
            drawdown: self.drawdown(),
            position_multiplier: self.multiplier(),
            peak: self.peak,
            current: self.current,
        }
    }
}

// ─── Circuit breaker ──────────────────────────────────────────────────────────

/// Halts quoting after a run of consecutive losing fills or a burst of
/// losses inside a short window. A win never un-triggers it; only cooldown
/// expiry or an explicit reset does.
pub struct CircuitBreaker {
    params: CircuitBreakerParams,
    consecutive_losses: u32,
    /// Timestamps of recent losing fills.
    loss_window: VecDeque<i64>,
    triggered: bool,
    reason: Option<String>,
    cooldown_until: i64,
}

impl CircuitBreaker {
    pub fn new(params: CircuitBreakerParams) -> Self {
        Self {
            params,
            consecutive_losses: 0,
            loss_window: VecDeque::new(),
            triggered: false,
            reason: None,
            cooldown_until: 0,
        }
    }

    pub fn on_fill_pnl(&mut self, pnl: f64, now_ms: i64) {
        if pnl > 0.0 {
            if !self.triggered {
                self.consecutive_losses = 0;
            }
            return;
        }
        if pnl == 0.0 {
            return;
        }

        self.consecutive_losses += 1;
        self.loss_window.push_back(now_ms);
        let cutoff = now_ms - self.params.rapid_window_ms;
        while self.loss_window.front().is_some_and(|&ts| ts < cutoff) {
            self.loss_window.pop_front();
        }

        if self.triggered {
            return;
        }
        if self.consecutive_losses >= self.params.max_consecutive_losses {
            self.trigger("consecutive losses", now_ms);
        } else if self.loss_window.len() >= self.params.rapid_loss_threshold {
            self.trigger("rapid losses", now_ms);
        }
    }

    fn trigger(&mut self, reason: &str, now_ms: i64) {
        self.triggered = true;
        self.reason = Some(reason.to_string());
        self.cooldown_until = now_ms + self.params.cooldown_ms;
    }

    /// Auto-untriggers once the cooldown has passed.
    pub fn is_triggered(&mut self, now_ms: i64) -> bool {
        if self.triggered && now_ms > self.cooldown_until {
            self.force_reset();
        }
        self.triggered
    }

    pub fn force_reset(&mut self) {
        self.triggered = false;
        self.reason = None;
        self.cooldown_until = 0;
        self.consecutive_losses = 0;
        self.loss_window.clear();
    }

    pub fn view(&self) -> CircuitBreakerView {
        CircuitBreakerView {
            is_triggered: self.triggered,
            reason: self.reason.clone(),
            consecutive_losses: self.consecutive_losses,
            cooldown_ends_at: self.triggered.then_some(self.cooldown_until),
        }
    }
}

// ─── Adverse selection ────────────────────────────────────────────────────────

struct AdverseStats {
    /// Timestamps of fills inside the sliding window.
    fill_times: VecDeque<i64>,
    consecutive_buys: u32,
    consecutive_sells: u32,
    /// Direction and YES-space price of the most recent fill.
    last_action: Option<Action>,
    price_at_last_fill: i64,
    score: f64,
    flagged_until: i64,
}

impl AdverseStats {
    fn new() -> Self {
        Self {
            fill_times: VecDeque::new(),
            consecutive_buys: 0,
            consecutive_sells: 0,
            last_action: None,
            price_at_last_fill: 0,
            score: 0.0,
            flagged_until: 0,
        }
    }
}

/// Flags markets where our fills keep preceding unfavorable mark moves.
/// Score 0..100 from three factors: same-direction fill runs (0-40), the
/// last fill's direction vs. the subsequent mark move (0-40), and raw fill
/// rate (0-20).
pub struct AdverseSelectionDetector {
    params: AdverseParams,
    stats: HashMap<String, AdverseStats>,
}

impl AdverseSelectionDetector {
    pub fn new(params: AdverseParams) -> Self {
        Self {
            params,
            stats: HashMap::new(),
        }
    }

    pub fn record_fill(&mut self, fill: &Fill, mark: i64, now_ms: i64) {
        // Normalize to YES space: buying NO is selling YES exposure, and a
        // NO price p marks the YES book at 100 - p.
        let action = match (fill.side, fill.action) {
            (Side::Yes, a) => a,
            (Side::No, Action::Buy) => Action::Sell,
            (Side::No, Action::Sell) => Action::Buy,
        };
        let yes_price = match fill.side {
            Side::Yes => fill.price,
            Side::No => 100 - fill.price,
        };

        let params = self.params;
        let stats = self
            .stats
            .entry(fill.ticker.clone())
            .or_insert_with(AdverseStats::new);

        match action {
            Action::Buy => {
                stats.consecutive_buys += 1;
                stats.consecutive_sells = 0;
            }
            Action::Sell => {
                stats.consecutive_sells += 1;
                stats.consecutive_buys = 0;
            }
        }
        stats.last_action = Some(action);
        stats.price_at_last_fill = yes_price;
        stats.fill_times.push_back(now_ms);

        Self::rescore(stats, &params, mark, now_ms);
    }

    /// Mark update for a ticker; re-evaluates the score so a post-fill move
    /// can flag the market without another fill.
    pub fn update_price(&mut self, ticker: &str, mark: i64, now_ms: i64) {
        let params = self.params;
        if let Some(stats) = self.stats.get_mut(ticker) {
            Self::rescore(stats, &params, mark, now_ms);
        }
    }

    fn rescore(stats: &mut AdverseStats, params: &AdverseParams, mark: i64, now_ms: i64) {
        let cutoff = now_ms - params.window_ms;
        while stats.fill_times.front().is_some_and(|&ts| ts < cutoff) {
            stats.fill_times.pop_front();
        }

        // Factor A (0-40): run of same-direction fills past the threshold.
        let consec = stats.consecutive_buys.max(stats.consecutive_sells);
        let factor_a = if consec >= params.consec_threshold {
            (20.0 + 10.0 * (consec - params.consec_threshold) as f64).min(40.0)
        } else {
            0.0
        };

        // Factor B (0-40): last fill's direction vs. the mark move since.
        // "Sold and price rose" / "bought and price fell" past the cents
        // threshold is the adverse pattern.
        let factor_b = match stats.last_action {
            Some(action) => {
                let move_cents = mark - stats.price_at_last_fill;
                let adverse_move = match action {
                    Action::Sell => move_cents,
                    Action::Buy => -move_cents,
                };
                let overage = adverse_move - params.price_move_cents;
                if overage > 0 {
                    (10.0 * overage as f64).min(40.0)
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        // Factor C (0-20): fills per minute past the configured rate.
        let rate = stats.fill_times.len() as f64 * 60_000.0 / params.window_ms as f64;
        let factor_c = if rate > params.fill_rate_per_min {
            (4.0 * (rate - params.fill_rate_per_min)).min(20.0)
        } else {
            0.0
        };

        stats.score = (factor_a + factor_b + factor_c).clamp(0.0, 100.0);
        if stats.score >= params.score_threshold {
            stats.flagged_until = now_ms + params.cooldown_ms;
        }
    }

    /// True while a flag cooldown is running; clears by expiry.
    pub fn is_adverse(&self, ticker: &str, now_ms: i64) -> bool {
        self.stats
            .get(ticker)
            .is_some_and(|s| s.flagged_until > now_ms)
    }

    pub fn score(&self, ticker: &str) -> f64 {
        self.stats.get(ticker).map_or(0.0, |s| s.score)
    }

    pub fn remove(&mut self, ticker: &str) {
        self.stats.remove(ticker);
    }
}

// ─── Aggregate ────────────────────────────────────────────────────────────────

/// Process-wide risk state owned by the quoting task: drawdown scaling,
/// circuit breaker, adverse detector, and the hard global limits.
pub struct RiskEngine {
    pub drawdown: DrawdownManager,
    pub breaker: CircuitBreaker,
    pub adverse: AdverseSelectionDetector,
    daily_loss_limit: f64,
    exposure_limit: i64,
    halted: bool,
    halt_reason: Option<String>,
    /// Fatal halts (inventory invariant violations) survive resume.
    halt_fatal: bool,
}

impl RiskEngine {
    pub fn new(risk: RiskConfig, daily_loss_limit: f64, exposure_limit: i64) -> Self {
        Self {
            drawdown: DrawdownManager::new(risk.drawdown),
            breaker: CircuitBreaker::new(risk.circuit_breaker),
            adverse: AdverseSelectionDetector::new(risk.adverse),
            daily_loss_limit,
            exposure_limit,
            halted: false,
            halt_reason: None,
            halt_fatal: false,
        }
    }

    /// Feed a fill's realized PnL plus the new totals through every check.
    pub fn on_fill_pnl(
        &mut self,
        fill_pnl: f64,
        realized_total: f64,
        daily_pnl: f64,
        total_exposure: i64,
        now_ms: i64,
    ) {
        self.breaker.on_fill_pnl(fill_pnl, now_ms);
        self.drawdown.on_pnl_update(realized_total);
        if self.drawdown.should_halt() {
            self.halt("drawdown limit", false);
        }
        self.check_limits(daily_pnl, total_exposure);
    }

    pub fn check_limits(&mut self, daily_pnl: f64, total_exposure: i64) {
        if daily_pnl <= -self.daily_loss_limit {
            self.halt("daily loss limit", false);
        }
        if total_exposure > self.exposure_limit {
            self.halt("exposure limit", false);
        }
    }

    pub fn halt(&mut self, reason: &str, fatal: bool) {
        if self.halted && self.halt_fatal {
            return;
        }
        self.halted = true;
        self.halt_fatal = fatal;
        self.halt_reason = Some(reason.to_string());
    }

    /// Operator resume clears a limit halt; fatal halts stay until restart.
    pub fn clear_halt(&mut self) {
        if !self.halt_fatal {
            self.halted = false;
            self.halt_reason = None;
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halt_reason.as_deref()
    }

    pub fn position_multiplier(&self) -> f64 {
        self.drawdown.multiplier()
    }

    pub fn exposure_limit(&self) -> i64 {
        self.exposure_limit
    }
}
