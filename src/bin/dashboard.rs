//! Terminal dashboard: polls the bot's control plane and renders live
//! state -- PnL, risk, drawdown, circuit breaker, positions.
//!
//! Usage: cargo run --bin dashboard -- [http://host:port]
//! Keys: [p] pause | [r] resume | [f] flatten | [q/Esc] quit

use std::io::stdout;
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event as CEvent, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;
use ratatui::widgets::*;
use serde_json::Value;

const POLL_INTERVAL: Duration = Duration::from_millis(1_000);

const BORDER: Style = Style::new().fg(Color::DarkGray);

struct App {
    base: String,
    http: reqwest::Client,
    state: Option<Value>,
    metrics: Option<Value>,
    last_error: Option<String>,
    last_poll: Instant,
}

impl App {
    fn new(base: String) -> Self {
        Self {
            base,
            http: reqwest::Client::new(),
            state: None,
            metrics: None,
            last_error: None,
            last_poll: Instant::now() - POLL_INTERVAL,
        }
    }

    async fn refresh(&mut self) {
        match self.fetch("/state").await {
            Ok(v) => {
                self.state = Some(v);
                self.last_error = None;
            }
            Err(e) => self.last_error = Some(e),
        }
        if let Ok(v) = self.fetch("/metrics").await {
            self.metrics = Some(v);
        }
        self.last_poll = Instant::now();
    }

    async fn fetch(&self, path: &str) -> Result<Value, String> {
        self.http
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())
    }

    async fn post(&self, path: &str) {
        let _ = self.http.post(format!("{}{}", self.base, path)).send().await;
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let base = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://127.0.0.1:8090".to_string());
    let mut app = App::new(base);

    enable_raw_mode()?;
    execute!(stdout(), EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    loop {
        if app.last_poll.elapsed() >= POLL_INTERVAL {
            app.refresh().await;
        }
        terminal.draw(|frame| draw(&app, frame))?;

        if event::poll(Duration::from_millis(100))? {
            if let CEvent::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => break,
                    KeyCode::Char('p') => app.post("/pause").await,
                    KeyCode::Char('r') => app.post("/resume").await,
                    KeyCode::Char('f') => app.post("/flatten").await,
                    _ => {}
                }
            }
        }
    }

    disable_raw_mode()?;
    execute!(stdout(), LeaveAlternateScreen)?;
    Ok(())
}

// ─── Rendering ───

fn draw(app: &App, frame: &mut Frame) {
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(10),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    render_header(app, header_area, frame.buffer_mut());
    render_footer(app, footer_area, frame.buffer_mut());

    let [left_area, positions_area] =
        Layout::horizontal([Constraint::Length(44), Constraint::Min(40)]).areas(body_area);

    let [pnl_area, risk_area, breaker_area] = Layout::vertical([
        Constraint::Length(7),
        Constraint::Length(8),
        Constraint::Min(6),
    ])
    .areas(left_area);

    render_pnl(app, pnl_area, frame.buffer_mut());
    render_risk(app, risk_area, frame.buffer_mut());
    render_breaker(app, breaker_area, frame.buffer_mut());
    render_positions(app, positions_area, frame.buffer_mut());
}

fn s<'a>(v: &'a Option<Value>, path: &[&str]) -> Option<&'a Value> {
    let mut cur = v.as_ref()?;
    for key in path {
        cur = cur.get(key)?;
    }
    Some(cur)
}

fn cents(v: Option<&Value>) -> String {
    match v.and_then(Value::as_f64) {
        Some(c) => format!("${:+.2}", c / 100.0),
        None => "--".into(),
    }
}

fn render_header(app: &App, area: Rect, buf: &mut Buffer) {
    let (status, color) = match &app.state {
        None => ("OFFLINE", Color::Red),
        Some(st) => {
            if st["halted"].as_bool().unwrap_or(false) {
                ("HALTED", Color::Red)
            } else if st["paused"].as_bool().unwrap_or(false) {
                ("PAUSED", Color::Yellow)
            } else if st["connected"].as_bool().unwrap_or(false) {
                ("QUOTING", Color::Green)
            } else {
                ("RECONNECTING", Color::Yellow)
            }
        }
    };
    let line = Line::from(vec![
        Span::styled(" kalshi-maker ", Style::new().fg(Color::Black).bg(Color::White)),
        Span::raw(" "),
        Span::styled(status, Style::new().fg(color).bold()),
        Span::raw(format!("  {}", app.base)),
    ]);
    Paragraph::new(line).render(area, buf);
}

fn render_footer(app: &App, area: Rect, buf: &mut Buffer) {
    let err = app
        .last_error
        .as_deref()
        .map(|e| format!("  error: {}", e))
        .unwrap_or_default();
    Paragraph::new(Line::from(vec![
        Span::styled(
            " [p]ause [r]esume [f]latten [q]uit ",
            Style::new().fg(Color::DarkGray),
        ),
        Span::styled(err, Style::new().fg(Color::Red)),
    ]))
    .render(area, buf);
}

fn render_pnl(app: &App, area: Rect, buf: &mut Buffer) {
    let rows = vec![
        Row::new(vec![
            "realized today".to_string(),
            cents(s(&app.state, &["pnl", "realizedToday"])),
        ]),
        Row::new(vec![
            "unrealized".to_string(),
            cents(s(&app.metrics, &["unrealized_pnl"])),
        ]),
        Row::new(vec![
            "fills today".to_string(),
            s(&app.state, &["pnl", "fillsToday"])
                .and_then(Value::as_u64)
                .map_or("--".into(), |v| v.to_string()),
        ]),
        Row::new(vec![
            "volume today".to_string(),
            s(&app.state, &["pnl", "volumeToday"])
                .and_then(Value::as_u64)
                .map_or("--".into(), |v| v.to_string()),
        ]),
        Row::new(vec![
            "latency p50/p95".to_string(),
            match (
                s(&app.metrics, &["latency_p50"]).and_then(Value::as_f64),
                s(&app.metrics, &["latency_p95"]).and_then(Value::as_f64),
            ) {
                (Some(p50), Some(p95)) => format!("{:.1} / {:.1} ms", p50, p95),
                _ => "--".into(),
            },
        ]),
    ];
    Widget::render(
        Table::new(rows, [Constraint::Length(18), Constraint::Min(10)])
            .block(Block::bordered().border_style(BORDER).title(" PnL ")),
        area,
        buf,
    );
}

fn render_risk(app: &App, area: Rect, buf: &mut Buffer) {
    let mult = s(&app.state, &["drawdown", "positionMultiplier"])
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let util = s(&app.state, &["risk", "utilizationPercent"])
        .and_then(Value::as_f64)
        .unwrap_or(0.0);

    let block = Block::bordered().border_style(BORDER).title(" Risk ");
    let inner = block.inner(area);
    block.render(area, buf);

    let [drawdown_area, gauge_area, util_area] = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(2),
        Constraint::Min(1),
    ])
    .areas(inner);

    Paragraph::new(format!(
        "drawdown {}   peak {}",
        cents(s(&app.state, &["drawdown", "drawdown"])),
        cents(s(&app.state, &["drawdown", "peak"])),
    ))
    .render(drawdown_area, buf);

    Gauge::default()
        .label(format!("size multiplier {:.2}", mult))
        .ratio(mult.clamp(0.0, 1.0))
        .gauge_style(Style::new().fg(if mult > 0.75 {
            Color::Green
        } else if mult > 0.25 {
            Color::Yellow
        } else {
            Color::Red
        }))
        .render(gauge_area, buf);

    Gauge::default()
        .label(format!("exposure {:.0}%", util))
        .ratio((util / 100.0).clamp(0.0, 1.0))
        .gauge_style(Style::new().fg(Color::Cyan))
        .render(util_area, buf);
}

fn render_breaker(app: &App, area: Rect, buf: &mut Buffer) {
    let triggered = s(&app.state, &["circuitBreaker", "isTriggered"])
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let mut lines = vec![Line::from(vec![
        Span::raw("state: "),
        if triggered {
            Span::styled("TRIPPED", Style::new().fg(Color::Red).bold())
        } else {
            Span::styled("armed", Style::new().fg(Color::Green))
        },
    ])];
    if let Some(reason) = s(&app.state, &["circuitBreaker", "reason"]).and_then(Value::as_str) {
        lines.push(Line::raw(format!("reason: {}", reason)));
    }
    if let Some(n) =
        s(&app.state, &["circuitBreaker", "consecutiveLosses"]).and_then(Value::as_u64)
    {
        lines.push(Line::raw(format!("consecutive losses: {}", n)));
    }
    if let Some(reason) = s(&app.state, &["risk", "haltReason"]).and_then(Value::as_str) {
        lines.push(Line::from(Span::styled(
            format!("halt: {}", reason),
            Style::new().fg(Color::Red),
        )));
    }
    Paragraph::new(lines)
        .block(Block::bordered().border_style(BORDER).title(" Breaker "))
        .render(area, buf);
}

fn render_positions(app: &App, area: Rect, buf: &mut Buffer) {
    let header = Row::new(vec!["ticker", "yes", "no", "net", "basis", "unrlzd"])
        .style(Style::new().fg(Color::DarkGray));
    let rows: Vec<Row> = s(&app.state, &["positions"])
        .and_then(Value::as_array)
        .map(|positions| {
            positions
                .iter()
                .map(|p| {
                    let net = p["netExposure"].as_i64().unwrap_or(0);
                    Row::new(vec![
                        p["ticker"].as_str().unwrap_or("?").to_string(),
                        p["yesContracts"].as_i64().unwrap_or(0).to_string(),
                        p["noContracts"].as_i64().unwrap_or(0).to_string(),
                        format!("{:+}", net),
                        cents(p.get("costBasis")),
                        cents(p.get("unrealizedPnl")),
                    ])
                    .style(Style::new().fg(if net > 0 {
                        Color::Green
                    } else if net < 0 {
                        Color::Red
                    } else {
                        Color::Gray
                    }))
                })
                .collect()
        })
        .unwrap_or_default();

    Widget::render(
        Table::new(
            rows,
            [
                Constraint::Min(16),
                Constraint::Length(6),
                Constraint::Length(6),
                Constraint::Length(6),
                Constraint::Length(10),
                Constraint::Length(10),
            ],
        )
        .header(header)
        .block(Block::bordered().border_style(BORDER).title(" Positions ")),
        area,
        buf,
    );
}
