use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::ScannerConfig;

/// One row of the venue's market listing, as much of it as scoring needs.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MarketListing {
    pub ticker: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub yes_bid: i64,
    #[serde(default)]
    pub yes_ask: i64,
    #[serde(default)]
    pub volume_24h: i64,
    /// Resting contracts across the book, the venue's depth proxy.
    #[serde(default)]
    pub liquidity: i64,
}

#[derive(Debug, Deserialize)]
struct MarketsResponse {
    #[serde(default)]
    markets: Vec<MarketListing>,
}

/// A candidate market ranked for the operator. Scores are relative within
/// one scan, not comparable across scans.
#[derive(Clone, Debug, Serialize)]
pub struct ScanResult {
    pub ticker: String,
    pub title: String,
    pub category: String,
    pub yes_bid: i64,
    pub yes_ask: i64,
    pub spread: i64,
    pub volume_24h: i64,
    pub liquidity: i64,
    pub score: f64,
}

/// Periodically ranks open markets by liquidity, spread, volume, and
/// category weight so the operator can pick what to quote. Read-only and
/// outside the quoting core; results are surfaced through /scan.
pub struct Scanner {
    http: reqwest::Client,
    base: String,
    config: ScannerConfig,
}

impl Scanner {
    pub fn new(base: String, config: ScannerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base,
            config,
        }
    }

    pub async fn scan(&self) -> Result<Vec<ScanResult>, reqwest::Error> {
        let url = format!("{}/markets?status=open&limit=200", self.base);
        let resp: MarketsResponse = self.http.get(&url).send().await?.json().await?;
        Ok(rank(resp.markets, &self.config))
    }
}

/// Filter and score one listing batch. Pure so the ranking is testable
/// without a venue.
pub fn rank(markets: Vec<MarketListing>, config: &ScannerConfig) -> Vec<ScanResult> {
    let mut results: Vec<ScanResult> = markets
        .into_iter()
        .filter_map(|m| score(m, config))
        .collect();
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results
}

fn score(m: MarketListing, config: &ScannerConfig) -> Option<ScanResult> {
    if config.avoid_categories.iter().any(|c| c == &m.category) {
        return None;
    }
    if m.yes_bid <= 0 || m.yes_ask <= 0 || m.yes_ask <= m.yes_bid {
        return None;
    }
    let spread = m.yes_ask - m.yes_bid;
    if spread > config.max_spread
        || m.volume_24h < config.min_volume_24h
        || m.liquidity < config.min_depth
    {
        return None;
    }

    // Each component normalized to [0, 1] against its config floor, spread
    // inverted so tighter is better.
    let volume = ((m.volume_24h as f64) / (config.min_volume_24h.max(1) as f64)).min(10.0) / 10.0;
    let depth = ((m.liquidity as f64) / (config.min_depth.max(1) as f64)).min(10.0) / 10.0;
    let tightness = (config.max_spread - spread) as f64 / config.max_spread as f64;
    let weight = config.category_weights.get(&m.category).copied().unwrap_or(1.0);
    let score = (0.4 * volume + 0.4 * depth + 0.2 * tightness) * weight;

    Some(ScanResult {
        ticker: m.ticker,
        title: m.title,
        category: m.category,
        yes_bid: m.yes_bid,
        yes_ask: m.yes_ask,
        spread,
        volume_24h: m.volume_24h,
        liquidity: m.liquidity,
        score,
    })
}

/// Background refresh loop; results land in the shared cache read by /scan.
pub async fn scanner_loop(
    scanner: Arc<Scanner>,
    cache: Arc<RwLock<Vec<ScanResult>>>,
    interval_s: u64,
) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_s.max(10)));
    loop {
        interval.tick().await;
        match scanner.scan().await {
            Ok(results) => {
                info!(count = results.len(), "scan complete");
                *cache.write().await = results;
            }
            Err(e) => warn!(error = %e, "scan failed"),
        }
    }
}
