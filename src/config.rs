use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("failed to read {path}: {source}")]
    KeyFile {
        path: String,
        source: std::io::Error,
    },
}

// ─── Venue ───

#[derive(Clone)]
pub struct VenueConfig {
    pub api_key_id: String,
    /// RSA private key, PEM text (PKCS#1 or PKCS#8).
    pub private_key_pem: String,
    pub demo: bool,
    /// Override for the REST/WS base; None = derived from `demo`.
    pub base_path: Option<String>,
}

impl VenueConfig {
    pub fn rest_base(&self) -> String {
        match &self.base_path {
            Some(base) => base.clone(),
            None if self.demo => "https://demo-api.kalshi.co/trade-api/v2".into(),
            None => "https://api.elections.kalshi.com/trade-api/v2".into(),
        }
    }

    pub fn ws_url(&self) -> String {
        match &self.base_path {
            Some(base) => format!(
                "{}/trade-api/ws/v2",
                base.trim_end_matches("/trade-api/v2").trim_end_matches('/')
            ),
            None if self.demo => "wss://demo-api.kalshi.co/trade-api/ws/v2".into(),
            None => "wss://api.elections.kalshi.com/trade-api/ws/v2".into(),
        }
    }
}

// ─── Strategy ───

#[derive(Clone, Debug)]
pub struct SymmetricParams {
    pub spread_cents: i64,
    pub size: i64,
    /// Markets closer to expiry than this are not quoted.
    pub min_tte_s: f64,
}

#[derive(Clone, Debug)]
pub struct AvellanedaParams {
    pub gamma: f64,
    pub sigma: f64,
    pub k: f64,
    /// Horizon used when time_to_expiry is unavailable or disabled.
    pub fixed_horizon_s: f64,
    pub use_time_to_expiry: bool,
    pub min_time_to_expiry_s: f64,
    pub max_position: i64,
    pub size: i64,
    pub min_spread: f64,
    pub max_spread: f64,
}

#[derive(Clone, Debug)]
pub struct ZoneParams {
    /// YES prices at or below this are the longshot zone.
    pub longshot_threshold: i64,
    /// YES prices at or above this are the nearly-certain zone.
    pub nearly_certain_threshold: i64,
    pub size: i64,
    pub zone_size_mult: f64,
    pub spread_cents: i64,
    pub max_spread: i64,
    /// Cents added to the quoted spread while the market is flagged adverse.
    pub adverse_widen_cents: i64,
    /// Net-exposure cap inside the longshot zone; beyond it we only flatten.
    pub longshot_cap: i64,
    /// Markets closer to expiry than this are not quoted.
    pub min_tte_s: f64,
}

/// Tagged strategy selection; parameters travel inside the variant.
#[derive(Clone, Debug)]
pub enum StrategyConfig {
    Symmetric(SymmetricParams),
    Avellaneda(AvellanedaParams),
    OptimismTax(ZoneParams),
}

impl StrategyConfig {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyConfig::Symmetric(_) => "symmetric",
            StrategyConfig::Avellaneda(_) => "avellaneda",
            StrategyConfig::OptimismTax(_) => "optimism-tax",
        }
    }
}

// ─── Quoting ───

#[derive(Clone, Debug)]
pub struct QuotingConfig {
    pub markets: Vec<String>,
    pub strategy: StrategyConfig,
    pub size_per_side: i64,
    pub min_spread: i64,
    pub max_spread: i64,
    pub max_position_per_market: i64,
    pub daily_loss_limit_cents: f64,
    pub exposure_limit_contracts: i64,
    /// Books older than this are not quoted.
    pub max_book_age_ms: i64,
}

// ─── Risk ───

#[derive(Clone, Copy, Debug)]
pub struct DrawdownParams {
    pub scale_start: f64,
    pub half_size: f64,
    pub halt: f64,
}

#[derive(Clone, Copy, Debug)]
pub struct CircuitBreakerParams {
    pub max_consecutive_losses: u32,
    pub rapid_window_ms: i64,
    pub rapid_loss_threshold: usize,
    pub cooldown_ms: i64,
}

#[derive(Clone, Copy, Debug)]
pub struct AdverseParams {
    pub window_ms: i64,
    pub consec_threshold: u32,
    pub price_move_cents: i64,
    pub fill_rate_per_min: f64,
    pub score_threshold: f64,
    pub cooldown_ms: i64,
}

#[derive(Clone, Copy, Debug)]
pub struct RiskConfig {
    pub drawdown: DrawdownParams,
    pub circuit_breaker: CircuitBreakerParams,
    pub adverse: AdverseParams,
}

// ─── Control plane / scanner ───

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct ScannerConfig {
    pub enabled: bool,
    pub interval_s: u64,
    pub min_volume_24h: i64,
    pub min_depth: i64,
    pub max_spread: i64,
    pub category_weights: HashMap<String, f64>,
    pub avoid_categories: Vec<String>,
}

// ─── Top level ───

#[derive(Clone)]
pub struct Config {
    pub venue: VenueConfig,
    pub quoting: QuotingConfig,
    pub risk: RiskConfig,
    pub api: ApiConfig,
    pub scanner: ScannerConfig,
    pub order_timeout_ms: u64,
    /// Venue REST budget: tokens per second for the process-wide bucket.
    pub rate_limit_per_s: f64,
    pub dry_run: bool,
}

impl Config {
    /// Load from environment variables. Errors here exit the process with
    /// code 1 (startup/config error).
    pub fn from_env() -> Result<Self, ConfigError> {
        let dry_run = env_bool("DRY_RUN", true);
        let demo = env_bool("KALSHI_DEMO", true);

        let api_key_id = match std::env::var("KALSHI_API_KEY_ID") {
            Ok(v) => v,
            Err(_) if dry_run => String::new(),
            Err(_) => return Err(ConfigError::Missing("KALSHI_API_KEY_ID")),
        };
        let private_key_pem = match std::env::var("KALSHI_PRIVATE_KEY_PEM") {
            Ok(v) => v,
            Err(_) => match std::env::var("KALSHI_PRIVATE_KEY_PATH") {
                Ok(path) => std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::KeyFile { path, source })?,
                Err(_) if dry_run => String::new(),
                Err(_) => return Err(ConfigError::Missing("KALSHI_PRIVATE_KEY_PEM")),
            },
        };

        let markets: Vec<String> = std::env::var("MARKETS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        let min_spread = env_i64("MIN_SPREAD_CENTS", 2)?;
        let max_spread = env_i64("MAX_SPREAD_CENTS", 20)?;
        if min_spread < 1 || max_spread < min_spread {
            return Err(ConfigError::Invalid {
                key: "MIN_SPREAD_CENTS/MAX_SPREAD_CENTS",
                value: format!("{}/{}", min_spread, max_spread),
            });
        }
        let size_per_side = env_i64("SIZE_PER_SIDE", 10)?;
        let max_position = env_i64("MAX_POSITION_PER_MARKET", 100)?;

        let strategy = build_strategy_config(size_per_side, min_spread, max_spread, max_position)?;

        let drawdown = DrawdownParams {
            scale_start: env_f64("DD_SCALE_START_CENTS", 5_000.0)?,
            half_size: env_f64("DD_HALF_SIZE_CENTS", 10_000.0)?,
            halt: env_f64("DD_HALT_CENTS", 20_000.0)?,
        };
        if !(drawdown.scale_start < drawdown.half_size && drawdown.half_size < drawdown.halt) {
            return Err(ConfigError::Invalid {
                key: "DD_SCALE_START_CENTS/DD_HALF_SIZE_CENTS/DD_HALT_CENTS",
                value: format!(
                    "{}/{}/{}",
                    drawdown.scale_start, drawdown.half_size, drawdown.halt
                ),
            });
        }

        Ok(Self {
            venue: VenueConfig {
                api_key_id,
                private_key_pem,
                demo,
                base_path: std::env::var("KALSHI_BASE_PATH").ok(),
            },
            quoting: QuotingConfig {
                markets,
                strategy,
                size_per_side,
                min_spread,
                max_spread,
                max_position_per_market: max_position,
                daily_loss_limit_cents: env_f64("DAILY_LOSS_LIMIT_CENTS", 25_000.0)?,
                exposure_limit_contracts: env_i64("EXPOSURE_LIMIT_CONTRACTS", 500)?,
                max_book_age_ms: env_i64("MAX_BOOK_AGE_MS", 10_000)?,
            },
            risk: RiskConfig {
                drawdown,
                circuit_breaker: CircuitBreakerParams {
                    max_consecutive_losses: env_i64("CB_MAX_CONSEC", 5)? as u32,
                    rapid_window_ms: env_i64("CB_RAPID_WINDOW_MS", 60_000)?,
                    rapid_loss_threshold: env_i64("CB_RAPID_THRESHOLD", 8)? as usize,
                    cooldown_ms: env_i64("CB_COOLDOWN_MS", 300_000)?,
                },
                adverse: AdverseParams {
                    window_ms: env_i64("ADV_WINDOW_MS", 60_000)?,
                    consec_threshold: env_i64("ADV_CONSEC_THRESHOLD", 4)? as u32,
                    price_move_cents: env_i64("ADV_PRICE_MOVE_CENTS", 3)?,
                    fill_rate_per_min: env_f64("ADV_FILL_RATE_PER_MIN", 10.0)?,
                    score_threshold: env_f64("ADV_SCORE_THRESHOLD", 60.0)?,
                    cooldown_ms: env_i64("ADV_COOLDOWN_MS", 120_000)?,
                },
            },
            api: ApiConfig {
                enabled: env_bool("API_ENABLED", true),
                port: env_i64("API_PORT", 8090)? as u16,
            },
            scanner: ScannerConfig {
                enabled: env_bool("SCANNER_ENABLED", false),
                interval_s: env_i64("SCANNER_INTERVAL_S", 300)? as u64,
                min_volume_24h: env_i64("SCANNER_MIN_VOLUME_24H", 10_000)?,
                min_depth: env_i64("SCANNER_MIN_DEPTH", 200)?,
                max_spread: env_i64("SCANNER_MAX_SPREAD_CENTS", 10)?,
                category_weights: parse_weights(
                    &std::env::var("SCANNER_CATEGORY_WEIGHTS").unwrap_or_default(),
                ),
                avoid_categories: std::env::var("SCANNER_AVOID_CATEGORIES")
                    .unwrap_or_default()
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            order_timeout_ms: env_i64("ORDER_TIMEOUT_MS", 5_000)? as u64,
            rate_limit_per_s: env_f64("RATE_LIMIT_PER_S", 8.0)?,
            dry_run,
        })
    }
}

fn build_strategy_config(
    size_per_side: i64,
    min_spread: i64,
    max_spread: i64,
    max_position: i64,
) -> Result<StrategyConfig, ConfigError> {
    let name = std::env::var("STRATEGY").unwrap_or_else(|_| "symmetric".into());
    match name.to_lowercase().as_str() {
        "symmetric" => Ok(StrategyConfig::Symmetric(SymmetricParams {
            spread_cents: env_i64("SPREAD_CENTS", 4)?,
            size: size_per_side,
            min_tte_s: env_f64("QUOTE_MIN_TTE_S", 60.0)?,
        })),
        "avellaneda" => Ok(StrategyConfig::Avellaneda(AvellanedaParams {
            gamma: env_f64("AS_GAMMA", 0.5)?,
            sigma: env_f64("AS_SIGMA", 0.15)?,
            k: env_f64("AS_K", 1.5)?,
            fixed_horizon_s: env_f64("AS_HORIZON_S", 3_600.0)?,
            use_time_to_expiry: env_bool("AS_USE_TIME_TO_EXPIRY", true),
            min_time_to_expiry_s: env_f64("AS_MIN_TTE_S", 300.0)?,
            max_position,
            size: size_per_side,
            min_spread: min_spread as f64,
            max_spread: max_spread as f64,
        })),
        "optimism-tax" => Ok(StrategyConfig::OptimismTax(ZoneParams {
            longshot_threshold: env_i64("ZONE_LONGSHOT_THRESHOLD", 15)?,
            nearly_certain_threshold: env_i64("ZONE_NEARLY_CERTAIN_THRESHOLD", 85)?,
            size: size_per_side,
            zone_size_mult: env_f64("ZONE_SIZE_MULT", 1.5)?,
            spread_cents: env_i64("SPREAD_CENTS", 4)?,
            max_spread,
            adverse_widen_cents: env_i64("ZONE_ADVERSE_WIDEN_CENTS", 2)?,
            longshot_cap: env_i64("ZONE_LONGSHOT_CAP", 50)?,
            min_tte_s: env_f64("QUOTE_MIN_TTE_S", 60.0)?,
        })),
        other => Err(ConfigError::Invalid {
            key: "STRATEGY",
            value: other.to_string(),
        }),
    }
}

/// "Politics=1.2,Economics=0.8" → map. Malformed entries are skipped.
fn parse_weights(raw: &str) -> HashMap<String, f64> {
    raw.split(',')
        .filter_map(|pair| {
            let (name, weight) = pair.split_once('=')?;
            let w: f64 = weight.trim().parse().ok()?;
            Some((name.trim().to_string(), w))
        })
        .collect()
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(default)
}

fn env_i64(key: &'static str, default: i64) -> Result<i64, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v.parse().map_err(|_| ConfigError::Invalid { key, value: v }),
        Err(_) => Ok(default),
    }
}

fn env_f64(key: &'static str, default: f64) -> Result<f64, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v.parse().map_err(|_| ConfigError::Invalid { key, value: v }),
        Err(_) => Ok(default),
    }
}
