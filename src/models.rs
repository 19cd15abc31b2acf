use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Forecast direction for a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UP" => Some(Direction::Up),
            "DOWN" => Some(Direction::Down),
            _ => None,
        }
    }
}

/// Intermediate indicators behind a warm-path forecast
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendIndicators {
    pub sma5: f64,
    pub sma10: f64,
    pub momentum: f64,
}

/// A directional forecast with a confidence score in [50, 85].
///
/// Indicators are absent on cold-start forecasts (fewer than 3 samples
/// of history).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub direction: Direction,
    pub confidence: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indicators: Option<TrendIndicators>,
}

/// Outcome attached to a round exactly once, at resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResolution {
    pub end_price: f64,
    pub actual_direction: Direction,
    pub prediction_correct: bool,
    pub resolved_at: DateTime<Utc>,
}

/// One 15-minute prediction round.
///
/// `prediction` is fixed at creation; `resolution` is write-once and
/// `resolved` flips with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    pub round_number: u64,
    pub start_price: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub prediction: Prediction,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<RoundResolution>,
}

/// Result echoed to the caller when a round is resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionReport {
    pub round_number: u64,
    pub start_price: f64,
    pub end_price: f64,
    /// Signed change formatted to two decimals, e.g. "-12.40"
    pub price_change: String,
    pub actual_direction: Direction,
    pub prediction: Prediction,
    pub prediction_correct: bool,
    pub timestamp: DateTime<Utc>,
}

/// Read-only projection of the current round combined with the live price.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSnapshot {
    /// 0 while no round has ever started
    pub round_number: u64,
    pub start_price: Option<f64>,
    pub current_price: Option<f64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub seconds_left: i64,
    pub prediction: Option<Prediction>,
    pub next_round_time: DateTime<Utc>,
}

/// Typed failures surfaced by the round lifecycle core.
///
/// The core never retries and never swallows; retry policy belongs to
/// the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum RoundError {
    #[error("price unavailable: {0}")]
    PriceUnavailable(String),

    #[error("no active round to resolve")]
    NoActiveRound,

    #[error("round {0} is already resolved")]
    InvalidTransition(u64),
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub price_api_base: String,
    pub symbol: String,
    pub http_timeout_secs: u64,
    pub scheduler_enabled: bool,
    /// Resolve the active round once fewer than this many seconds remain.
    pub resolve_grace_secs: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .unwrap_or(3000);

        let database_path = std::env::var("DATABASE_PATH")
            .unwrap_or_else(|_| "./megapredict_rounds.db".to_string());

        let price_api_base = std::env::var("PRICE_API_BASE")
            .unwrap_or_else(|_| "https://api.binance.com".to_string());

        let symbol = std::env::var("PRICE_SYMBOL").unwrap_or_else(|_| "ETHUSDT".to_string());

        let http_timeout_secs = std::env::var("HTTP_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let scheduler_enabled = std::env::var("SCHEDULER_ENABLED")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(true);

        let resolve_grace_secs = std::env::var("RESOLVE_GRACE_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        Ok(Self {
            port,
            database_path,
            price_api_base,
            symbol,
            http_timeout_secs,
            scheduler_enabled,
            resolve_grace_secs,
        })
    }
}
