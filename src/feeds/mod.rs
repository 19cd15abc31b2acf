pub mod binance;

pub use binance::BinanceTicker;

use async_trait::async_trait;

use crate::models::RoundError;

/// Source of the current market price.
///
/// Implementations must fail with `PriceUnavailable` rather than hand
/// back a stale or guessed value.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn current_price(&self) -> Result<f64, RoundError>;
}
