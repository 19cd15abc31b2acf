//! Round event relay.
//!
//! Mirrors round lifecycle events to an external ledger as a
//! fire-and-forget side effect: callers log relay failures and never
//! roll back state that was already committed locally.

use async_trait::async_trait;
use tracing::info;

use crate::models::{Direction, ResolutionReport, Round};

/// Fixed-point scale shared with the downstream ledger (8 decimals).
/// Both prices and any chain-side representation must use this scale so
/// the forecast layer and the ledger never drift.
pub const PRICE_SCALE: i64 = 100_000_000;

/// Scale a float price into ledger fixed-point, flooring.
pub fn to_scaled_price(price: f64) -> i64 {
    (price * PRICE_SCALE as f64).floor() as i64
}

/// Ledger encoding of a direction: UP = 1, DOWN = 2.
pub fn direction_code(direction: Direction) -> u8 {
    match direction {
        Direction::Up => 1,
        Direction::Down => 2,
    }
}

#[async_trait]
pub trait RoundRelay: Send + Sync {
    async fn on_round_started(&self, round: &Round) -> anyhow::Result<()>;
    async fn on_round_resolved(&self, report: &ResolutionReport) -> anyhow::Result<()>;
}

/// Default sink: records round events to the structured log in ledger
/// encoding. Stands in wherever no external ledger is wired up.
pub struct LogRelay;

#[async_trait]
impl RoundRelay for LogRelay {
    async fn on_round_started(&self, round: &Round) -> anyhow::Result<()> {
        info!(
            round = round.round_number,
            start_price_scaled = to_scaled_price(round.start_price),
            prediction = direction_code(round.prediction.direction),
            confidence = round.prediction.confidence,
            "📤 round start relayed"
        );
        Ok(())
    }

    async fn on_round_resolved(&self, report: &ResolutionReport) -> anyhow::Result<()> {
        info!(
            round = report.round_number,
            end_price_scaled = to_scaled_price(report.end_price),
            actual = direction_code(report.actual_direction),
            correct = report.prediction_correct,
            "📤 round resolution relayed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prices_scale_by_1e8_with_floor() {
        assert_eq!(to_scaled_price(2000.0), 200_000_000_000);
        assert_eq!(to_scaled_price(0.25), 25_000_000);
        // Fractional remainders floor, never round up.
        assert_eq!(to_scaled_price(0.123456789), 12_345_678);
    }

    #[test]
    fn direction_codes_match_the_ledger_enum() {
        assert_eq!(direction_code(Direction::Up), 1);
        assert_eq!(direction_code(Direction::Down), 2);
    }
}
