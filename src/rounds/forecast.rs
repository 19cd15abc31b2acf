//! Trend forecaster for 15-minute rounds.
//!
//! Deliberately simple moving-average heuristic, not a statistical
//! model: three strict votes (SMA crossover, momentum, price vs SMA5)
//! pick the direction, vote unanimity sets the confidence. The warm
//! path is fully deterministic so forecasts are bit-reproducible for a
//! given history window.

use rand::Rng;

use crate::models::{Direction, Prediction, TrendIndicators};

/// Below this many samples the engine has no signal and falls back to a
/// random bootstrap forecast.
pub const MIN_SAMPLES_FOR_TREND: usize = 3;

/// Forecast the next 15-minute direction from recent prices
/// (most-recent-last).
pub fn predict(history: &[f64]) -> Prediction {
    if history.len() < MIN_SAMPLES_FOR_TREND {
        return cold_start(&mut rand::thread_rng());
    }

    let n = history.len();
    let current = history[n - 1];
    let sma5 = mean(&history[n - n.min(5)..]);
    let sma10 = mean(&history[n - n.min(10)..]);
    let momentum = history[n - 1] - history[n - 3];

    let mut trend_score = 0u8;
    if sma5 > sma10 {
        trend_score += 1;
    }
    if momentum > 0.0 {
        trend_score += 1;
    }
    if current > sma5 {
        trend_score += 1;
    }

    let direction = if trend_score >= 2 {
        Direction::Up
    } else {
        Direction::Down
    };

    // Unanimous votes (0 or 3) score higher than split ones. Floor, not
    // round: 57.5 -> 57.
    let confidence = (50.0 + (f64::from(trend_score) - 1.5).abs() * 15.0)
        .min(85.0)
        .floor() as u8;

    Prediction {
        direction,
        confidence,
        indicators: Some(TrendIndicators {
            sma5,
            sma10,
            momentum,
        }),
    }
}

/// Bootstrap forecast when history is too short: uniform direction,
/// confidence uniform in [50, 69].
fn cold_start<R: Rng>(rng: &mut R) -> Prediction {
    let direction = if rng.gen_bool(0.5) {
        Direction::Up
    } else {
        Direction::Down
    };

    Prediction {
        direction,
        confidence: rng.gen_range(50..70),
        indicators: None,
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
