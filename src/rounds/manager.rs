//! Round lifecycle state machine.
//!
//! Owns the single "current round" slot and the price-history window
//! behind one lock, so start/resolve transitions are serialized and
//! every read is an atomic snapshot. States: EMPTY (nothing ever
//! started) -> ACTIVE -> RESOLVED; the next start supersedes the slot
//! under `round_number + 1`.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::models::{
    Direction, ResolutionReport, Round, RoundError, RoundResolution, RoundSnapshot,
};
use crate::rounds::forecast;
use crate::rounds::history::{PriceHistory, PriceSample};

/// Fixed round length: 15 minutes.
pub const ROUND_DURATION_SECS: i64 = 900;

struct RoundBook {
    /// Highest round number ever allocated; 0 means EMPTY.
    last_round_number: u64,
    current: Option<Round>,
    history: PriceHistory,
}

pub struct RoundManager {
    book: Mutex<RoundBook>,
}

impl Default for RoundManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundManager {
    pub fn new() -> Self {
        Self::with_last_round_number(0)
    }

    /// Seed the round counter, e.g. from the highest persisted round
    /// number, so numbering stays monotonic across restarts.
    pub fn with_last_round_number(last_round_number: u64) -> Self {
        Self {
            book: Mutex::new(RoundBook {
                last_round_number,
                current: None,
                history: PriceHistory::new(),
            }),
        }
    }

    /// Open the next round at the given start price.
    ///
    /// Records the price into history, forecasts from the window and
    /// replaces the current slot. The superseded round is dropped;
    /// callers needing it must persist it beforehand.
    pub fn start_round(&self, price: f64) -> Result<Round, RoundError> {
        self.start_round_at(price, Utc::now())
    }

    pub fn start_round_at(&self, price: f64, now: DateTime<Utc>) -> Result<Round, RoundError> {
        // Validate before touching shared state: a bad price must leave
        // both the slot and the history window exactly as they were.
        let price = validate_price(price)?;

        let mut book = self.book.lock();
        book.history.record(PriceSample {
            ts: now.timestamp(),
            price,
        });
        let prediction = forecast::predict(&book.history.snapshot());

        let round_number = book.last_round_number + 1;
        let round = Round {
            round_number,
            start_price: price,
            start_time: now,
            end_time: now + Duration::seconds(ROUND_DURATION_SECS),
            prediction,
            resolved: false,
            resolution: None,
        };

        book.last_round_number = round_number;
        book.current = Some(round.clone());
        Ok(round)
    }

    /// Resolve the active round against the given end price.
    ///
    /// Zero change counts as UP. Re-resolving an already-resolved round
    /// is rejected with `InvalidTransition`.
    pub fn resolve_round(&self, end_price: f64) -> Result<ResolutionReport, RoundError> {
        self.resolve_round_at(end_price, Utc::now())
    }

    pub fn resolve_round_at(
        &self,
        end_price: f64,
        now: DateTime<Utc>,
    ) -> Result<ResolutionReport, RoundError> {
        let end_price = validate_price(end_price)?;

        let mut book = self.book.lock();
        let round = book.current.as_mut().ok_or(RoundError::NoActiveRound)?;
        if round.resolved {
            return Err(RoundError::InvalidTransition(round.round_number));
        }

        let price_change = end_price - round.start_price;
        let actual_direction = if price_change >= 0.0 {
            Direction::Up
        } else {
            Direction::Down
        };
        let prediction_correct = actual_direction == round.prediction.direction;

        round.resolved = true;
        round.resolution = Some(RoundResolution {
            end_price,
            actual_direction,
            prediction_correct,
            resolved_at: now,
        });

        Ok(ResolutionReport {
            round_number: round.round_number,
            start_price: round.start_price,
            end_price,
            price_change: format!("{:.2}", price_change),
            actual_direction,
            prediction: round.prediction.clone(),
            prediction_correct,
            timestamp: now,
        })
    }

    /// Whole seconds until the current round ends; 0 when EMPTY or past
    /// the end.
    pub fn time_remaining(&self) -> i64 {
        self.time_remaining_at(Utc::now())
    }

    pub fn time_remaining_at(&self, now: DateTime<Utc>) -> i64 {
        let book = self.book.lock();
        match &book.current {
            Some(round) => seconds_until(round.end_time, now),
            None => 0,
        }
    }

    /// True when an unresolved round has fewer than `grace_secs`
    /// seconds left. The scheduler polls this to fire resolution
    /// exactly once.
    pub fn needs_resolution(&self, grace_secs: i64, now: DateTime<Utc>) -> bool {
        let book = self.book.lock();
        match &book.current {
            Some(round) => !round.resolved && seconds_until(round.end_time, now) < grace_secs,
            None => false,
        }
    }

    pub fn current_round(&self) -> Option<Round> {
        self.book.lock().current.clone()
    }

    /// Read-only projection combining the stored round with a live
    /// price, for the `/api/round` endpoint.
    pub fn snapshot(&self, current_price: Option<f64>) -> RoundSnapshot {
        self.snapshot_at(current_price, Utc::now())
    }

    pub fn snapshot_at(&self, current_price: Option<f64>, now: DateTime<Utc>) -> RoundSnapshot {
        let book = self.book.lock();
        let (round_number, start_price, start_time, end_time, seconds_left, prediction) =
            match &book.current {
                Some(round) => (
                    round.round_number,
                    Some(round.start_price),
                    Some(round.start_time),
                    Some(round.end_time),
                    seconds_until(round.end_time, now),
                    Some(round.prediction.clone()),
                ),
                None => (0, None, None, None, 0, None),
            };

        RoundSnapshot {
            round_number,
            start_price,
            current_price,
            start_time,
            end_time,
            seconds_left,
            prediction,
            next_round_time: next_scheduled_start(now),
        }
    }
}

/// Next wall-clock instant whose minute-of-hour is a multiple of 15
/// (:00, :15, :30, :45), seconds zeroed. An exact mark rolls to the
/// following one.
pub fn next_scheduled_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let next_ts = (now.timestamp().div_euclid(ROUND_DURATION_SECS) + 1) * ROUND_DURATION_SECS;
    DateTime::<Utc>::from_timestamp(next_ts, 0).unwrap_or(now)
}

fn seconds_until(end_time: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    ((end_time - now).num_milliseconds() / 1000).max(0)
}

fn validate_price(price: f64) -> Result<f64, RoundError> {
    if price.is_finite() && price > 0.0 {
        Ok(price)
    } else {
        Err(RoundError::PriceUnavailable(format!(
            "invalid price: {price}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Prediction;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, h, m, s).unwrap()
    }

    #[test]
    fn round_numbers_increment_from_one() {
        let manager = RoundManager::new();
        let now = at(12, 0, 0);

        for expected in 1..=3u64 {
            let round = manager.start_round_at(2000.0, now).unwrap();
            assert_eq!(round.round_number, expected);
        }
    }

    #[test]
    fn seeded_counter_continues_after_restart() {
        let manager = RoundManager::with_last_round_number(41);
        let round = manager.start_round_at(2000.0, at(12, 0, 0)).unwrap();
        assert_eq!(round.round_number, 42);
    }

    #[test]
    fn start_stamps_a_15_minute_window() {
        let manager = RoundManager::new();
        let now = at(12, 0, 0);
        let round = manager.start_round_at(2000.0, now).unwrap();

        assert_eq!(round.start_time, now);
        assert_eq!(round.end_time, now + Duration::seconds(900));
        assert!(!round.resolved);
        assert_eq!(round.start_price, 2000.0);
    }

    #[test]
    fn start_rejects_invalid_prices_without_mutating_state() {
        let manager = RoundManager::new();
        let first = manager.start_round_at(2000.0, at(12, 0, 0)).unwrap();

        for bad in [f64::NAN, f64::INFINITY, 0.0, -5.0] {
            let err = manager.start_round_at(bad, at(12, 15, 0)).unwrap_err();
            assert!(matches!(err, RoundError::PriceUnavailable(_)));
        }

        // Previous round intact, numbering untouched, history unchanged.
        let current = manager.current_round().unwrap();
        assert_eq!(current.round_number, first.round_number);
        assert_eq!(manager.book.lock().history.len(), 1);
    }

    #[test]
    fn resolution_matches_prediction_when_price_rises() {
        let manager = RoundManager::new();
        manager.start_round_at(2000.0, at(12, 0, 0)).unwrap();
        // Fix the prediction so the assertion is deterministic even for
        // a cold-start round.
        manager.book.lock().current.as_mut().unwrap().prediction = Prediction {
            direction: Direction::Up,
            confidence: 57,
            indicators: None,
        };

        let report = manager.resolve_round_at(2100.0, at(12, 15, 0)).unwrap();
        assert_eq!(report.actual_direction, Direction::Up);
        assert!(report.prediction_correct);
        assert_eq!(report.price_change, "100.00");
        assert_eq!(report.start_price, 2000.0);
        assert_eq!(report.end_price, 2100.0);

        let round = manager.current_round().unwrap();
        assert!(round.resolved);
        assert!(round.resolution.unwrap().prediction_correct);
    }

    #[test]
    fn zero_change_counts_as_up() {
        let manager = RoundManager::new();
        manager.start_round_at(2000.0, at(12, 0, 0)).unwrap();

        let report = manager.resolve_round_at(2000.0, at(12, 15, 0)).unwrap();
        assert_eq!(report.actual_direction, Direction::Up);
        assert_eq!(report.price_change, "0.00");
    }

    #[test]
    fn falling_price_resolves_down_with_signed_change() {
        let manager = RoundManager::new();
        manager.start_round_at(2000.0, at(12, 0, 0)).unwrap();
        manager.book.lock().current.as_mut().unwrap().prediction = Prediction {
            direction: Direction::Up,
            confidence: 57,
            indicators: None,
        };

        let report = manager.resolve_round_at(1987.6, at(12, 15, 0)).unwrap();
        assert_eq!(report.actual_direction, Direction::Down);
        assert!(!report.prediction_correct);
        assert_eq!(report.price_change, "-12.40");
    }

    #[test]
    fn resolve_without_a_round_is_rejected() {
        let manager = RoundManager::new();
        let err = manager.resolve_round_at(2000.0, at(12, 0, 0)).unwrap_err();
        assert!(matches!(err, RoundError::NoActiveRound));
    }

    #[test]
    fn double_resolution_is_rejected() {
        let manager = RoundManager::new();
        manager.start_round_at(2000.0, at(12, 0, 0)).unwrap();
        manager.resolve_round_at(2100.0, at(12, 15, 0)).unwrap();

        let err = manager.resolve_round_at(2200.0, at(12, 16, 0)).unwrap_err();
        assert!(matches!(err, RoundError::InvalidTransition(1)));

        // The first resolution is still the one on record.
        let resolution = manager.current_round().unwrap().resolution.unwrap();
        assert_eq!(resolution.end_price, 2100.0);
    }

    #[test]
    fn failed_resolution_leaves_round_unresolved() {
        let manager = RoundManager::new();
        manager.start_round_at(2000.0, at(12, 0, 0)).unwrap();

        let err = manager.resolve_round_at(f64::NAN, at(12, 15, 0)).unwrap_err();
        assert!(matches!(err, RoundError::PriceUnavailable(_)));
        assert!(!manager.current_round().unwrap().resolved);
    }

    #[test]
    fn starting_again_supersedes_a_resolved_round() {
        let manager = RoundManager::new();
        manager.start_round_at(2000.0, at(12, 0, 0)).unwrap();
        manager.resolve_round_at(2100.0, at(12, 15, 0)).unwrap();

        let next = manager.start_round_at(2100.0, at(12, 15, 0)).unwrap();
        assert_eq!(next.round_number, 2);
        assert!(!next.resolved);
    }

    #[test]
    fn time_remaining_floors_to_whole_seconds() {
        let manager = RoundManager::new();
        let start = at(12, 0, 0);
        manager.start_round_at(2000.0, start).unwrap();
        let end = start + Duration::seconds(900);

        assert_eq!(manager.time_remaining_at(start), 900);
        assert_eq!(manager.time_remaining_at(end), 0);
        assert_eq!(manager.time_remaining_at(end - Duration::seconds(1)), 1);
        assert_eq!(
            manager.time_remaining_at(end - Duration::milliseconds(1500)),
            1
        );
        // Past the end clamps at zero.
        assert_eq!(manager.time_remaining_at(end + Duration::seconds(5)), 0);
    }

    #[test]
    fn time_remaining_is_zero_when_empty() {
        let manager = RoundManager::new();
        assert_eq!(manager.time_remaining_at(at(12, 0, 0)), 0);
    }

    #[test]
    fn needs_resolution_only_inside_the_grace_window() {
        let manager = RoundManager::new();
        let start = at(12, 0, 0);
        manager.start_round_at(2000.0, start).unwrap();
        let end = start + Duration::seconds(900);

        assert!(!manager.needs_resolution(30, start));
        assert!(!manager.needs_resolution(30, end - Duration::seconds(30)));
        assert!(manager.needs_resolution(30, end - Duration::seconds(29)));
        assert!(manager.needs_resolution(30, end + Duration::seconds(10)));

        manager.resolve_round_at(2100.0, end).unwrap();
        assert!(!manager.needs_resolution(30, end));
    }

    #[test]
    fn next_scheduled_start_rolls_to_quarter_hour_marks() {
        assert_eq!(next_scheduled_start(at(12, 7, 30)), at(12, 15, 0));
        assert_eq!(next_scheduled_start(at(12, 59, 10)), at(13, 0, 0));
        assert_eq!(next_scheduled_start(at(12, 0, 1)), at(12, 15, 0));
        // An exact mark schedules the following one.
        assert_eq!(next_scheduled_start(at(12, 15, 0)), at(12, 30, 0));
    }

    #[test]
    fn snapshot_reflects_empty_and_active_states() {
        let manager = RoundManager::new();
        let now = at(12, 7, 30);

        let empty = manager.snapshot_at(Some(2050.0), now);
        assert_eq!(empty.round_number, 0);
        assert_eq!(empty.start_price, None);
        assert_eq!(empty.seconds_left, 0);
        assert_eq!(empty.next_round_time, at(12, 15, 0));
        assert_eq!(empty.current_price, Some(2050.0));

        manager.start_round_at(2000.0, at(12, 15, 0)).unwrap();
        let active = manager.snapshot_at(None, at(12, 20, 0));
        assert_eq!(active.round_number, 1);
        assert_eq!(active.start_price, Some(2000.0));
        assert_eq!(active.seconds_left, 600);
        assert!(active.prediction.is_some());
    }
}
