use std::collections::VecDeque;

/// Sliding-window capacity; oldest samples are evicted first.
pub const HISTORY_CAPACITY: usize = 50;

/// A single timestamped price observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceSample {
    /// Unix seconds
    pub ts: i64,
    pub price: f64,
}

/// Bounded, insertion-ordered window of recent prices feeding the
/// forecaster.
///
/// No deduplication and no sanity checks on recorded values; the
/// forecaster only consumes relative trend signals.
#[derive(Debug, Default)]
pub struct PriceHistory {
    samples: VecDeque<PriceSample>,
}

impl PriceHistory {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(HISTORY_CAPACITY + 1),
        }
    }

    pub fn record(&mut self, sample: PriceSample) {
        self.samples.push_back(sample);
        while self.samples.len() > HISTORY_CAPACITY {
            self.samples.pop_front();
        }
    }

    /// Bare prices in insertion order, most-recent-last.
    pub fn snapshot(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.price).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
