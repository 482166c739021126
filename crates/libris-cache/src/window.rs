//! Fixed-duration sliding sample buffer for rolling error rates.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A trailing window of `{timestamp, value}` samples.
///
/// A value of `1` marks a failure, `0` a success. Expired samples are evicted
/// lazily, on the next record or rate query.
#[derive(Debug, Clone)]
pub struct TimeWindow {
    duration: Duration,
    samples: VecDeque<(Instant, u8)>,
}

impl TimeWindow {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            samples: VecDeque::new(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Records a sample stamped now.
    pub fn record(&mut self, failed: bool) {
        self.record_at(Instant::now(), failed);
    }

    /// Records a sample with an explicit timestamp. Samples must be recorded
    /// in non-decreasing time order.
    pub fn record_at(&mut self, at: Instant, failed: bool) {
        self.evict(at);
        self.samples.push_back((at, u8::from(failed)));
    }

    /// Fraction of failed samples in the live window; 0 when empty.
    pub fn rate(&mut self) -> f64 {
        self.rate_at(Instant::now())
    }

    pub fn rate_at(&mut self, now: Instant) -> f64 {
        self.evict(now);
        if self.samples.is_empty() {
            return 0.0;
        }
        let failures = self.samples.iter().filter(|(_, v)| *v == 1).count();
        failures as f64 / self.samples.len() as f64
    }

    /// Number of samples still held, including any not yet evicted.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn evict(&mut self, now: Instant) {
        while let Some((at, _)) = self.samples.front() {
            if now.saturating_duration_since(*at) > self.duration {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}
