//! Time-bucketed packet counter
//!
//! Counts packets over a trailing window using a fixed ring of buckets.
//! Only the newest bucket carries a timestamp; every older bucket is implied
//! to sit exactly one bucket width further back in time.

use std::sync::OnceLock;
use std::time::Instant;

use crate::LimiterError;

/// Divisor to convert ms to s
const MILLISECONDS_TO_SECONDS: f64 = 1000.0;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds elapsed on a process-wide monotonic clock.
///
/// This is the time base `TimeBucketCounter::increment` records against, and
/// what the proxy passes to `RateTracker::record_event`.
pub fn now_millis() -> f64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_secs_f64() * MILLISECONDS_TO_SECONDS
}

/// Sliding-window packet counter over `interval_ms`, split into
/// `total_buckets` buckets of `resolution_ms` each.
#[derive(Debug, Clone)]
pub struct TimeBucketCounter {
    /// Window the counter sums over (ms).
    interval_ms: f64,
    /// Width of one bucket (ms).
    resolution_ms: f64,
    /// Ring of packet counts; indices wrap around.
    buckets: Vec<u32>,
    /// Bucket holding the newest data.
    head: usize,
    /// Time attached to the bucket at `head` (ms).
    head_time: f64,
    /// Cached sum of `buckets`.
    total: u32,
}

impl TimeBucketCounter {
    /// Create a counter over `interval_ms` with `total_buckets` buckets.
    ///
    /// Both arguments must be strictly positive; use [`try_new`] when they
    /// come from user configuration.
    ///
    /// [`try_new`]: TimeBucketCounter::try_new
    pub fn new(interval_ms: f64, total_buckets: u32) -> Self {
        Self {
            interval_ms,
            resolution_ms: interval_ms / total_buckets as f64,
            buckets: vec![0; total_buckets as usize],
            head: 0,
            head_time: 0.0,
            total: 0,
        }
    }

    /// Checked constructor: rejects a non-positive (or NaN) interval and a
    /// zero bucket count.
    pub fn try_new(interval_ms: f64, total_buckets: u32) -> Result<Self, LimiterError> {
        if interval_ms.is_nan() || interval_ms <= 0.0 || interval_ms.is_infinite() {
            return Err(LimiterError::InvalidInterval(interval_ms));
        }
        if total_buckets == 0 {
            return Err(LimiterError::InvalidBucketCount(total_buckets));
        }
        Ok(Self::new(interval_ms, total_buckets))
    }

    /// Window length (ms).
    pub fn interval_ms(&self) -> f64 {
        self.interval_ms
    }

    /// Width of one bucket (ms).
    pub fn resolution_ms(&self) -> f64 {
        self.resolution_ms
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Record `weight` packets at the current monotonic time.
    pub fn increment(&mut self, weight: u32) -> u32 {
        self.record_event(now_millis(), weight)
    }

    /// Record `weight` packets at `now_ms`, purging buckets that fell out of
    /// the window. Returns the new total.
    ///
    /// Calls landing within one bucket width of the head are O(1); larger
    /// gaps cost O(min(buckets, gap / resolution)).
    pub fn record_event(&mut self, now_ms: f64, weight: u32) -> u32 {
        // Time only moves forward; small negative jitter is treated as "now".
        let delta = (now_ms - self.head_time).max(0.0);

        if delta < self.resolution_ms {
            self.buckets[self.head] += weight;
            self.total += weight;
            return self.total;
        }

        let total_buckets = self.buckets.len();
        let to_move = (delta / self.resolution_ms) as usize;

        if to_move >= total_buckets {
            self.buckets.fill(0);
            self.buckets[0] = weight;
            self.total = weight;
            self.head = 0;
            self.head_time = now_ms;
            return self.total;
        }

        // Buckets we skipped over hold nothing but expired data.
        for i in 1..to_move {
            let index = (self.head + i) % total_buckets;
            self.total -= self.buckets[index];
            self.buckets[index] = 0;
        }

        let new_head = (self.head + to_move) % total_buckets;
        self.total = self.total - self.buckets[new_head] + weight;
        self.buckets[new_head] = weight;
        self.head = new_head;
        // Advance by whole buckets so boundaries stay evenly spaced; the
        // remainder carries over into the next call.
        self.head_time += to_move as f64 * self.resolution_ms;

        self.total
    }

    /// Packets counted as of the last `record_event` call.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Packets per second averaged over the nominal window, as of the last
    /// update.
    pub fn current_rate(&self) -> f64 {
        self.total as f64 / (self.interval_ms / MILLISECONDS_TO_SECONDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ring_sum(counter: &TimeBucketCounter) -> u32 {
        counter.buckets.iter().sum()
    }

    #[test]
    fn test_new_counter_is_empty() {
        let counter = TimeBucketCounter::new(1000.0, 150);
        assert_eq!(counter.total(), 0);
        assert_eq!(counter.bucket_count(), 150);
        assert!((counter.resolution_ms() - 1000.0 / 150.0).abs() < 1e-9);
        assert_eq!(counter.current_rate(), 0.0);
    }

    #[test]
    fn test_try_new_rejects_bad_params() {
        assert!(matches!(
            TimeBucketCounter::try_new(0.0, 10),
            Err(LimiterError::InvalidInterval(_))
        ));
        assert!(matches!(
            TimeBucketCounter::try_new(-5.0, 10),
            Err(LimiterError::InvalidInterval(_))
        ));
        assert!(TimeBucketCounter::try_new(f64::NAN, 10).is_err());
        assert!(matches!(
            TimeBucketCounter::try_new(1000.0, 0),
            Err(LimiterError::InvalidBucketCount(0))
        ));
        assert!(TimeBucketCounter::try_new(1000.0, 1).is_ok());
    }

    #[test]
    fn test_same_bucket_accumulates() {
        let mut counter = TimeBucketCounter::new(1000.0, 10);
        assert_eq!(counter.record_event(0.0, 1), 1);
        assert_eq!(counter.record_event(10.0, 2), 3);
        assert_eq!(counter.record_event(99.0, 3), 6);
        assert_eq!(counter.total(), 6);
        assert_eq!(counter.head, 0);
    }

    #[test]
    fn test_window_eviction() {
        let mut counter = TimeBucketCounter::new(1000.0, 10);
        counter.record_event(500.0, 42);
        assert_eq!(counter.total(), 42);

        counter.record_event(500.0 + 1000.0 + 0.001, 0);
        assert_eq!(counter.total(), 0);
        assert_eq!(ring_sum(&counter), 0);
    }

    #[test]
    fn test_full_reset_anchors_head_at_now() {
        let mut counter = TimeBucketCounter::new(100.0, 4);
        counter.record_event(0.0, 5);
        counter.record_event(1_000.0, 2);
        assert_eq!(counter.total(), 2);
        assert_eq!(counter.head, 0);
        assert_eq!(counter.head_time, 1_000.0);
    }

    #[test]
    fn test_partial_eviction() {
        // 10 buckets of 100ms
        let mut counter = TimeBucketCounter::new(1000.0, 10);
        let r = counter.resolution_ms();
        let t = 0.0;

        counter.record_event(t, 1);
        counter.record_event(t + r / 2.0, 1);
        assert_eq!(counter.record_event(t + r, 1), 3);

        // One full window after `t`: the bucket at `t` has aged out, the one
        // at `t + r` is still inside the trailing window.
        let total = counter.record_event(t + 1000.0, 0);
        assert_eq!(total, 1);
        assert_eq!(ring_sum(&counter), total);
    }

    #[test]
    fn test_bucket_boundary_counts_once() {
        let mut counter = TimeBucketCounter::new(1000.0, 10);
        counter.record_event(0.0, 1);
        counter.record_event(100.0, 1);
        assert_eq!(counter.total(), 2);
        assert_eq!(counter.buckets[0], 1);
        assert_eq!(counter.buckets[1], 1);
        assert_eq!(counter.head, 1);
        assert_eq!(counter.head_time, 100.0);
    }

    #[test]
    fn test_skipped_buckets_are_cleared() {
        let mut counter = TimeBucketCounter::new(1000.0, 10);
        for i in 0..10 {
            counter.record_event(i as f64 * 100.0, 1);
        }
        assert_eq!(counter.total(), 10);

        // Jump 3 buckets ahead: the 3 oldest buckets are evicted.
        counter.record_event(900.0 + 300.0, 5);
        assert_eq!(counter.total(), 10 - 3 + 5);
        assert_eq!(ring_sum(&counter), counter.total());
    }

    #[test]
    fn test_ring_wraps() {
        let mut counter = TimeBucketCounter::new(40.0, 4);
        for i in 0..9 {
            counter.record_event(i as f64 * 10.0, 1);
        }
        // Only the last 4 buckets survive.
        assert_eq!(counter.total(), 4);
        assert_eq!(counter.head, 8 % 4);
    }

    #[test]
    fn test_negative_delta_is_clamped() {
        let mut counter = TimeBucketCounter::new(1000.0, 10);
        counter.record_event(500.0, 1);
        let head = counter.head;
        assert_eq!(counter.record_event(450.0, 1), 2);
        assert_eq!(counter.head, head);
    }

    #[test]
    fn test_head_time_advances_by_whole_buckets() {
        let mut counter = TimeBucketCounter::new(1000.0, 10);
        counter.record_event(0.0, 1);
        counter.record_event(250.0, 1);
        assert_eq!(counter.head_time, 200.0);
        assert_eq!(counter.head, 2);
    }

    #[test]
    fn test_current_rate_uses_nominal_window() {
        let mut counter = TimeBucketCounter::new(2000.0, 20);
        counter.record_event(0.0, 10);
        assert!((counter.current_rate() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_increment_uses_monotonic_clock() {
        let mut counter = TimeBucketCounter::new(60_000.0, 10);
        counter.increment(1);
        counter.increment(1);
        assert_eq!(counter.total(), 2);
        assert!(now_millis() >= 0.0);
    }

    proptest! {
        #[test]
        fn prop_weights_within_one_bucket_sum(weights in prop::collection::vec(0u32..1000, 1..64)) {
            let mut counter = TimeBucketCounter::new(1000.0, 10);
            let r = counter.resolution_ms();
            let step = r / (weights.len() as f64 + 1.0);
            let mut expected = 0;
            for (i, w) in weights.iter().enumerate() {
                counter.record_event(i as f64 * step, *w);
                expected += w;
            }
            prop_assert_eq!(counter.total(), expected);
        }

        #[test]
        fn prop_total_matches_ring(
            steps in prop::collection::vec((0.0f64..300.0, 0u32..50), 1..200),
            buckets in 1u32..40,
        ) {
            let mut counter = TimeBucketCounter::new(1000.0, buckets);
            let mut now = 0.0;
            for (gap, w) in steps {
                now += gap;
                let total = counter.record_event(now, w);
                prop_assert_eq!(total, ring_sum(&counter));
            }
        }

        #[test]
        fn prop_idle_window_empties(w in 1u32..10_000, start in 0.0f64..1e6) {
            let mut counter = TimeBucketCounter::new(1000.0, 150);
            counter.record_event(start, w);
            prop_assert_eq!(counter.record_event(start + 1000.0 + 0.01, 0), 0);
        }
    }
}
