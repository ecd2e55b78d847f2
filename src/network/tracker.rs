//! Per-connection packet rate tracking
//!
//! Maps each live connection to its own `TimeBucketCounter` plus a one-way
//! violation latch. The table is a concurrent map; each entry carries its own
//! lock so different connections never contend with each other.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::bucket::TimeBucketCounter;
use crate::LimiterError;

/// Outcome of recording one event against a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Nothing is tracked for this entity (never registered, already gone, or
    /// replaced while this call was in flight). Pass the event through.
    NoEntry,
    /// Rate is at or below the threshold.
    Allowed,
    /// This event pushed the rate over the threshold. Returned exactly once
    /// per entry; the host should drop the event and disconnect.
    ViolationJustNow {
        /// Packets in the window, including this one.
        packets: u32,
        /// Window length the packets were counted over (ms).
        interval_ms: f64,
    },
    /// The entity already violated the limit; keep dropping quietly.
    AlreadyViolated,
}

impl Decision {
    /// True when the host must not forward the event.
    pub fn should_drop(&self) -> bool {
        matches!(
            self,
            Decision::ViolationJustNow { .. } | Decision::AlreadyViolated
        )
    }
}

#[derive(Debug)]
struct EntryState {
    counter: TimeBucketCounter,
    violated: bool,
}

/// One tracked entity. Shared so a `record_event` can keep using it after
/// releasing the table shard.
type Entry = Arc<Mutex<EntryState>>;

/// Concurrent table of per-entity packet counters.
#[derive(Debug)]
pub struct RateTracker<K>
where
    K: Eq + Hash,
{
    entries: DashMap<K, Entry>,
}

impl<K> RateTracker<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Start tracking `id` with a fresh counter and a cleared latch.
    ///
    /// Replaces any existing entry for `id`, which resets its count and
    /// latch. `interval_ms` must be positive and `bucket_count` non-zero.
    pub fn register(&self, id: K, interval_ms: f64, bucket_count: u32) -> Result<(), LimiterError> {
        let counter = TimeBucketCounter::try_new(interval_ms, bucket_count)?;
        tracing::debug!(
            "[limiter] register id={:?} interval={}ms buckets={}",
            id,
            interval_ms,
            bucket_count
        );
        self.entries.insert(
            id,
            Arc::new(Mutex::new(EntryState {
                counter,
                violated: false,
            })),
        );
        Ok(())
    }

    /// Restart counting for `id` only if it is still tracked.
    ///
    /// Returns whether an entry was replaced. An id removed concurrently
    /// stays removed.
    pub fn reset(&self, id: &K, interval_ms: f64, bucket_count: u32) -> Result<bool, LimiterError> {
        let counter = TimeBucketCounter::try_new(interval_ms, bucket_count)?;
        match self.entries.get_mut(id) {
            Some(mut entry) => {
                // New allocation, so in-flight callers holding the old one
                // see it as stale.
                *entry = Arc::new(Mutex::new(EntryState {
                    counter,
                    violated: false,
                }));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stop tracking `id`. No-op if it isn't tracked.
    pub fn unregister(&self, id: &K) {
        if self.entries.remove(id).is_some() {
            tracing::debug!("[limiter] unregister id={:?}", id);
        }
    }

    pub fn contains(&self, id: &K) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of tracked entities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every tracked id.
    pub fn ids(&self) -> Vec<K> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Packets currently counted for `id`, as of its last update.
    pub fn total(&self, id: &K) -> Option<u32> {
        let entry = self.entries.get(id).map(|e| Arc::clone(e.value()))?;
        let state = entry.lock();
        Some(state.counter.total())
    }

    /// Whether `id` has latched a violation.
    pub fn is_violated(&self, id: &K) -> Option<bool> {
        let entry = self.entries.get(id).map(|e| Arc::clone(e.value()))?;
        let state = entry.lock();
        Some(state.violated)
    }

    /// Record `weight` packets for `id` at `now_ms` and check the rate
    /// against `max_rate` (packets per second).
    pub fn record_event(&self, id: &K, now_ms: f64, weight: u32, max_rate: f64) -> Decision {
        // Clone out of the map so the shard lock isn't held while we wait on
        // the entry lock.
        let entry = match self.entries.get(id) {
            Some(e) => Arc::clone(e.value()),
            None => return Decision::NoEntry,
        };

        let mut state = entry.lock();

        // A reconnect may have swapped in a new entry between lookup and lock.
        let current = self
            .entries
            .get(id)
            .is_some_and(|e| Arc::ptr_eq(e.value(), &entry));
        if !current {
            return Decision::NoEntry;
        }

        if state.violated {
            return Decision::AlreadyViolated;
        }

        let packets = state.counter.record_event(now_ms, weight);

        if state.counter.current_rate() > max_rate {
            state.violated = true;
            return Decision::ViolationJustNow {
                packets,
                interval_ms: state.counter.interval_ms(),
            };
        }

        Decision::Allowed
    }
}

impl<K> Default for RateTracker<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}
