//! Packet Limiter - per-connection packet rate enforcement
//!
//! Counts packets per connection over a sliding window and disconnects
//! clients that exceed the configured rate.

/// Limiter configuration (YAML)
pub mod config;
/// Rate counting, per-connection tracking and packet framing
pub mod network;
/// Server implementations (the rate-limiting proxy)
pub mod servers;

pub use network::bucket::TimeBucketCounter;
pub use network::tracker::{Decision, RateTracker};

/// Errors raised when a counter is built from bad parameters.
#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    #[error("Interval must be positive, got {0}ms")]
    InvalidInterval(f64),

    #[error("Bucket count must be positive, got {0}")]
    InvalidBucketCount(u32),
}
