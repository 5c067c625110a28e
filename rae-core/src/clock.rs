//! Injectable time source.
//!
//! Decay, recency scoring, and retention pruning are all functions of
//! "now". Production code uses [`SystemClock`]; tests advance a manual
//! clock to cover the 7/30-day decay zones without sleeping.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Monotonically non-decreasing time provider.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Shared handle to a clock implementation.
pub type SharedClock = Arc<dyn Clock>;

/// Convenience constructor for the default clock.
#[must_use]
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
