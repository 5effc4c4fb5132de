//! Wall-clock abstraction
//!
//! Staleness and heartbeat decisions compare record timestamps against the
//! current wall clock. Injecting the clock keeps those decisions testable
//! without sleeping through real thresholds.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of wall-clock time
pub trait Clock: fmt::Debug + Send + Sync {
    /// Current wall-clock time in milliseconds since the Unix epoch
    fn wall_time_millis(&self) -> i64;
}

/// System wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn wall_time_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Manually driven clock for tests
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a clock frozen at `start_millis`
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_millis)),
        }
    }

    /// Advance the clock by `delta`
    pub fn advance(&self, delta: Duration) {
        self.now
            .fetch_add(delta.as_millis() as i64, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute time
    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn wall_time_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
