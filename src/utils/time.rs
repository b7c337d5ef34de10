//! Time utility functions

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Source of "now" for the admission gate and token expiry checks
pub trait Clock: Send + Sync {
    /// Monotonic time, used for rate windows
    fn now(&self) -> Instant;

    /// Wall-clock seconds since the Unix epoch, used for token expiry
    fn unix_timestamp(&self) -> i64;
}

/// Clock backed by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_timestamp(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Clock that only moves when told to. Both readings advance together.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    base_unix: i64,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now().timestamp())
    }

    /// Start the wall clock at a fixed Unix timestamp
    pub fn starting_at(unix_timestamp: i64) -> Self {
        Self {
            base: Instant::now(),
            base_unix: unix_timestamp,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }

    fn offset(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.offset()
    }

    fn unix_timestamp(&self) -> i64 {
        self.base_unix + self.offset().as_secs() as i64
    }
}

/// Get current timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert duration to milliseconds
pub fn duration_to_ms(duration: Duration) -> u64 {
    duration.as_millis() as u64
}
