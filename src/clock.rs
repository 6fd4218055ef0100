//! Time sources and cancellation
//!
//! The engine measures dwell and collection windows on a monotonic clock and
//! stamps records with wall-clock time. `SystemClock` uses real time;
//! `ManualClock` only moves when told to, which makes calibration windows and
//! fixation timing deterministic in tests and offline replay.

use chrono::{DateTime, Utc};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic and wall-clock time
pub trait Clock {
    /// Current monotonic instant
    fn now(&self) -> Instant;

    /// Current wall-clock time
    fn wall_now(&self) -> DateTime<Utc>;

    /// Yield for `duration`
    fn sleep(&self, duration: Duration);
}

/// Real time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Manually advanced clock. `sleep` advances time instead of blocking.
#[derive(Debug)]
pub struct ManualClock {
    instant: Cell<Instant>,
    wall: Cell<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Start at the current real time
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Start at a fixed wall-clock time
    pub fn starting_at(wall: DateTime<Utc>) -> Self {
        Self {
            instant: Cell::new(Instant::now()),
            wall: Cell::new(wall),
        }
    }

    /// Advance both clocks by `duration`
    pub fn advance(&self, duration: Duration) {
        self.instant.set(self.instant.get() + duration);
        let step =
            chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        self.wall.set(self.wall.get() + step);
    }

    /// Advance by whole milliseconds
    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.instant.get()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        self.wall.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Cloneable cancellation flag shared between the driver and a running calibration
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
