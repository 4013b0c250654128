//! Wall-clock and monotonic-clock injection.
//!
//! The lease runner (`fanout-dispatcher::lease_runner`) must never read a process-global clock
//! directly: timing *decisions* (when to renew, whether progress has been made since the last
//! tick) are made against [`MonotonicClock`], which is immune to wall-clock adjustment (NTP) and
//! to the pause a suspended VM or a stop-the-world GC would otherwise introduce. The wall clock is
//! used only to compute the `lease_expires_at` / `due_at` timestamps persisted to the database.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub trait WallClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Monotonic duration since an arbitrary, clock-specific epoch. Only differences between two
/// readings of the same clock are meaningful.
pub trait MonotonicClock: Send + Sync {
    fn now(&self) -> Duration;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone)]
pub struct SystemMonotonicClock {
    epoch: Instant,
}

impl Default for SystemMonotonicClock {
    fn default() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl MonotonicClock for SystemMonotonicClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// A manually advanceable monotonic clock for hermetic lease/cleanup tests.
///
/// Cloning shares the same underlying counter (it is `Arc`-backed), so a test can hold one handle
/// to advance time and hand another to the code under test.
#[derive(Clone, Default)]
pub struct FakeMonotonicClock {
    elapsed: Arc<Mutex<Duration>>,
}

impl FakeMonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(start: Duration) -> Self {
        Self {
            elapsed: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.elapsed.lock().expect("fake clock mutex poisoned");
        *guard += by;
    }
}

impl MonotonicClock for FakeMonotonicClock {
    fn now(&self) -> Duration {
        *self.elapsed.lock().expect("fake clock mutex poisoned")
    }
}

/// A wall clock matching a [`FakeMonotonicClock`]'s advances, for tests that assert on persisted
/// timestamps as well as renewal scheduling.
#[derive(Clone)]
pub struct FakeWallClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeWallClock {
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().expect("fake clock mutex poisoned");
        *guard += chrono::Duration::from_std(by).expect("duration fits in chrono::Duration");
    }
}

impl WallClock for FakeWallClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("fake clock mutex poisoned")
    }
}
