//! Virtual time.

use crate::time::{add_duration, Clock, Sleeper};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Start of virtual time: 2024-01-01T00:00:00Z
const EPOCH_SECS: i64 = 1_704_067_200;

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Clock fixed at 2024-01-01T00:00:00Z
    pub fn new() -> Self {
        Self::starting_at(DateTime::from_timestamp(EPOCH_SECS, 0).unwrap_or_default())
    }

    /// Clock fixed at `at`
    pub fn starting_at(at: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(at)),
        }
    }

    /// Current virtual time
    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    /// Move time forward
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock();
        *now = add_duration(*now, duration);
    }

    /// Jump to `at`
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        ManualClock::now(self)
    }
}

/// Sleeper that returns immediately and records every requested delay.
///
/// When built with [`advancing`](Self::advancing) each sleep also moves the
/// given clock forward by the requested delay.
#[derive(Debug, Clone, Default)]
pub struct TrackingSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
    clock: Option<ManualClock>,
}

impl TrackingSleeper {
    /// Sleeper that records but does not move any clock
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeper that advances `clock` by each requested delay
    pub fn advancing(clock: ManualClock) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            clock: Some(clock),
        }
    }

    /// Every delay requested so far, in order
    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().clone()
    }

    /// Sum of all requested delays
    pub fn total(&self) -> Duration {
        self.calls.lock().iter().sum()
    }

    /// Forget recorded delays
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl Sleeper for TrackingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.calls.lock().push(duration);
        if let Some(clock) = &self.clock {
            clock.advance(duration);
        }
    }
}
