//! Per-key minimum-interval rate limiter.
//!
//! Each key remembers the time of its last dispatch. A caller for a key whose
//! interval has not yet elapsed waits out the remainder before proceeding.
//! The slot is reserved under the lock before waiting, so back-to-back calls
//! for one key are spaced by at least the interval even if they overlap.
//! Keys are independent of each other.

use crate::time::{add_duration, elapsed_between, Clock, Sleeper};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Keyed minimum-interval rate limiter
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    last_dispatch: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl RateLimiter {
    /// Create a limiter that reads time from `clock` and waits with `sleeper`
    pub fn new(clock: Arc<dyn Clock>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            clock,
            sleeper,
            last_dispatch: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until `key` may dispatch again, then record the dispatch.
    ///
    /// Proceeds immediately when the key has no prior dispatch or when at
    /// least `interval` has passed since it. Otherwise sleeps for the
    /// remainder. Returns the time spent waiting. Dropping the future while it
    /// waits gives the reserved slot back unless a later caller has already
    /// queued behind it.
    pub async fn await_turn(&self, key: &str, interval: Duration) -> Duration {
        let reservation = self.reserve(key, interval);
        let wait = reservation.wait;

        if !wait.is_zero() {
            debug!(key, wait_ms = wait.as_millis() as u64, "Waiting for rate limit");
            let guard = ReservationGuard {
                limiter: self,
                key,
                reservation: Some(reservation),
            };
            self.sleeper.sleep(wait).await;
            guard.commit();
        }

        let now = self.clock.now();
        let mut slots = self.last_dispatch.lock();
        let slot = slots.entry(key.to_string()).or_insert(now);
        if now > *slot {
            *slot = now;
        }

        wait
    }

    /// Claim the next dispatch slot for `key`
    fn reserve(&self, key: &str, interval: Duration) -> Reservation {
        let now = self.clock.now();
        let mut slots = self.last_dispatch.lock();
        let previous = slots.get(key).copied();

        let (scheduled, wait) = match previous {
            Some(last) => {
                let since_last = elapsed_between(last, now);
                if last <= now && since_last >= interval {
                    (now, Duration::ZERO)
                } else {
                    let next = add_duration(last, interval);
                    (next, elapsed_between(now, next))
                }
            }
            None => (now, Duration::ZERO),
        };

        slots.insert(key.to_string(), scheduled);
        Reservation {
            previous,
            scheduled,
            wait,
        }
    }

    /// Undo an abandoned reservation if it is still the latest for `key`
    fn release(&self, key: &str, reservation: Reservation) {
        let mut slots = self.last_dispatch.lock();
        if slots.get(key) != Some(&reservation.scheduled) {
            return;
        }

        match reservation.previous {
            Some(previous) => {
                slots.insert(key.to_string(), previous);
            }
            None => {
                slots.remove(key);
            }
        }
        debug!(key, "Released abandoned rate limit slot");
    }

    /// Last recorded dispatch for `key`
    pub fn last_dispatch(&self, key: &str) -> Option<DateTime<Utc>> {
        self.last_dispatch.lock().get(key).copied()
    }

    /// Number of keys with a recorded dispatch
    pub fn tracked_keys(&self) -> usize {
        self.last_dispatch.lock().len()
    }

    /// Forget every key
    pub fn reset(&self) {
        self.last_dispatch.lock().clear();
        debug!("Rate limit state reset");
    }
}

struct Reservation {
    previous: Option<DateTime<Utc>>,
    scheduled: DateTime<Utc>,
    wait: Duration,
}

/// Returns the slot to the limiter if the waiting future is dropped
struct ReservationGuard<'a> {
    limiter: &'a RateLimiter,
    key: &'a str,
    reservation: Option<Reservation>,
}

impl ReservationGuard<'_> {
    fn commit(mut self) {
        self.reservation = None;
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if let Some(reservation) = self.reservation.take() {
            self.limiter.release(self.key, reservation);
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("tracked_keys", &self.tracked_keys())
            .finish()
    }
}
