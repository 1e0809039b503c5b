//! Keyed circuit breaker.
//!
//! Every circuit key has its own failure counter and state:
//!
//! ```text
//! Closed   --(failure_count >= threshold)--> Open
//! Open     --(attempt at/after opened_at + reset_timeout)--> HalfOpen
//! HalfOpen --(success)--> Closed
//! HalfOpen --(failure)--> Open (cooldown restarts now)
//! ```
//!
//! The half-open probe is an ordinary attempt: the failure count is zeroed
//! when it is admitted and its outcome decides the next state. Several
//! rate-limit keys may share one circuit key; they then share this state.

use crate::errors::{FetchError, FetchResult};
use crate::time::{add_duration, Clock};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for the circuit breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a circuit
    pub failure_threshold: u32,
    /// Cooldown before an open circuit admits a probe
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set failure threshold
    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n;
        self
    }

    /// Set reset timeout
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

/// Circuit state for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests pass through
    Closed,
    /// Requests are rejected without reaching the transport
    Open,
    /// Cooldown elapsed; one probe attempt is in flight
    HalfOpen,
}

/// Point-in-time view of one key's breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures counted so far
    pub failure_count: u32,
    /// When the circuit last opened
    pub opened_at: Option<DateTime<Utc>>,
}

/// Hook for circuit state transitions
pub trait CircuitBreakerHook: Send + Sync {
    /// Called after `key` moves from `old_state` to `new_state`
    fn on_state_change(&self, key: &str, old_state: CircuitState, new_state: CircuitState);
}

#[derive(Debug, Clone)]
struct CircuitEntry {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<DateTime<Utc>>,
}

impl Default for CircuitEntry {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
        }
    }
}

/// Per-key circuit breaker
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CircuitEntry>>,
    hook: Option<Arc<dyn CircuitBreakerHook>>,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a breaker that reads time from `clock`
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            entries: Mutex::new(HashMap::new()),
            hook: None,
            total_rejections: AtomicU64::new(0),
        }
    }

    /// Add a hook for state changes
    pub fn with_hook(mut self, hook: Arc<dyn CircuitBreakerHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Breaker configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Admit or reject an attempt for `key`.
    ///
    /// Rejects with [`FetchError::CircuitOpen`] while the circuit is open and
    /// the cooldown has not elapsed. Once it has, the circuit moves to
    /// half-open, its failure count is zeroed and the attempt is admitted.
    pub fn check_and_record_attempt(&self, key: &str) -> FetchResult<()> {
        let now = self.clock.now();
        let transition = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(key) else {
                return Ok(());
            };

            match entry.state {
                CircuitState::Closed | CircuitState::HalfOpen => return Ok(()),
                CircuitState::Open => {
                    let opened_at = entry.opened_at.unwrap_or(now);
                    let retry_at = add_duration(opened_at, self.config.reset_timeout);
                    if now < retry_at {
                        self.total_rejections.fetch_add(1, Ordering::Relaxed);
                        warn!(circuit_key = key, %retry_at, "Circuit breaker is open, rejecting request");
                        return Err(FetchError::circuit_open(key, retry_at));
                    }

                    entry.state = CircuitState::HalfOpen;
                    entry.failure_count = 0;
                    (CircuitState::Open, CircuitState::HalfOpen)
                }
            }
        };

        debug!(circuit_key = key, "Circuit breaker admitting probe");
        self.notify(key, transition.0, transition.1);
        Ok(())
    }

    /// Record a successful attempt; the failure count always returns to zero
    pub fn record_success(&self, key: &str) {
        let previous = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(key) else {
                return;
            };
            let previous = entry.state;
            entry.state = CircuitState::Closed;
            entry.failure_count = 0;
            entry.opened_at = None;
            previous
        };

        if previous != CircuitState::Closed {
            info!(circuit_key = key, "Circuit breaker transitioning to CLOSED");
            self.notify(key, previous, CircuitState::Closed);
        }
    }

    /// Record a failed attempt
    pub fn record_failure(&self, key: &str) {
        let now = self.clock.now();
        let threshold = self.config.failure_threshold.max(1);

        let transition = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(key.to_string()).or_default();

            match entry.state {
                CircuitState::Closed => {
                    entry.failure_count = entry.failure_count.saturating_add(1);
                    if entry.failure_count >= threshold {
                        entry.state = CircuitState::Open;
                        entry.opened_at = Some(now);
                        warn!(
                            circuit_key = key,
                            failure_count = entry.failure_count,
                            "Circuit breaker transitioning to OPEN"
                        );
                        Some((CircuitState::Closed, CircuitState::Open))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    entry.state = CircuitState::Open;
                    entry.failure_count = threshold;
                    entry.opened_at = Some(now);
                    warn!(circuit_key = key, "Circuit breaker returning to OPEN from half-open");
                    Some((CircuitState::HalfOpen, CircuitState::Open))
                }
                CircuitState::Open => {
                    // Late failure from an attempt admitted before the circuit opened
                    entry.failure_count = entry.failure_count.saturating_add(1);
                    None
                }
            }
        };

        if let Some((old, new)) = transition {
            self.notify(key, old, new);
        }
    }

    /// Current state for `key`; unknown keys are closed
    pub fn state(&self, key: &str) -> CircuitState {
        self.entries
            .lock()
            .get(key)
            .map(|e| e.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Snapshot of `key`'s breaker, if it has recorded anything
    pub fn snapshot(&self, key: &str) -> Option<CircuitSnapshot> {
        self.entries.lock().get(key).map(|e| CircuitSnapshot {
            state: e.state,
            failure_count: e.failure_count,
            opened_at: e.opened_at,
        })
    }

    /// Earliest time an open circuit for `key` admits a probe
    pub fn retry_at(&self, key: &str) -> Option<DateTime<Utc>> {
        let entries = self.entries.lock();
        let entry = entries.get(key)?;
        match (entry.state, entry.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                Some(add_duration(opened_at, self.config.reset_timeout))
            }
            _ => None,
        }
    }

    /// Total rejected attempts across all keys
    pub fn total_rejections(&self) -> u64 {
        self.total_rejections.load(Ordering::Relaxed)
    }

    /// Reset one key to closed
    pub fn reset_key(&self, key: &str) {
        self.entries.lock().remove(key);
        debug!(circuit_key = key, "Circuit breaker reset");
    }

    /// Reset every key to closed
    pub fn reset(&self) {
        self.entries.lock().clear();
        self.total_rejections.store(0, Ordering::Relaxed);
        debug!("Circuit breaker state reset");
    }

    fn notify(&self, key: &str, old: CircuitState, new: CircuitState) {
        if let Some(hook) = &self.hook {
            hook.on_state_change(key, old, new);
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("tracked_keys", &self.entries.lock().len())
            .field("total_rejections", &self.total_rejections())
            .finish()
    }
}
