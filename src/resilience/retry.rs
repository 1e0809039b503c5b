//! Retry controller with exponential backoff.
//!
//! An attempt that fails with a retryable error (transport failure or
//! timeout) is repeated after `delay * factor^attempt`, up to `retries` extra
//! attempts. A circuit-open rejection or a configuration error is returned at
//! once. When attempts run out, the last error is returned as is.

use crate::errors::{ConfigurationError, FetchResult};
use crate::time::Sleeper;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff schedule for one logical request
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first
    pub retries: u32,
    /// Base delay before the first retry
    pub delay: Duration,
    /// Multiplier applied per attempt
    pub factor: f64,
    /// Upper bound on any single delay
    pub max_delay: Option<Duration>,
    /// Random spread as a fraction of the delay, 0.0 to 1.0
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            delay: Duration::from_millis(250),
            factor: 2.0,
            max_delay: None,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given retries, base delay and factor
    pub fn new(retries: u32, delay: Duration, factor: f64) -> Self {
        Self {
            retries,
            delay,
            factor,
            ..Self::default()
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, 1.0)
    }

    /// Set retries
    pub fn retries(mut self, n: u32) -> Self {
        self.retries = n;
        self
    }

    /// Set base delay
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set backoff factor
    pub fn factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Cap individual delays
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set jitter fraction, clamped to 0.0..=1.0
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Total attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Check that the factor is a positive finite number and jitter is a fraction
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.factor.is_finite() || self.factor <= 0.0 {
            return Err(ConfigurationError::InvalidConfiguration(format!(
                "retry factor must be a positive number, got {}",
                self.factor
            )));
        }

        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigurationError::InvalidConfiguration(format!(
                "retry jitter must be between 0 and 1, got {}",
                self.jitter
            )));
        }

        Ok(())
    }

    /// Delay after the zero-based `attempt` fails
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = if self.factor.is_finite() { self.factor.max(0.0) } else { 1.0 };
        let mut nanos = self.delay.as_nanos() as f64 * factor.powi(exponent);

        if let Some(max) = self.max_delay {
            nanos = nanos.min(max.as_nanos() as f64);
        }

        // NaN fails the comparison and disables jitter
        let jitter = if self.jitter > 0.0 { self.jitter.min(1.0) } else { 0.0 };
        if jitter > 0.0 {
            let spread = rand::thread_rng().gen_range(-jitter..=jitter);
            nanos *= 1.0 + spread;
        }

        if !nanos.is_finite() || nanos >= u64::MAX as f64 {
            return Duration::from_nanos(u64::MAX);
        }
        Duration::from_nanos(nanos.max(0.0).round() as u64)
    }
}

/// Runs attempts under a [`RetryPolicy`], sleeping between them
#[derive(Clone)]
pub struct RetryController {
    sleeper: Arc<dyn Sleeper>,
}

impl RetryController {
    /// Controller that waits with `sleeper`
    pub fn new(sleeper: Arc<dyn Sleeper>) -> Self {
        Self { sleeper }
    }

    /// Run `attempt_fn` until it succeeds, fails with a non-retryable error,
    /// or `policy` runs out of attempts. `attempt_fn` receives the zero-based
    /// attempt index.
    pub async fn run<F, Fut, T>(&self, policy: &RetryPolicy, mut attempt_fn: F) -> FetchResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = FetchResult<T>>,
    {
        let mut attempt = 0u32;

        loop {
            match attempt_fn(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt, "Request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => {
                    debug!(attempt, error_code = err.error_code(), "Error is not retryable");
                    return Err(err);
                }
                Err(err) if attempt >= policy.retries => {
                    warn!(
                        attempt,
                        retries = policy.retries,
                        error = %err,
                        "Request failed after exhausting retries"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = policy.delay_for_attempt(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after transient error"
                    );
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl std::fmt::Debug for RetryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryController").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ConfigurationError, FetchError, TransportError};
    use crate::mocks::TrackingSleeper;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn controller() -> (RetryController, TrackingSleeper) {
        let sleeper = TrackingSleeper::new();
        (RetryController::new(Arc::new(sleeper.clone())), sleeper)
    }

    #[test]
    fn test_delay_calculation() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), 2.0);

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_with_max() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), 10.0).max_delay(Duration::from_secs(5));

        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(5));
    }

    #[test]
    fn test_non_finite_settings_do_not_stall_or_panic() {
        let mut policy = RetryPolicy::new(2, Duration::from_millis(100), f64::NAN);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));

        policy.factor = f64::INFINITY;
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));

        policy.factor = 2.0;
        policy.jitter = f64::INFINITY;
        let delay = policy.delay_for_attempt(0);
        assert!(delay <= Duration::from_millis(200));

        policy.jitter = f64::NAN;
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
    }

    #[test]
    fn test_validate_rejects_bad_factor_and_jitter() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::none().validate().is_ok());

        for factor in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let policy = RetryPolicy::new(1, Duration::from_millis(10), factor);
            assert!(matches!(
                policy.validate(),
                Err(ConfigurationError::InvalidConfiguration(_))
            ));
        }

        let mut policy = RetryPolicy::default();
        policy.jitter = 1.5;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::new(1, Duration::from_millis(100), 1.0).jitter(0.5);

        for _ in 0..50 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn test_backoff_schedule_until_success() {
        let (retry, sleeper) = controller();
        let policy = RetryPolicy::new(2, Duration::from_millis(25), 2.0);
        let calls = AtomicU32::new(0);

        let result = retry
            .run(&policy, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(FetchError::from(TransportError::connection("reset")))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_millis(25), Duration::from_millis(50)]
        );
    }

    #[tokio::test]
    async fn test_exhausted_returns_last_error() {
        let (retry, sleeper) = controller();
        let policy = RetryPolicy::new(2, Duration::from_millis(10), 3.0);

        let result: FetchResult<()> = retry
            .run(&policy, |attempt| async move {
                Err(FetchError::from(TransportError::connection(format!(
                    "attempt {attempt}"
                ))))
            })
            .await;

        match result.unwrap_err() {
            FetchError::Transport(TransportError::Connection { message }) => {
                assert_eq!(message, "attempt 2")
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_millis(10), Duration::from_millis(30)]
        );
    }

    #[tokio::test]
    async fn test_timeouts_are_retried() {
        let (retry, sleeper) = controller();
        let policy = RetryPolicy::new(1, Duration::from_millis(5), 2.0);

        let result = retry
            .run(&policy, |attempt| async move {
                if attempt == 0 {
                    Err(FetchError::timeout("https://example.com", Duration::from_secs(1)))
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(sleeper.calls(), vec![Duration::from_millis(5)]);
    }

    #[tokio::test]
    async fn test_circuit_open_not_retried() {
        let (retry, sleeper) = controller();
        let policy = RetryPolicy::new(3, Duration::from_millis(10), 2.0);
        let calls = AtomicU32::new(0);

        let result: FetchResult<()> = retry
            .run(&policy, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::circuit_open("ashby:acme", Utc::now())) }
            })
            .await;

        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test]
    async fn test_configuration_error_not_retried() {
        let (retry, sleeper) = controller();
        let calls = AtomicU32::new(0);

        let result: FetchResult<()> = retry
            .run(&RetryPolicy::default(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(FetchError::from(ConfigurationError::InvalidConfiguration(
                        "bad".into(),
                    )))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test]
    async fn test_none_policy_is_single_shot() {
        let (retry, sleeper) = controller();
        let calls = AtomicU32::new(0);

        let result: FetchResult<()> = retry
            .run(&RetryPolicy::none(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::from(TransportError::Cancelled)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.calls().is_empty());
    }
}
