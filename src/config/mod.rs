//! Configuration for the fetch client.
//!
//! Supports configuration via:
//! - Explicit values
//! - Environment variables
//! - Builder pattern
//!
//! Per-provider rate-limit intervals have coded defaults that an environment
//! variable may override; unusable overrides fall back to the default.

use crate::errors::ConfigurationError;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};
use http::HeaderValue;
use std::time::Duration;
use tracing::warn;

/// Prefix shared by every environment variable read here
pub const ENV_PREFIX: &str = "JOBFETCH_";

/// Interval used for providers without a coded default
pub const DEFAULT_PROVIDER_INTERVAL: Duration = Duration::from_millis(500);

const PROVIDER_INTERVALS: &[(&str, Duration)] = &[
    ("greenhouse", Duration::from_millis(250)),
    ("lever", Duration::from_millis(500)),
    ("ashby", Duration::from_millis(500)),
    ("smartrecruiters", Duration::from_millis(1000)),
    ("workable", Duration::from_millis(1000)),
];

/// Configuration for [`FetchClient`](crate::client::FetchClient)
#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    /// User-Agent sent unless the request sets its own
    pub user_agent: String,
    /// Per-attempt deadline when a request does not set one
    pub default_timeout: Duration,
    /// Retry policy when a request does not set one
    pub retry: RetryPolicy,
    /// Circuit breaker thresholds
    pub circuit_breaker: CircuitBreakerConfig,
    /// Pacing interval for keyed requests that do not set one
    pub default_rate_limit_interval: Option<Duration>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: crate::DEFAULT_USER_AGENT.to_string(),
            default_timeout: Duration::from_millis(crate::DEFAULT_TIMEOUT_MS),
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            default_rate_limit_interval: None,
        }
    }
}

impl FetchConfig {
    /// Create a new configuration builder
    pub fn builder() -> FetchConfigBuilder {
        FetchConfigBuilder::new()
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Create configuration from an arbitrary variable lookup
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let mut builder = FetchConfigBuilder::new();

        if let Some(agent) = lookup("JOBFETCH_USER_AGENT") {
            if !agent.trim().is_empty() {
                builder = builder.user_agent(agent.trim());
            }
        }

        if let Some(ms) = parse_millis(&lookup, "JOBFETCH_TIMEOUT_MS", 1) {
            builder = builder.default_timeout(Duration::from_millis(ms));
        }

        let mut retry = defaults.retry.clone();
        if let Some(n) = parse_u32(&lookup, "JOBFETCH_RETRIES", 0) {
            retry.retries = n;
        }
        if let Some(ms) = parse_millis(&lookup, "JOBFETCH_RETRY_DELAY_MS", 0) {
            retry.delay = Duration::from_millis(ms);
        }
        builder = builder.retry(retry);

        let mut breaker = defaults.circuit_breaker.clone();
        if let Some(n) = parse_u32(&lookup, "JOBFETCH_CIRCUIT_THRESHOLD", 1) {
            breaker.failure_threshold = n;
        }
        if let Some(ms) = parse_millis(&lookup, "JOBFETCH_CIRCUIT_RESET_MS", 0) {
            breaker.reset_timeout = Duration::from_millis(ms);
        }
        builder = builder.circuit_breaker(breaker);

        builder.build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if HeaderValue::from_str(&self.user_agent).is_err() {
            return Err(ConfigurationError::InvalidHeader {
                name: "user-agent".to_string(),
                message: "not a valid header value".to_string(),
            });
        }

        if self.default_timeout.is_zero() {
            return Err(ConfigurationError::InvalidConfiguration(
                "default_timeout must be greater than zero".to_string(),
            ));
        }

        self.retry.validate()?;

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigurationError::InvalidConfiguration(
                "circuit breaker failure_threshold must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for FetchConfig
#[derive(Debug, Default)]
pub struct FetchConfigBuilder {
    config: FetchConfig,
}

impl FetchConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            config: FetchConfig::default(),
        }
    }

    /// Set the User-Agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    /// Set the default per-attempt timeout
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    /// Set the default retry policy
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Set circuit breaker thresholds
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = config;
        self
    }

    /// Set the default pacing interval for keyed requests
    pub fn default_rate_limit_interval(mut self, interval: Duration) -> Self {
        self.config.default_rate_limit_interval = Some(interval);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<FetchConfig, ConfigurationError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build the configuration without validation (for testing)
    pub fn build_unchecked(self) -> FetchConfig {
        self.config
    }
}

/// Conventional rate-limit key for one provider account
pub fn rate_limit_key(provider: &str, account: &str) -> String {
    format!("{}:{}", provider.to_ascii_lowercase(), account)
}

/// Coded default interval for `provider`
pub fn default_provider_interval(provider: &str) -> Duration {
    let provider = provider.to_ascii_lowercase();
    PROVIDER_INTERVALS
        .iter()
        .find(|(name, _)| *name == provider)
        .map(|(_, interval)| *interval)
        .unwrap_or(DEFAULT_PROVIDER_INTERVAL)
}

/// Name of the variable that overrides `provider`'s interval,
/// e.g. `JOBFETCH_SMARTRECRUITERS_RATE_LIMIT_MS`
pub fn provider_env_var(provider: &str) -> String {
    let normalized: String = provider
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{ENV_PREFIX}{normalized}_RATE_LIMIT_MS")
}

/// Rate-limit interval for `provider`, honouring the environment override
pub fn provider_rate_limit(provider: &str) -> Duration {
    resolve_rate_limit_with(provider, |name| std::env::var(name).ok())
}

/// Rate-limit interval for `provider` with an injectable variable lookup
pub fn resolve_rate_limit_with<F>(provider: &str, lookup: F) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    let fallback = default_provider_interval(provider);
    let var = provider_env_var(provider);

    match lookup(&var) {
        None => fallback,
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(ms) => Duration::from_millis(ms),
            Err(_) => {
                warn!(
                    variable = %var,
                    value = %raw,
                    default_ms = fallback.as_millis() as u64,
                    "Ignoring invalid rate limit override"
                );
                fallback
            }
        },
    }
}

fn parse_millis<F>(lookup: &F, name: &str, min: u64) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms >= min => Some(ms),
        Ok(_) => {
            warn!(variable = name, value = %raw, min, "Ignoring duration below minimum; using default");
            None
        }
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring invalid duration; using default");
            None
        }
    }
}

fn parse_u32<F>(lookup: &F, name: &str, min: u32) -> Option<u32>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<u32>() {
        Ok(n) if n >= min => Some(n),
        Ok(_) => {
            warn!(variable = name, value = %raw, min, "Ignoring count below minimum; using default");
            None
        }
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring invalid count; using default");
            None
        }
    }
}
