//! Resilient request function.
//!
//! [`FetchClient::fetch`] runs one logical request. Each attempt goes through
//! the same pipeline, and the retry controller repeats the whole pipeline:
//!
//! 1. wait for the rate-limit key's turn
//! 2. ask the circuit breaker for admission
//! 3. `on_start` hooks
//! 4. transport call under the timeout guard
//! 5. record the outcome with the breaker, then `on_success` / `on_error` hooks

use crate::config::{provider_rate_limit, rate_limit_key, FetchConfig};
use crate::errors::{ConfigurationError, FetchResult};
use crate::resilience::hooks::{notify_error, notify_start, notify_success};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerHook, RateLimiter, RequestContext, RequestHooks,
    RetryController, RetryPolicy, TimeoutGuard,
};
use crate::time::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, USER_AGENT};
use http::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use url::Url;

/// Per-request options
#[derive(Clone, Default)]
pub struct FetchOptions {
    method: HttpMethod,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
    timeout: Option<Duration>,
    rate_limit_key: Option<String>,
    rate_limit_interval: Option<Duration>,
    circuit_key: Option<String>,
    retry: Option<RetryPolicy>,
    hooks: Vec<Arc<dyn RequestHooks>>,
}

impl FetchOptions {
    /// GET with client defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Options paced and guarded under the `"<provider>:<account>"` key, using
    /// the provider's configured interval
    pub fn for_provider(provider: &str, account: &str) -> Self {
        Self::new()
            .rate_limit_key(rate_limit_key(provider, account))
            .rate_limit_interval(provider_rate_limit(provider))
    }

    /// Set the method
    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Add a header; caller headers replace client defaults of the same name
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the per-attempt timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the rate-limit key
    pub fn rate_limit_key(mut self, key: impl Into<String>) -> Self {
        self.rate_limit_key = Some(key.into());
        self
    }

    /// Set the minimum spacing between dispatches for the rate-limit key
    pub fn rate_limit_interval(mut self, interval: Duration) -> Self {
        self.rate_limit_interval = Some(interval);
        self
    }

    /// Set the circuit key. Defaults to the rate-limit key; several rate-limit
    /// keys may share one circuit key to share breaker state.
    pub fn circuit_key(mut self, key: impl Into<String>) -> Self {
        self.circuit_key = Some(key.into());
        self
    }

    /// Override the client's retry policy
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Add hooks for this request only; they run after the client's hooks
    pub fn hook(mut self, hooks: Arc<dyn RequestHooks>) -> Self {
        self.hooks.push(hooks);
        self
    }
}

impl std::fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOptions")
            .field("method", &self.method)
            .field("headers", &self.headers.len())
            .field("has_body", &self.body.is_some())
            .field("timeout", &self.timeout)
            .field("rate_limit_key", &self.rate_limit_key)
            .field("rate_limit_interval", &self.rate_limit_interval)
            .field("circuit_key", &self.circuit_key)
            .field("retry", &self.retry)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// Client that applies pacing, circuit breaking, timeouts and retries to every
/// request.
///
/// Clones share rate-limit and breaker state; separately built clients do not.
#[derive(Clone)]
pub struct FetchClient {
    config: Arc<FetchConfig>,
    transport: Arc<dyn HttpTransport>,
    rate_limiter: Arc<RateLimiter>,
    circuit_breaker: Arc<CircuitBreaker>,
    retry: RetryController,
    timeout_guard: TimeoutGuard,
    hooks: Vec<Arc<dyn RequestHooks>>,
}

impl FetchClient {
    /// Create a new client builder
    pub fn builder() -> FetchClientBuilder {
        FetchClientBuilder::new()
    }

    /// Client over `reqwest` with real timers
    pub fn new(config: FetchConfig) -> FetchResult<Self> {
        FetchClientBuilder::new().config(config).build()
    }

    /// Client configured from `JOBFETCH_*` environment variables
    pub fn from_env() -> FetchResult<Self> {
        Self::new(FetchConfig::from_env()?)
    }

    /// Client configuration
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Shared rate limiter
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Shared circuit breaker
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    /// Clear all rate-limit and breaker state
    pub fn reset_state(&self) {
        self.rate_limiter.reset();
        self.circuit_breaker.reset();
    }

    /// Perform one logical request.
    ///
    /// Any HTTP status is returned as a response. Errors are
    /// [`FetchError::Transport`](crate::FetchError::Transport) or
    /// [`FetchError::Timeout`](crate::FetchError::Timeout) after retries run
    /// out, [`FetchError::CircuitOpen`](crate::FetchError::CircuitOpen)
    /// immediately, or [`FetchError::Configuration`](crate::FetchError::Configuration)
    /// before anything is sent.
    #[instrument(skip(self, options), fields(method = %options.method))]
    pub async fn fetch(&self, url: &str, options: FetchOptions) -> FetchResult<HttpResponse> {
        let url = Url::parse(url).map_err(|e| ConfigurationError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let headers = self.build_headers(&options.headers)?;

        let circuit_key = options
            .circuit_key
            .clone()
            .or_else(|| options.rate_limit_key.clone());
        let rate_limit_interval = options
            .rate_limit_key
            .as_ref()
            .and(options.rate_limit_interval.or(self.config.default_rate_limit_interval));

        let context = RequestContext {
            url,
            method: options.method,
            headers,
            timeout: options.timeout.unwrap_or(self.config.default_timeout),
            rate_limit_key: options.rate_limit_key.clone(),
            rate_limit_interval,
            circuit_key,
            attempt: 0,
        };

        let policy = match &options.retry {
            Some(policy) => {
                policy.validate()?;
                policy.clone()
            }
            None => self.config.retry.clone(),
        };
        let hooks: Vec<Arc<dyn RequestHooks>> = self
            .hooks
            .iter()
            .chain(options.hooks.iter())
            .cloned()
            .collect();
        let hooks = hooks.as_slice();
        let body = &options.body;
        let context = &context;

        self.retry
            .run(&policy, |attempt| {
                let ctx = context.with_attempt(attempt);
                let request = HttpRequest {
                    method: ctx.method,
                    url: ctx.url.clone(),
                    headers: ctx.headers.clone(),
                    body: body.clone(),
                };
                async move { self.attempt(ctx, request, hooks).await }
            })
            .await
    }

    async fn attempt(
        &self,
        ctx: RequestContext,
        request: HttpRequest,
        hooks: &[Arc<dyn RequestHooks>],
    ) -> FetchResult<HttpResponse> {
        if let (Some(key), Some(interval)) = (&ctx.rate_limit_key, ctx.rate_limit_interval) {
            self.rate_limiter.await_turn(key, interval).await;
        }

        if let Some(key) = &ctx.circuit_key {
            self.circuit_breaker.check_and_record_attempt(key)?;
        }

        notify_start(hooks, &ctx).await;

        let result = self
            .timeout_guard
            .call(self.transport.as_ref(), request, ctx.timeout)
            .await;

        match &result {
            Ok(response) => {
                if let Some(key) = &ctx.circuit_key {
                    self.circuit_breaker.record_success(key);
                }
                notify_success(hooks, &ctx, response).await;
            }
            Err(err) => {
                if let Some(key) = &ctx.circuit_key {
                    if err.counts_as_failure() {
                        self.circuit_breaker.record_failure(key);
                    }
                }
                notify_error(hooks, &ctx, err).await;
            }
        }

        result
    }

    fn build_headers(&self, extra: &[(String, String)]) -> Result<HeaderMap, ConfigurationError> {
        let mut headers = HeaderMap::new();

        for (name, value) in extra {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigurationError::InvalidHeader {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| ConfigurationError::InvalidHeader {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
            headers.append(header_name, header_value);
        }

        if !headers.contains_key(USER_AGENT) {
            let agent = HeaderValue::from_str(&self.config.user_agent).map_err(|e| {
                ConfigurationError::InvalidHeader {
                    name: USER_AGENT.to_string(),
                    message: e.to_string(),
                }
            })?;
            headers.insert(USER_AGENT, agent);
        }

        Ok(headers)
    }
}

impl std::fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchClient")
            .field("config", &self.config)
            .field("rate_limiter", &self.rate_limiter)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

/// Builder for FetchClient
#[derive(Default)]
pub struct FetchClientBuilder {
    config: Option<FetchConfig>,
    transport: Option<Arc<dyn HttpTransport>>,
    clock: Option<Arc<dyn Clock>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    hooks: Vec<Arc<dyn RequestHooks>>,
    circuit_breaker_hook: Option<Arc<dyn CircuitBreakerHook>>,
}

impl FetchClientBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration
    pub fn config(mut self, config: FetchConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a custom transport
    pub fn transport(mut self, transport: impl HttpTransport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Use a shared transport
    pub fn shared_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom clock
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Use a custom sleeper
    pub fn sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Some(Arc::new(sleeper));
        self
    }

    /// Add hooks that observe every request
    pub fn hook(mut self, hooks: impl RequestHooks + 'static) -> Self {
        self.hooks.push(Arc::new(hooks));
        self
    }

    /// Observe circuit state transitions
    pub fn circuit_breaker_hook(mut self, hook: impl CircuitBreakerHook + 'static) -> Self {
        self.circuit_breaker_hook = Some(Arc::new(hook));
        self
    }

    /// Build the client
    pub fn build(self) -> FetchResult<FetchClient> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::with_defaults()?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let sleeper = self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper));

        let mut circuit_breaker = CircuitBreaker::new(config.circuit_breaker.clone(), clock.clone());
        if let Some(hook) = self.circuit_breaker_hook {
            circuit_breaker = circuit_breaker.with_hook(hook);
        }

        Ok(FetchClient {
            rate_limiter: Arc::new(RateLimiter::new(clock, sleeper.clone())),
            circuit_breaker: Arc::new(circuit_breaker),
            retry: RetryController::new(sleeper.clone()),
            timeout_guard: TimeoutGuard::new(sleeper),
            transport,
            hooks: self.hooks,
            config: Arc::new(config),
        })
    }
}
