//! Resilience patterns for outbound requests.
//!
//! Provides keyed rate limiting, a keyed circuit breaker, retry with
//! exponential backoff, a per-attempt timeout guard and lifecycle hooks.
//! [`FetchClient`](crate::client::FetchClient) composes them.

pub mod circuit_breaker;
pub mod hooks;
pub mod rate_limiter;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerHook, CircuitSnapshot, CircuitState,
};
pub use hooks::{LoggingHooks, NoOpHooks, RequestContext, RequestHooks};
pub use rate_limiter::RateLimiter;
pub use retry::{RetryController, RetryPolicy};
pub use timeout::TimeoutGuard;
