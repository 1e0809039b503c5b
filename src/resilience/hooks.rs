//! Lifecycle hooks fired around each attempt.
//!
//! `on_start` runs before the transport is called; exactly one of
//! `on_success` or `on_error` runs after it settles. Hooks observe only: they
//! receive borrowed values, cannot change the outcome, and a panicking hook is
//! caught and logged rather than unwinding into the request.

use crate::errors::FetchError;
use crate::transport::{HttpMethod, HttpResponse};
use async_trait::async_trait;
use futures::FutureExt;
use http::HeaderMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

/// Per-attempt view of a logical request
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Target URL
    pub url: Url,
    /// HTTP method
    pub method: HttpMethod,
    /// Headers sent, defaults included
    pub headers: HeaderMap,
    /// Deadline for each attempt
    pub timeout: Duration,
    /// Rate-limit key, if paced
    pub rate_limit_key: Option<String>,
    /// Minimum spacing between dispatches for `rate_limit_key`
    pub rate_limit_interval: Option<Duration>,
    /// Circuit-breaker key, if guarded
    pub circuit_key: Option<String>,
    /// Zero-based attempt index
    pub attempt: u32,
}

impl RequestContext {
    /// Same request, different attempt index
    pub fn with_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }
}

/// Observer for request lifecycle events
#[async_trait]
pub trait RequestHooks: Send + Sync {
    /// Called before each attempt reaches the transport
    async fn on_start(&self, _ctx: &RequestContext) {}

    /// Called when an attempt yields a response of any status
    async fn on_success(&self, _ctx: &RequestContext, _response: &HttpResponse) {}

    /// Called when an attempt fails
    async fn on_error(&self, _ctx: &RequestContext, _error: &FetchError) {}
}

/// Hooks that do nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpHooks;

#[async_trait]
impl RequestHooks for NoOpHooks {}

/// Hooks that emit `tracing` events
#[derive(Debug, Clone)]
pub struct LoggingHooks {
    /// Log attempt starts
    pub log_starts: bool,
    /// Log responses
    pub log_responses: bool,
    /// Log failures
    pub log_errors: bool,
}

impl Default for LoggingHooks {
    fn default() -> Self {
        Self {
            log_starts: true,
            log_responses: true,
            log_errors: true,
        }
    }
}

#[async_trait]
impl RequestHooks for LoggingHooks {
    async fn on_start(&self, ctx: &RequestContext) {
        if self.log_starts {
            debug!(
                url = %ctx.url,
                method = %ctx.method,
                attempt = ctx.attempt,
                "Starting request"
            );
        }
    }

    async fn on_success(&self, ctx: &RequestContext, response: &HttpResponse) {
        if self.log_responses {
            debug!(
                url = %ctx.url,
                method = %ctx.method,
                attempt = ctx.attempt,
                status = response.status().as_u16(),
                "Request completed"
            );
        }
    }

    async fn on_error(&self, ctx: &RequestContext, err: &FetchError) {
        if self.log_errors {
            warn!(
                url = %ctx.url,
                method = %ctx.method,
                attempt = ctx.attempt,
                error_code = err.error_code(),
                error = %err,
                "Request failed"
            );
        }
    }
}

pub(crate) async fn notify_start(hooks: &[Arc<dyn RequestHooks>], ctx: &RequestContext) {
    for hook in hooks {
        isolate("on_start", hook.on_start(ctx)).await;
    }
}

pub(crate) async fn notify_success(
    hooks: &[Arc<dyn RequestHooks>],
    ctx: &RequestContext,
    response: &HttpResponse,
) {
    for hook in hooks {
        isolate("on_success", hook.on_success(ctx, response)).await;
    }
}

pub(crate) async fn notify_error(
    hooks: &[Arc<dyn RequestHooks>],
    ctx: &RequestContext,
    err: &FetchError,
) {
    for hook in hooks {
        isolate("on_error", hook.on_error(ctx, err)).await;
    }
}

async fn isolate<F>(event: &'static str, call: F)
where
    F: std::future::Future<Output = ()>,
{
    if AssertUnwindSafe(call).catch_unwind().await.is_err() {
        error!(event, "Lifecycle hook panicked; ignoring");
    }
}
