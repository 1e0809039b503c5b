//! Recording lifecycle hooks.

use crate::errors::FetchError;
use crate::resilience::{RequestContext, RequestHooks};
use crate::transport::HttpResponse;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// One observed lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    /// `on_start`
    Start {
        /// Attempt index
        attempt: u32,
    },
    /// `on_success`
    Success {
        /// Attempt index
        attempt: u32,
        /// Response status
        status: u16,
    },
    /// `on_error`
    Error {
        /// Attempt index
        attempt: u32,
        /// [`FetchError::error_code`] of the failure
        error_code: &'static str,
    },
}

/// Hooks that keep an ordered log of every event. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingHooks {
    events: Arc<Mutex<Vec<HookEvent>>>,
}

impl RecordingHooks {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Events seen so far
    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().clone()
    }

    /// Clear the log
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl RequestHooks for RecordingHooks {
    async fn on_start(&self, ctx: &RequestContext) {
        self.events.lock().push(HookEvent::Start {
            attempt: ctx.attempt,
        });
    }

    async fn on_success(&self, ctx: &RequestContext, response: &HttpResponse) {
        self.events.lock().push(HookEvent::Success {
            attempt: ctx.attempt,
            status: response.status().as_u16(),
        });
    }

    async fn on_error(&self, ctx: &RequestContext, error: &FetchError) {
        self.events.lock().push(HookEvent::Error {
            attempt: ctx.attempt,
            error_code: error.error_code(),
        });
    }
}
