//! Deadline for a single transport call.

use crate::errors::{FetchError, FetchResult};
use crate::time::Sleeper;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Races one transport call against a deadline.
///
/// When the deadline passes first the call's [`CancellationToken`] is
/// cancelled and [`FetchError::Timeout`] is returned. Transport failures pass
/// through as [`FetchError::Transport`].
#[derive(Clone)]
pub struct TimeoutGuard {
    sleeper: Arc<dyn Sleeper>,
}

impl TimeoutGuard {
    /// Guard whose countdown runs on `sleeper`
    pub fn new(sleeper: Arc<dyn Sleeper>) -> Self {
        Self { sleeper }
    }

    /// Send `request` through `transport`, giving up after `timeout`
    pub async fn call(
        &self,
        transport: &dyn HttpTransport,
        request: HttpRequest,
        timeout: Duration,
    ) -> FetchResult<HttpResponse> {
        let url = request.url.to_string();
        let cancel = CancellationToken::new();
        let call = transport.send(request, cancel.clone());

        tokio::select! {
            biased;
            result = call => result.map_err(FetchError::from),
            _ = self.sleeper.sleep(timeout) => {
                cancel.cancel();
                warn!(url = %url, timeout_ms = timeout.as_millis() as u64, "Request timed out");
                Err(FetchError::timeout(url, timeout))
            }
        }
    }
}

impl std::fmt::Debug for TimeoutGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutGuard").finish_non_exhaustive()
    }
}
