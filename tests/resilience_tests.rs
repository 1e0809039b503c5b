//! Integration tests for the resilient request pipeline (pacing, circuit breaker, retry, timeout, hooks).

use async_trait::async_trait;
use integrations_jobfetch::errors::ErrorKind;
use integrations_jobfetch::mocks::{
    HookEvent, ManualClock, MockResponse, MockTransport, RecordingHooks, TrackingSleeper,
};
use integrations_jobfetch::resilience::{
    CircuitBreakerConfig, CircuitState, RequestContext, RequestHooks, RetryPolicy,
};
use integrations_jobfetch::time::elapsed_between;
use integrations_jobfetch::{FetchClient, FetchConfig, FetchError, FetchOptions, HttpResponse};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const URL: &str = "https://api.lever.co/v0/postings/acme";

struct TestClient {
    client: FetchClient,
    transport: MockTransport,
    clock: ManualClock,
    sleeper: TrackingSleeper,
}

fn build(config: FetchConfig, hooks: Option<RecordingHooks>) -> TestClient {
    let transport = MockTransport::new();
    let clock = ManualClock::new();
    let sleeper = TrackingSleeper::advancing(clock.clone());
    let mut builder = FetchClient::builder()
        .config(config)
        .transport(transport.clone())
        .clock(clock.clone())
        .sleeper(sleeper.clone());
    if let Some(hooks) = hooks {
        builder = builder.hook(hooks);
    }
    TestClient {
        client: builder.build().unwrap(),
        transport,
        clock,
        sleeper,
    }
}

fn breaker_config(threshold: u32, reset: Duration) -> FetchConfig {
    FetchConfig::builder()
        .retry(RetryPolicy::none())
        .circuit_breaker(
            CircuitBreakerConfig::new()
                .failure_threshold(threshold)
                .reset_timeout(reset),
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_same_key_dispatches_are_spaced_by_interval() {
    let t = build(FetchConfig::default(), None);
    for _ in 0..3 {
        t.transport.push_response(MockResponse::ok());
    }
    let interval = Duration::from_millis(500);
    let options = FetchOptions::new()
        .rate_limit_key("lever:acme")
        .rate_limit_interval(interval);

    let mut dispatched = Vec::new();
    for _ in 0..3 {
        assert_ok!(t.client.fetch(URL, options.clone()).await);
        dispatched.push(t.clock.now());
        t.clock.advance(Duration::from_millis(120));
    }

    for pair in dispatched.windows(2) {
        assert!(elapsed_between(pair[0], pair[1]) >= interval);
    }
    assert_eq!(
        t.sleeper.calls(),
        vec![Duration::from_millis(380), Duration::from_millis(380)]
    );
}

#[tokio::test]
async fn test_different_keys_are_not_paced_together() {
    let t = build(FetchConfig::default(), None);
    t.transport
        .push_response(MockResponse::ok())
        .push_response(MockResponse::ok());
    let interval = Duration::from_secs(2);

    assert_ok!(
        t.client
            .fetch(URL, FetchOptions::new().rate_limit_key("lever:a").rate_limit_interval(interval))
            .await
    );
    assert_ok!(
        t.client
            .fetch(URL, FetchOptions::new().rate_limit_key("lever:b").rate_limit_interval(interval))
            .await
    );

    assert!(t.sleeper.calls().is_empty());
}

#[tokio::test]
async fn test_breaker_opens_then_probes_once_after_reset() {
    let reset = Duration::from_secs(30);
    let t = build(breaker_config(3, reset), None);
    for _ in 0..3 {
        t.transport.push_error("connection refused");
    }
    let options = FetchOptions::new().rate_limit_key("ashby:acme");

    for _ in 0..3 {
        let err = assert_err!(t.client.fetch(URL, options.clone()).await);
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    // Before the cooldown: rejected without touching the transport
    t.clock.advance(Duration::from_secs(29));
    let err = assert_err!(t.client.fetch(URL, options.clone()).await);
    match &err {
        FetchError::CircuitOpen {
            circuit_key,
            retry_at,
        } => {
            assert_eq!(circuit_key, "ashby:acme");
            assert_eq!(elapsed_between(t.clock.now(), *retry_at), Duration::from_secs(1));
        }
        other => panic!("expected CircuitOpen, got {other:?}"),
    }
    assert_eq!(t.transport.request_count(), 3);

    // At the cooldown boundary: exactly one probe reaches the transport
    t.clock.advance(Duration::from_secs(1));
    t.transport.push_response(MockResponse::ok());
    let response = assert_ok!(t.client.fetch(URL, options).await);
    assert!(response.ok());
    assert_eq!(t.transport.request_count(), 4);
    assert_eq!(
        t.client.circuit_breaker().state("ashby:acme"),
        CircuitState::Closed
    );
}

#[tokio::test]
async fn test_failed_probe_restarts_cooldown() {
    let t = build(breaker_config(1, Duration::from_secs(10)), None);
    t.transport.push_error("refused").push_error("still refused");
    let options = FetchOptions::new().circuit_key("workable:acme");

    assert_err!(t.client.fetch(URL, options.clone()).await);
    t.clock.advance(Duration::from_secs(10));
    assert_err!(t.client.fetch(URL, options.clone()).await);

    t.clock.advance(Duration::from_secs(5));
    let err = assert_err!(t.client.fetch(URL, options).await);
    assert!(err.is_circuit_open());
    assert_eq!(t.transport.request_count(), 2);
}

#[tokio::test]
async fn test_tripping_one_key_leaves_another_open() {
    let t = build(breaker_config(1, Duration::from_secs(60)), None);
    t.transport
        .push_error("refused")
        .push_response(MockResponse::ok());

    assert_err!(t.client.fetch(URL, FetchOptions::new().circuit_key("A")).await);
    assert_ok!(t.client.fetch(URL, FetchOptions::new().circuit_key("B")).await);

    assert_eq!(t.client.circuit_breaker().state("A"), CircuitState::Open);
    assert_eq!(t.client.circuit_breaker().state("B"), CircuitState::Closed);
}

#[tokio::test]
async fn test_backoff_schedule_through_client() {
    let config = FetchConfig::builder()
        .retry(RetryPolicy::new(2, Duration::from_millis(25), 2.0))
        .build()
        .unwrap();
    let t = build(config, None);
    t.transport
        .push_error("reset")
        .push_error("reset")
        .push_response(MockResponse::json(serde_json::json!({"jobs": []})));

    let response = assert_ok!(t.client.fetch(URL, FetchOptions::new()).await);

    assert!(response.ok());
    assert_eq!(t.transport.request_count(), 3);
    assert_eq!(
        t.sleeper.calls(),
        vec![Duration::from_millis(25), Duration::from_millis(50)]
    );
}

#[tokio::test]
async fn test_exhausted_retries_return_last_transport_error() {
    let config = FetchConfig::builder()
        .retry(RetryPolicy::new(1, Duration::from_millis(10), 2.0))
        .build()
        .unwrap();
    let t = build(config, None);
    t.transport.push_error("first").push_error("second");

    let err = assert_err!(t.client.fetch(URL, FetchOptions::new()).await);

    assert_eq!(err.to_string(), "Transport error: Connection failed: second");
}

#[tokio::test]
async fn test_timeout_is_distinct_and_retried() {
    let config = FetchConfig::builder()
        .retry(RetryPolicy::new(1, Duration::from_millis(50), 2.0))
        .default_timeout(Duration::from_millis(800))
        .build()
        .unwrap();
    let t = build(config, None);
    t.transport.push_hang().push_response(MockResponse::ok());

    let response = assert_ok!(t.client.fetch(URL, FetchOptions::new()).await);

    assert!(response.ok());
    assert_eq!(t.transport.cancelled_count(), 1);
    assert_eq!(
        t.sleeper.calls(),
        vec![Duration::from_millis(800), Duration::from_millis(50)]
    );
}

#[tokio::test]
async fn test_timeout_error_kind() {
    let t = build(breaker_config(5, Duration::from_secs(1)), None);
    t.transport.push_hang();

    let err = assert_err!(
        t.client
            .fetch(URL, FetchOptions::new().timeout(Duration::from_millis(100)))
            .await
    );

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.error_code(), "FETCH_TIMEOUT");
    assert!(!matches!(err, FetchError::Transport(_)));
}

/// Notes how many transport calls had happened at each hook
struct OrderingHooks {
    transport: MockTransport,
    seen: Mutex<Vec<(&'static str, usize)>>,
}

#[async_trait]
impl RequestHooks for OrderingHooks {
    async fn on_start(&self, _ctx: &RequestContext) {
        self.seen.lock().push(("start", self.transport.request_count()));
    }

    async fn on_success(&self, _ctx: &RequestContext, _response: &HttpResponse) {
        self.seen.lock().push(("success", self.transport.request_count()));
    }

    async fn on_error(&self, _ctx: &RequestContext, _error: &FetchError) {
        self.seen.lock().push(("error", self.transport.request_count()));
    }
}

#[tokio::test]
async fn test_on_start_runs_before_transport() {
    let config = FetchConfig::builder()
        .retry(RetryPolicy::new(1, Duration::from_millis(5), 2.0))
        .build()
        .unwrap();
    let t = build(config, None);
    t.transport.push_error("reset").push_response(MockResponse::ok());

    let hooks = Arc::new(OrderingHooks {
        transport: t.transport.clone(),
        seen: Mutex::new(Vec::new()),
    });
    assert_ok!(
        t.client
            .fetch(URL, FetchOptions::new().hook(hooks.clone()))
            .await
    );

    assert_eq!(
        hooks.seen.lock().clone(),
        vec![("start", 0), ("error", 1), ("start", 1), ("success", 2)]
    );
}

/// Hooks that panic on every event
struct ExplodingHooks;

#[async_trait]
impl RequestHooks for ExplodingHooks {
    async fn on_start(&self, _ctx: &RequestContext) {
        panic!("telemetry down");
    }

    async fn on_success(&self, _ctx: &RequestContext, _response: &HttpResponse) {
        panic!("telemetry down");
    }

    async fn on_error(&self, _ctx: &RequestContext, _error: &FetchError) {
        panic!("telemetry down");
    }
}

#[tokio::test]
async fn test_hooks_never_change_the_outcome() {
    let recorder = RecordingHooks::new();
    let t = build(breaker_config(5, Duration::from_secs(1)), Some(recorder.clone()));
    t.transport
        .push_response(MockResponse::text(404, "not found"))
        .push_error("refused");

    let exploding = FetchOptions::new().hook(Arc::new(ExplodingHooks));
    let response = assert_ok!(t.client.fetch(URL, exploding.clone()).await);
    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(response.text(), "not found");

    let err = assert_err!(t.client.fetch(URL, exploding).await);
    assert_eq!(err.kind(), ErrorKind::Transport);

    assert_eq!(
        recorder.events(),
        vec![
            HookEvent::Start { attempt: 0 },
            HookEvent::Success {
                attempt: 0,
                status: 404
            },
            HookEvent::Start { attempt: 0 },
            HookEvent::Error {
                attempt: 0,
                error_code: "FETCH_TRANSPORT"
            },
        ]
    );
}

#[tokio::test]
async fn test_breaker_rejection_fires_no_hooks() {
    let recorder = RecordingHooks::new();
    let t = build(breaker_config(1, Duration::from_secs(60)), Some(recorder.clone()));
    t.transport.push_error("refused");
    let options = FetchOptions::new().circuit_key("greenhouse:acme");

    assert_err!(t.client.fetch(URL, options.clone()).await);
    recorder.clear();

    assert_err!(t.client.fetch(URL, options).await);
    assert!(recorder.events().is_empty());
    assert_eq!(t.client.circuit_breaker().total_rejections(), 1);
}

#[tokio::test]
async fn test_reset_state_isolates_runs() {
    let t = build(breaker_config(1, Duration::from_secs(60)), None);
    t.transport.push_error("refused").push_response(MockResponse::ok());
    let options = FetchOptions::new()
        .rate_limit_key("smartrecruiters:acme")
        .rate_limit_interval(Duration::from_secs(5));

    assert_err!(t.client.fetch(URL, options.clone()).await);
    t.client.reset_state();

    assert_ok!(t.client.fetch(URL, options).await);
    assert!(t.sleeper.calls().is_empty());
}
