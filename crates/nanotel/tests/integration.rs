use nanotel::codec::{decode, Otlp};
use nanotel::otlp::{LogsData, TracesData};
use nanotel::{
    json, BatchTime, Client, ClientConfig, ExportRequest, LogOptions, QueueEvent, RetryConfig,
    Severity, Span, StatusCode, Transport, TransportError, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records every request; can fail the next N sends or every send to one path.
#[derive(Default)]
struct RecordingTransport {
    requests: Mutex<Vec<ExportRequest>>,
    fail_next: AtomicUsize,
    failing_path: Mutex<Option<&'static str>>,
    delay: Duration,
}

impl RecordingTransport {
    fn new() -> Self {
        Self::default()
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    fn fail_path(&self, path: &'static str) {
        *self.failing_path.lock().unwrap() = Some(path);
    }

    fn requests(&self) -> Vec<ExportRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn requests_to(&self, path: &str) -> Vec<ExportRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.url.ends_with(path))
            .collect()
    }
}

impl Transport for RecordingTransport {
    async fn send(&self, request: ExportRequest) -> Result<(), TransportError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let path_fails = self
            .failing_path
            .lock()
            .unwrap()
            .is_some_and(|path| request.url.ends_with(path));
        let next_fails = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        self.requests.lock().unwrap().push(request);

        if path_fails || next_fails {
            Err(TransportError::Status { status: 503 })
        } else {
            Ok(())
        }
    }

    fn name(&self) -> &str {
        "recording"
    }
}

fn client_with(batch_time: BatchTime, transport: &Arc<RecordingTransport>) -> Client {
    let config = ClientConfig::new("http://collector:4318", "integration")
        .with_batch_time(batch_time)
        .with_header("x-api-key", "secret");
    Client::with_shared_transport(config, transport.clone()).unwrap()
}

fn log_bodies(request: &ExportRequest) -> Vec<Value> {
    let data: LogsData = serde_json::from_str(&request.body).unwrap();
    data.resource_logs[0].scope_logs[0]
        .log_records
        .iter()
        .map(|record| decode(Otlp::Value(record.body.as_ref().unwrap())))
        .collect()
}

fn spans(request: &ExportRequest) -> Vec<Span> {
    let data: TracesData = serde_json::from_str(&request.body).unwrap();
    data.resource_spans[0].scope_spans[0].spans.clone()
}

/// Lets spawned flush tasks run without moving the paused clock meaningfully.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_immediate_sends_each_log() {
    let transport = Arc::new(RecordingTransport::new());
    let client = client_with(BatchTime::Immediate, &transport);

    client.log("first", LogOptions::level(Severity::Info));
    settle().await;

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "http://collector:4318/v1/logs");
    assert_eq!(requests[0].header("content-type"), Some("application/json"));
    assert_eq!(requests[0].header("x-api-key"), Some("secret"));
    assert_eq!(log_bodies(&requests[0]), vec![json!("first")]);
    assert!(client.telemetry_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_window_batches_logs_into_one_send() {
    let transport = Arc::new(RecordingTransport::new());
    let client = client_with(BatchTime::After(Duration::from_millis(1000)), &transport);

    for i in 0..5 {
        client.log(json!({"n": i}), LogOptions::new());
    }
    tokio::time::sleep(Duration::from_millis(999)).await;
    assert!(transport.requests().is_empty());
    assert_eq!(client.telemetry_events().len(), 5);

    tokio::time::sleep(Duration::from_millis(2)).await;
    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    let bodies = log_bodies(&requests[0]);
    assert_eq!(bodies.len(), 5);
    assert_eq!(bodies[4], json!({"n": 4}));

    // the next log starts a fresh window
    client.log("later", LogOptions::new());
    tokio::time::sleep(Duration::from_millis(1001)).await;
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_never_waits_for_explicit_flush() {
    let transport = Arc::new(RecordingTransport::new());
    let client = client_with(BatchTime::Never, &transport);

    client.log("held", LogOptions::new());
    client.trace("held-span", |_| ());
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert!(transport.requests().is_empty());

    client.flush().await;
    assert_eq!(transport.requests_to("/v1/logs").len(), 1);
    assert_eq!(transport.requests_to("/v1/traces").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_span_is_reported_and_error_propagates() {
    let transport = Arc::new(RecordingTransport::new());
    let client = client_with(BatchTime::Never, &transport);

    let result: Result<u32, String> =
        client.try_trace("charge-card", |_| Err("foo: card declined".to_string()));
    assert_eq!(result, Err("foo: card declined".to_string()));

    client.flush().await;
    let spans = spans(&transport.requests_to("/v1/traces")[0]);
    assert_eq!(spans.len(), 1);
    let status = spans[0].status.as_ref().unwrap();
    assert_eq!(status.code, StatusCode::Error);
    assert!(status.message.as_deref().unwrap().contains("foo"));
    assert_eq!(spans[0].attributes[0].key, "error");
}

#[tokio::test(start_paused = true)]
async fn test_panicking_async_span_is_reported() {
    let transport = Arc::new(RecordingTransport::new());
    let client = client_with(BatchTime::Never, &transport);

    let task = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .span("async-boom")
                .run_async(|_| async {
                    tokio::task::yield_now().await;
                    if true {
                        panic!("foo in task");
                    }
                    1u8
                })
                .await
        }
    });
    assert!(task.await.unwrap_err().is_panic());

    client.flush().await;
    let spans = spans(&transport.requests_to("/v1/traces")[0]);
    assert!(spans[0].is_error());
    assert_eq!(
        spans[0].status.as_ref().unwrap().message.as_deref(),
        Some("foo in task")
    );
}

#[tokio::test(start_paused = true)]
async fn test_nested_calls_link_parent_and_trace() {
    let transport = Arc::new(RecordingTransport::new());
    let client = client_with(BatchTime::Never, &transport);

    client.trace("outer", |outer| {
        outer.trace("inner", |inner| {
            inner.trace("innermost", |_| ());
        });
    });

    client.flush().await;
    let spans = spans(&transport.requests_to("/v1/traces")[0]);
    let by_name = |name: &str| spans.iter().find(|s| s.name == name).unwrap();
    let (outer, inner, innermost) = (by_name("outer"), by_name("inner"), by_name("innermost"));

    assert_eq!(outer.parent_span_id, None);
    assert_eq!(inner.parent_span_id.as_deref(), Some(outer.span_id.as_str()));
    assert_eq!(innermost.parent_span_id.as_deref(), Some(inner.span_id.as_str()));
    assert!(spans.iter().all(|s| s.trace_id == outer.trace_id));
}

#[tokio::test(start_paused = true)]
async fn test_async_span_correlates_logs() {
    let transport = Arc::new(RecordingTransport::new());
    let client = client_with(BatchTime::Never, &transport);

    let parsed = client
        .span("fetch-orders")
        .with_attribute("http.route", "/orders")
        .run_async(|scope| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            scope.log("fetched", LogOptions::level(Severity::Debug));
            scope.trace("parse", |_| 5)
        })
        .await;
    assert_eq!(parsed, 5);

    client.flush().await;
    let spans = spans(&transport.requests_to("/v1/traces")[0]);
    let fetch = spans.iter().find(|s| s.name == "fetch-orders").unwrap();
    let parse = spans.iter().find(|s| s.name == "parse").unwrap();
    assert_eq!(parse.parent_span_id.as_deref(), Some(fetch.span_id.as_str()));

    let logs: LogsData =
        serde_json::from_str(&transport.requests_to("/v1/logs")[0].body).unwrap();
    let record = &logs.resource_logs[0].scope_logs[0].log_records[0];
    assert_eq!(record.trace_id.as_deref(), Some(fetch.trace_id.as_str()));
    assert_eq!(record.span_id.as_deref(), Some(fetch.span_id.as_str()));
    assert_eq!(record.severity_number, Some(5));
}

#[tokio::test(start_paused = true)]
async fn test_failed_batch_is_resent_once() {
    let transport = Arc::new(RecordingTransport::new());
    let client = client_with(BatchTime::After(Duration::from_millis(100)), &transport);
    transport.fail_next(1);

    client.log("a", LogOptions::new());
    client.log("b", LogOptions::new());
    tokio::time::sleep(Duration::from_millis(101)).await;
    assert_eq!(transport.requests().len(), 1);
    assert_eq!(client.telemetry_events().len(), 2);

    client.log("c", LogOptions::new());
    tokio::time::sleep(Duration::from_millis(101)).await;

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(log_bodies(&requests[1]), vec![json!("a"), json!("b"), json!("c")]);
    assert!(client.telemetry_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_bounded_retry_drops_batch() {
    let transport = Arc::new(RecordingTransport::new());
    let config = ClientConfig::new("http://collector:4318", "integration")
        .with_batch_time(BatchTime::Immediate)
        .with_retry(RetryConfig {
            max_retries: Some(1),
            ..RetryConfig::default()
        });
    let client = Client::with_shared_transport(config, transport.clone()).unwrap();
    transport.fail_next(usize::MAX);

    client.log("doomed", LogOptions::new());
    settle().await;
    assert_eq!(transport.requests().len(), 1);

    // one retry after the initial backoff, then the batch is dropped
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.requests().len(), 2);
    assert!(client.telemetry_events().is_empty());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_channels_fail_independently() {
    let transport = Arc::new(RecordingTransport::new());
    let client = client_with(BatchTime::Never, &transport);
    transport.fail_path("/v1/logs");

    client.log("stuck", LogOptions::new());
    client.trace("delivered", |_| ());
    client.flush().await;

    assert_eq!(transport.requests_to("/v1/traces").len(), 1);
    let pending = client.telemetry_events();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].as_log().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_events_logged_during_send_go_to_next_batch() {
    let transport = Arc::new(RecordingTransport::slow(Duration::from_millis(50)));
    let client = client_with(BatchTime::Immediate, &transport);

    client.log("one", LogOptions::new());
    settle().await;
    client.log("two", LogOptions::new());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    let mut bodies: Vec<_> = requests.iter().flat_map(log_bodies).collect();
    bodies.sort_by_key(ToString::to_string);
    assert_eq!(bodies, vec![json!("one"), json!("two")]);
}

#[tokio::test(start_paused = true)]
async fn test_resource_carries_service_and_globals() {
    let transport = Arc::new(RecordingTransport::new());
    let client = client_with(BatchTime::Never, &transport);
    client.add_global_attribute("session.id", "abc123");
    client.add_global_attribute("build", 42);

    client.log("hi", LogOptions::new());
    client.flush().await;

    let data: LogsData = serde_json::from_str(&transport.requests()[0].body).unwrap();
    let resource = &data.resource_logs[0].resource.attributes;
    let keys: Vec<_> = resource.iter().map(|kv| kv.key.as_str()).collect();
    assert_eq!(keys, ["service.name", "session.id", "build"]);
    assert_eq!(
        decode(Otlp::Pairs(resource)),
        json!({"service.name": "integration", "session.id": "abc123", "build": 42})
    );
}

#[tokio::test(start_paused = true)]
async fn test_flush_on_signal() {
    let transport = Arc::new(RecordingTransport::new());
    let client = client_with(BatchTime::Never, &transport);
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let flusher = client.flush_on(async move {
        let _ = rx.await;
    });
    client.log("before hide", LogOptions::new());
    settle().await;
    assert!(transport.requests().is_empty());

    tx.send(()).unwrap();
    flusher.await.unwrap();
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_sends_pending_and_cancels_timers() {
    let transport = Arc::new(RecordingTransport::new());
    let client = client_with(BatchTime::After(Duration::from_secs(10)), &transport);

    client.log("pending", LogOptions::new());
    client.shutdown().await;
    assert_eq!(transport.requests().len(), 1);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_listeners_mirror_the_queue() {
    let transport = Arc::new(RecordingTransport::new());
    let client = client_with(BatchTime::Never, &transport);
    let added = Arc::new(AtomicUsize::new(0));
    let removed = Arc::new(AtomicUsize::new(0));

    let id = {
        let (added, removed) = (added.clone(), removed.clone());
        client.subscribe(move |event| match event {
            QueueEvent::Added(_) => {
                added.fetch_add(1, Ordering::SeqCst);
            }
            QueueEvent::Removed(_) => {
                removed.fetch_add(1, Ordering::SeqCst);
            }
            QueueEvent::Cleared => {}
        })
    };

    client.log("x", LogOptions::new());
    client.trace("y", |_| ());
    assert_eq!(added.load(Ordering::SeqCst), 2);

    client.flush().await;
    assert_eq!(removed.load(Ordering::SeqCst), 2);

    assert!(client.unsubscribe(id));
    client.log("z", LogOptions::new());
    assert_eq!(added.load(Ordering::SeqCst), 2);
}
