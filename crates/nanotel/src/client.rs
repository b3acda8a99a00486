//! Client - public entry point
//!
//! Composes the queue, the per-channel flush policy and a transport on a
//! tokio runtime:
//!
//! ```text
//! log / trace ──▶ EventQueue ──▶ ChannelSchedule ──▶ timer task ──▶ Transport
//!                     ▲                                               │
//!                     └────────────── requeue on failure ◀────────────┘
//! ```
//!
//! Each channel (logs, spans) has one slot holding its schedule and at most
//! one pending timer. Sends never hold a lock across an `.await`; a batch is
//! drained before the request is issued, so events logged while a send is in
//! flight go into the next batch.

use std::future::Future;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::codec::{encode, encode_key_values, Attributes};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::ids::TraceContext;
use crate::invariants::debug_assert_single_timer;
use crate::lock;
use crate::otlp::{LogRecord, LogsData, Resource, Severity, TracesData};
use crate::queue::{Channel, EventQueue, ListenerId, QueueEvent, TelemetryEvent};
use crate::scheduler::{ChannelSchedule, FlushAction};
use crate::trace::{now_unix_nanos, SpanBuilder, TraceOptions, TraceScope};
use crate::transport::{ExportRequest, Transport, TransportBoxed};

/// Options for a single log record.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Defaults to [`Severity::Trace`] when unset.
    pub severity: Option<Severity>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub attributes: Attributes,
}

impl LogOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options with only a severity set.
    pub fn level(severity: Severity) -> Self {
        Self::default().with_severity(severity)
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }

    /// Correlates the record with a traced call.
    pub fn with_context(self, context: &TraceContext) -> Self {
        self.with_trace_id(context.trace_id.clone())
            .with_span_id(context.span_id.clone())
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    fn into_record(self, body: &Value) -> LogRecord {
        let severity = self.severity.unwrap_or(Severity::Trace);

        let mut attributes = Attributes::new();
        if severity.is_error() {
            attributes.insert("error".to_string(), Value::from(1));
        }
        attributes.extend(self.attributes);

        LogRecord {
            time_unix_nano: now_unix_nanos(),
            body: encode(body),
            severity_number: Some(severity.number()),
            attributes: encode_key_values(&attributes),
            trace_id: self.trace_id,
            span_id: self.span_id,
        }
    }
}

/// Per-channel scheduling state and its pending timer.
#[derive(Default)]
struct ChannelSlot {
    schedule: ChannelSchedule,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    config: ClientConfig,
    transport: Arc<dyn TransportBoxed>,
    queue: EventQueue,
    global_attributes: Mutex<Attributes>,
    logs: Mutex<ChannelSlot>,
    spans: Mutex<ChannelSlot>,
    runtime: Handle,
}

impl Inner {
    fn slot(&self, channel: Channel) -> &Mutex<ChannelSlot> {
        match channel {
            Channel::Logs => &self.logs,
            Channel::Spans => &self.spans,
        }
    }
}

/// Telemetry client handle.
///
/// Cheap to clone; all clones share one queue and one set of timers.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Creates a client sending through `transport`.
    ///
    /// Must be called inside a tokio runtime; timers and sends are spawned
    /// on it.
    pub fn new(config: ClientConfig, transport: impl Transport + 'static) -> Result<Self, ClientError> {
        Self::with_shared_transport(config, Arc::new(transport))
    }

    /// Creates a client over an already shared transport.
    pub fn with_shared_transport(
        config: ClientConfig,
        transport: Arc<dyn TransportBoxed>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        debug!(
            url = %config.base_url(),
            service = %config.service_name,
            batch_time = ?config.batch_time,
            transport = transport.name(),
            "telemetry client created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                queue: EventQueue::new(),
                global_attributes: Mutex::new(Attributes::new()),
                logs: Mutex::new(ChannelSlot::default()),
                spans: Mutex::new(ChannelSlot::default()),
                runtime,
            }),
        })
    }

    /// Creates a client posting OTLP/JSON over HTTP.
    #[cfg(feature = "http")]
    pub fn with_http(config: ClientConfig) -> Result<Self, ClientError> {
        Self::new(config, crate::transport::HttpTransport::new()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // ---------------------------------------------------------------------
    // Producers
    // ---------------------------------------------------------------------

    /// Queues a log record.
    pub fn log(&self, body: impl Into<Value>, options: LogOptions) {
        let record = options.into_record(&body.into());
        self.enqueue(TelemetryEvent::Log(record));
    }

    /// Adds a resource attribute to every batch sent from now on.
    pub fn add_global_attribute(&self, key: impl Into<String>, value: impl Into<Value>) {
        lock(&self.inner.global_attributes).insert(key.into(), value.into());
    }

    /// Starts building a traced call in a new trace.
    pub fn span(&self, name: impl Into<String>) -> SpanBuilder {
        SpanBuilder::new(self.clone(), name.into())
    }

    /// Runs `f` as a traced call in a new trace.
    pub fn trace<T>(&self, name: impl Into<String>, f: impl FnOnce(&TraceScope) -> T) -> T {
        self.span(name).run(f)
    }

    pub fn try_trace<T, E: std::fmt::Display>(
        &self,
        name: impl Into<String>,
        f: impl FnOnce(&TraceScope) -> Result<T, E>,
    ) -> Result<T, E> {
        self.span(name).try_run(f)
    }

    pub fn trace_with<T>(
        &self,
        name: impl Into<String>,
        options: TraceOptions,
        f: impl FnOnce(&TraceScope) -> T,
    ) -> T {
        self.span(name).with_options(options).run(f)
    }

    pub(crate) fn enqueue(&self, event: TelemetryEvent) {
        let channel = event.channel();
        trace!(?channel, "event queued");
        self.inner.queue.add(event);

        let batch_time = self.inner.config.batch_time;
        let action = self.decide(channel, |schedule| schedule.on_enqueue(batch_time));
        self.apply(channel, action);
    }

    // ---------------------------------------------------------------------
    // Queue access
    // ---------------------------------------------------------------------

    /// Snapshot of the events waiting to be sent, oldest first.
    pub fn telemetry_events(&self) -> Vec<TelemetryEvent> {
        self.inner.queue.snapshot()
    }

    /// Observes queue changes (events added, sent or re-queued).
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&QueueEvent<'_>) + Send + Sync + 'static,
    {
        self.inner.queue.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.queue.unsubscribe(id)
    }

    // ---------------------------------------------------------------------
    // Flushing
    // ---------------------------------------------------------------------

    /// Sends everything buffered on both channels now.
    ///
    /// Failed batches are re-queued and retried per the configured policy;
    /// the failure itself is only logged.
    pub async fn flush(&self) {
        tokio::join!(
            self.flush_channel(Channel::Logs),
            self.flush_channel(Channel::Spans)
        );
    }

    /// Flushes on the runtime without waiting (for use from a trigger callback).
    pub fn flush_in_background(&self) -> JoinHandle<()> {
        let client = self.clone();
        self.inner.runtime.spawn(async move { client.flush().await })
    }

    /// Flushes once `signal` resolves, e.g. `tokio::signal::ctrl_c()`.
    pub fn flush_on<S>(&self, signal: S) -> JoinHandle<()>
    where
        S: Future + Send + 'static,
    {
        let client = self.clone();
        self.inner.runtime.spawn(async move {
            signal.await;
            debug!("lifecycle signal received, flushing");
            client.flush().await;
        })
    }

    /// Cancels pending timers and sends whatever is buffered.
    pub async fn shutdown(&self) {
        for channel in Channel::ALL {
            let mut slot = lock(self.inner.slot(channel));
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
            slot.schedule.on_timer_cancelled();
        }
        self.flush().await;
        debug!("telemetry client shut down");
    }

    fn decide(
        &self,
        channel: Channel,
        f: impl FnOnce(&mut ChannelSchedule) -> FlushAction,
    ) -> FlushAction {
        f(&mut lock(self.inner.slot(channel)).schedule)
    }

    fn apply(&self, channel: Channel, action: FlushAction) {
        match action {
            FlushAction::SendNow => {
                let client = self.clone();
                self.inner
                    .runtime
                    .spawn(async move { client.flush_channel(channel).await });
            }
            FlushAction::ArmTimer(delay) => {
                let mut slot = lock(self.inner.slot(channel));
                debug_assert_single_timer!(channel, slot.timer);

                let client = self.clone();
                slot.timer = Some(self.inner.runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    {
                        let mut slot = lock(client.inner.slot(channel));
                        slot.schedule.on_timer_fired();
                        slot.timer = None;
                    }
                    client.flush_channel(channel).await;
                }));
            }
            FlushAction::Idle | FlushAction::Drop => {}
        }
    }

    async fn flush_channel(&self, channel: Channel) {
        let batch = self.inner.queue.drain(channel);
        if batch.is_empty() {
            return;
        }
        let count = batch.len();

        let request = match self.export_request(channel, &batch) {
            Ok(request) => request,
            Err(error) => {
                warn!(?channel, count, %error, "batch could not be serialized, dropped");
                return;
            }
        };

        debug!(?channel, count, transport = self.inner.transport.name(), "sending batch");
        match self.inner.transport.send_boxed(request).await {
            Ok(()) => {
                lock(self.inner.slot(channel)).schedule.on_send_success();
                debug!(?channel, count, "batch sent");
            }
            Err(error) => {
                let config = &self.inner.config;
                let action = self.decide(channel, |schedule| {
                    schedule.on_send_failure(config.batch_time, &config.retry)
                });
                if action == FlushAction::Drop {
                    warn!(?channel, count, %error, "send failed, retries exhausted, batch dropped");
                    return;
                }
                warn!(
                    ?channel,
                    count,
                    %error,
                    rejected = error.is_client_error(),
                    "send failed, batch re-queued"
                );
                self.inner.queue.requeue(batch);
                self.apply(channel, action);
            }
        }
    }

    fn resource(&self) -> Resource {
        let mut attributes = Attributes::new();
        attributes.insert(
            "service.name".to_string(),
            Value::String(self.inner.config.service_name.clone()),
        );
        attributes.extend(lock(&self.inner.global_attributes).clone());
        Resource {
            attributes: encode_key_values(&attributes),
        }
    }

    fn export_request(
        &self,
        channel: Channel,
        batch: &[TelemetryEvent],
    ) -> Result<ExportRequest, serde_json::Error> {
        let resource = self.resource();
        let body = match channel {
            Channel::Logs => {
                let records = batch.iter().filter_map(TelemetryEvent::as_log).cloned().collect();
                serde_json::to_string(&LogsData::single(resource, records))?
            }
            Channel::Spans => {
                let spans = batch.iter().filter_map(TelemetryEvent::as_span).cloned().collect();
                serde_json::to_string(&TracesData::single(resource, spans))?
            }
        };

        let config = &self.inner.config;
        let mut headers = Vec::with_capacity(config.headers.len() + 1);
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
        headers.extend(config.headers.iter().cloned());

        Ok(ExportRequest {
            url: format!("{}{}", config.base_url(), channel.path()),
            headers,
            body,
        })
    }
}
