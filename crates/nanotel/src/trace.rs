//! Traced calls.
//!
//! A traced call runs a user function inside an open span:
//!
//! ```text
//! Pending ──begin──▶ Running ──settle──▶ Settled ──▶ Enqueued
//! ```
//!
//! [`SpanBuilder`] allocates the ids and start time (`Pending`), hands the
//! function a [`TraceScope`] (`Running`), and once the function returns,
//! errors, panics, or its future completes, finalizes the span exactly once
//! and pushes it to the client's queue. Failures are recorded and then handed
//! back to the caller untouched: an `Err` is returned as-is and a panic is
//! resumed with its original payload.
//!
//! The open span lives behind the scope handle only while the call runs.
//! Settling takes it out, so writes through a scope that outlived its call
//! are ignored.

use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use futures_util::FutureExt;
use tracing::{debug, trace};

use crate::client::{Client, LogOptions};
use crate::codec::{encode_key_values, Attributes};
use crate::ids::{new_span_id, new_trace_id, TraceContext};
use crate::invariants::{debug_assert_settled_once, debug_assert_span_ordered};
use crate::lock;
use crate::otlp::{Event, Span, Status};
use crate::queue::TelemetryEvent;

/// Wall-clock time as nanoseconds since the Unix epoch.
pub(crate) fn now_unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
        })
}

/// Optional identity and attribute seed for a traced call.
#[derive(Debug, Clone, Default)]
pub struct TraceOptions {
    /// Join an existing trace instead of starting a new one.
    pub trace_id: Option<String>,
    pub parent_span_id: Option<String>,
    pub attributes: Attributes,
}

impl TraceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_parent_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(span_id.into());
        self
    }

    /// Continues `parent`'s trace as its child.
    pub fn with_parent(self, parent: &TraceContext) -> Self {
        self.with_trace_id(parent.trace_id.clone())
            .with_parent_span_id(parent.span_id.clone())
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// `overrides` on top of `self`; unset ids in `overrides` keep the current ones.
    fn merged(mut self, overrides: TraceOptions) -> Self {
        if overrides.trace_id.is_some() {
            self.trace_id = overrides.trace_id;
        }
        if overrides.parent_span_id.is_some() {
            self.parent_span_id = overrides.parent_span_id;
        }
        self.attributes.extend(overrides.attributes);
        self
    }
}

/// Lifecycle of a [`TracedCall`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallState {
    Pending,
    Running,
    Settled,
    Enqueued,
}

/// The mutable span record of a running call.
struct OpenSpan {
    trace_id: String,
    span_id: String,
    parent_span_id: Option<String>,
    name: String,
    start_unix_nanos: u64,
    started: Instant,
    attributes: Attributes,
    events: Vec<Event>,
}

impl OpenSpan {
    /// Wall-clock now, derived from the monotonic clock so it never precedes the start.
    fn now(&self) -> u64 {
        let elapsed = u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.start_unix_nanos.saturating_add(elapsed)
    }

    fn finish(self, failure: Option<String>) -> Span {
        let end = self.now();
        debug_assert_span_ordered!(self.start_unix_nanos, end);

        let mut attributes = Attributes::new();
        if failure.is_some() {
            attributes.insert("error".to_string(), Value::from(1));
        }
        attributes.extend(self.attributes);

        Span {
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
            name: self.name,
            start_time_unix_nano: self.start_unix_nanos,
            end_time_unix_nano: end,
            attributes: encode_key_values(&attributes),
            events: self.events,
            status: failure.map(Status::error),
        }
    }
}

/// One traced call moving through [`CallState`].
struct TracedCall {
    state: CallState,
    scope: TraceScope,
}

impl TracedCall {
    fn open(client: Client, name: String, options: TraceOptions) -> Self {
        let trace_id = options.trace_id.unwrap_or_else(new_trace_id);
        let span_id = new_span_id();
        trace!(%name, %trace_id, %span_id, "span opened");

        let open = OpenSpan {
            trace_id: trace_id.clone(),
            span_id: span_id.clone(),
            parent_span_id: options.parent_span_id,
            name,
            start_unix_nanos: now_unix_nanos(),
            started: Instant::now(),
            attributes: options.attributes,
            events: Vec::new(),
        };
        Self {
            state: CallState::Pending,
            scope: TraceScope {
                client,
                context: TraceContext::new(trace_id, span_id),
                open: Arc::new(Mutex::new(Some(open))),
            },
        }
    }

    fn begin(&mut self) -> TraceScope {
        self.state = CallState::Running;
        self.scope.clone()
    }

    /// Finalizes the span and queues it. `failure` is the error message, if any.
    fn settle(&mut self, failure: Option<String>) {
        debug_assert_settled_once!(self.state);

        let Some(open) = lock(&self.scope.open).take() else {
            return;
        };
        let span = open.finish(failure);
        self.state = CallState::Settled;

        self.scope.client.enqueue(TelemetryEvent::Span(span));
        self.state = CallState::Enqueued;
    }
}

/// Text of a panic payload (`&str` and `String` payloads; anything else is opaque).
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

fn err_message<T, E: fmt::Display>(result: &Result<T, E>) -> Option<String> {
    result.as_ref().err().map(ToString::to_string)
}

/// A traced call waiting to be run.
///
/// Created by [`Client::span`] or [`TraceScope::span`].
#[must_use = "a span builder does nothing until one of its run methods is called"]
pub struct SpanBuilder {
    client: Client,
    name: String,
    options: TraceOptions,
}

impl SpanBuilder {
    pub(crate) fn new(client: Client, name: String) -> Self {
        Self {
            client,
            name,
            options: TraceOptions::default(),
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.options = self.options.with_trace_id(trace_id);
        self
    }

    pub fn with_parent_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.options = self.options.with_parent_span_id(span_id);
        self
    }

    pub fn with_parent(mut self, parent: &TraceContext) -> Self {
        self.options = self.options.with_parent(parent);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options = self.options.with_attribute(key, value);
        self
    }

    /// Lays `options` over what the builder already holds: ids override only
    /// when set, attributes are added.
    pub fn with_options(mut self, options: TraceOptions) -> Self {
        self.options = self.options.merged(options);
        self
    }

    fn open(self) -> TracedCall {
        TracedCall::open(self.client, self.name, self.options)
    }

    fn execute<R>(
        self,
        f: impl FnOnce(&TraceScope) -> R,
        failure: impl FnOnce(&R) -> Option<String>,
    ) -> R {
        let mut call = self.open();
        let scope = call.begin();
        match panic::catch_unwind(AssertUnwindSafe(|| f(&scope))) {
            Ok(output) => {
                call.settle(failure(&output));
                output
            }
            Err(payload) => {
                call.settle(Some(panic_message(&*payload)));
                panic::resume_unwind(payload)
            }
        }
    }

    /// Runs `f` inside the span. A panic marks the span as failed and is resumed.
    pub fn run<T>(self, f: impl FnOnce(&TraceScope) -> T) -> T {
        self.execute(f, |_| None)
    }

    /// Runs a fallible `f` inside the span. `Err` marks the span as failed and
    /// is returned unchanged.
    pub fn try_run<T, E: fmt::Display>(
        self,
        f: impl FnOnce(&TraceScope) -> Result<T, E>,
    ) -> Result<T, E> {
        self.execute(f, err_message)
    }

    fn execute_async<F, Fut>(
        self,
        f: F,
        failure: impl FnOnce(&Fut::Output) -> Option<String>,
    ) -> impl Future<Output = Fut::Output>
    where
        F: FnOnce(TraceScope) -> Fut,
        Fut: Future,
    {
        let mut call = self.open();
        let scope = call.begin();

        // `f` runs now; only the future it returns is deferred
        let future = match panic::catch_unwind(AssertUnwindSafe(|| f(scope))) {
            Ok(future) => future,
            Err(payload) => {
                call.settle(Some(panic_message(&*payload)));
                panic::resume_unwind(payload)
            }
        };

        async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(output) => {
                    call.settle(failure(&output));
                    output
                }
                Err(payload) => {
                    call.settle(Some(panic_message(&*payload)));
                    panic::resume_unwind(payload)
                }
            }
        }
    }

    /// Starts the span and calls `f` immediately; the span settles when the
    /// returned future completes.
    ///
    /// Dropping the returned future before it completes leaves the span
    /// unrecorded.
    pub fn run_async<F, Fut>(self, f: F) -> impl Future<Output = Fut::Output>
    where
        F: FnOnce(TraceScope) -> Fut,
        Fut: Future,
    {
        self.execute_async(f, |_| None)
    }

    /// Async form of [`try_run`](Self::try_run).
    pub fn try_run_async<F, Fut, T, E>(self, f: F) -> impl Future<Output = Result<T, E>>
    where
        F: FnOnce(TraceScope) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.execute_async(f, err_message)
    }
}

/// Handle to a running traced call, passed to the traced function.
///
/// Cheap to clone; clones can be moved into tasks spawned by the call.
#[derive(Clone)]
pub struct TraceScope {
    client: Client,
    context: TraceContext,
    open: Arc<Mutex<Option<OpenSpan>>>,
}

impl fmt::Debug for TraceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceScope")
            .field("context", &self.context)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl TraceScope {
    pub fn trace_id(&self) -> &str {
        &self.context.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.context.span_id
    }

    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    /// Whether the call is still running.
    pub fn is_open(&self) -> bool {
        lock(&self.open).is_some()
    }

    /// A child call: same trace, parented to this span.
    pub fn span(&self, name: impl Into<String>) -> SpanBuilder {
        SpanBuilder::new(self.client.clone(), name.into()).with_parent(&self.context)
    }

    pub fn trace<T>(&self, name: impl Into<String>, f: impl FnOnce(&TraceScope) -> T) -> T {
        self.span(name).run(f)
    }

    /// Child call with extra options; ids set in `options` take precedence
    /// over the inherited ones.
    pub fn trace_with<T>(
        &self,
        name: impl Into<String>,
        options: TraceOptions,
        f: impl FnOnce(&TraceScope) -> T,
    ) -> T {
        self.span(name).with_options(options).run(f)
    }

    pub fn try_trace<T, E: fmt::Display>(
        &self,
        name: impl Into<String>,
        f: impl FnOnce(&TraceScope) -> Result<T, E>,
    ) -> Result<T, E> {
        self.span(name).try_run(f)
    }

    /// Logs through the client, stamped with this call's ids unless `options` sets them.
    pub fn log(&self, body: impl Into<Value>, mut options: LogOptions) {
        options
            .trace_id
            .get_or_insert_with(|| self.context.trace_id.clone());
        options
            .span_id
            .get_or_insert_with(|| self.context.span_id.clone());
        self.client.log(body, options);
    }

    pub fn add_event(&self, name: impl Into<String>) {
        self.add_event_with(name, Attributes::new());
    }

    /// Appends a timestamped event to the span.
    pub fn add_event_with(&self, name: impl Into<String>, attributes: Attributes) {
        let name = name.into();
        let mut open = lock(&self.open);
        match open.as_mut() {
            Some(span) => {
                let event = Event {
                    time_unix_nano: span.now(),
                    name,
                    attributes: encode_key_values(&attributes),
                };
                span.events.push(event);
            }
            None => debug!(span_id = %self.context.span_id, %name, "span already settled, event ignored"),
        }
    }

    /// Sets a span attribute; setting an existing key replaces its value in place.
    pub fn add_attribute(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let mut open = lock(&self.open);
        match open.as_mut() {
            Some(span) => {
                span.attributes.insert(key, value.into());
            }
            None => debug!(span_id = %self.context.span_id, %key, "span already settled, attribute ignored"),
        }
    }
}
