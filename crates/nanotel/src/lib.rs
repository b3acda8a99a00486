//! nanotel - lightweight OTLP/JSON telemetry client
//!
//! Emits structured logs and traced calls from inside an application and
//! ships them to an OpenTelemetry collector over OTLP/HTTP with JSON bodies.
//! It is a client only: no sampling, no aggregation, no persistence beyond
//! the in-memory buffer.
//!
//! # Example
//!
//! ```no_run
//! use nanotel::{json, BatchTime, Client, ClientConfig, LogOptions, Severity};
//!
//! # async fn run() -> Result<(), nanotel::ClientError> {
//! let config = ClientConfig::new("http://localhost:4318", "checkout")
//!     .with_batch_time(BatchTime::After(std::time::Duration::from_secs(2)))
//!     .with_header("x-api-key", "secret");
//! let client = Client::with_http(config)?;
//!
//! client.log(json!({"order": 42}), LogOptions::level(Severity::Info));
//! let total = client.trace("price-order", |scope| {
//!     scope.add_attribute("items", 3);
//!     scope.trace("apply-discount", |_| 90)
//! });
//! # let _ = total;
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Layout
//!
//! - [`codec`]: native values ⇄ OTLP `AnyValue`
//! - [`ids`]: trace and span identifiers
//! - [`trace`]: traced calls and their scopes
//! - [`queue`]: the shared event buffer
//! - [`scheduler`]: per-channel flush policy
//! - [`transport`]: where batches go
//! - [`client`]: the public handle tying it together

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod ids;
pub mod otlp;
pub mod queue;
pub mod scheduler;
pub mod trace;
pub mod transport;

// Debug-only invariant checks
mod invariants;

use std::sync::{Mutex, MutexGuard, PoisonError};

// Re-export main types
pub use client::{Client, LogOptions};
pub use codec::{decode, decode_json, encode, encode_key_values, encode_serializable, Attributes, Otlp};
pub use config::ClientConfig;
pub use error::{ClientError, ConfigError, DecodeError, ParseSeverityError, TransportError};
pub use ids::{new_span_id, new_trace_id, random_hex, TraceContext};
pub use otlp::{AnyValue, KeyValue, LogRecord, Severity, Span, StatusCode};
pub use queue::{Channel, EventQueue, ListenerId, QueueEvent, TelemetryEvent};
pub use scheduler::{BatchTime, RetryConfig};
pub use trace::{SpanBuilder, TraceOptions, TraceScope};
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use transport::{
    ExportRequest, NullTransport, StdoutTransport, Transport, TransportBoxed,
};

pub use serde_json::{json, Value};

/// Locks `mutex`, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
