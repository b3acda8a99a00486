use std::future::Future;
use std::pin::Pin;

use crate::error::TransportError;

/// One OTLP/JSON POST: target URL, headers in order, JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ExportRequest {
    /// Last value of `name` (case-insensitive), matching how later headers
    /// override earlier ones.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Trait for delivering batches to a collector.
///
/// Uses native async fn in traits instead of `#[async_trait]`.
///
/// # Note on Object Safety
///
/// This trait uses `impl Future` return types which are not object-safe.
/// For dynamic dispatch, use `Arc<dyn TransportBoxed>`; every `Transport`
/// gets it through the blanket impl.
pub trait Transport: Send + Sync {
    /// Sends one request. `Ok` only if the collector accepted it.
    fn send(&self, request: ExportRequest) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the transport name for debugging.
    fn name(&self) -> &str;
}

/// Object-safe version of [`Transport`] for dynamic dispatch.
pub trait TransportBoxed: Send + Sync {
    /// Sends one request (boxed future for object safety).
    fn send_boxed(
        &self,
        request: ExportRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>>;

    /// Returns the transport name for debugging.
    fn name(&self) -> &str;
}

/// Blanket implementation: any Transport can be used as TransportBoxed
impl<T: Transport> TransportBoxed for T {
    fn send_boxed(
        &self,
        request: ExportRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        Box::pin(self.send(request))
    }

    fn name(&self) -> &str {
        Transport::name(self)
    }
}

/// OTLP/HTTP transport backed by `reqwest`.
///
/// Succeeds only on a 2xx response. No request timeout is applied; a send
/// runs to completion or failure.
#[cfg(feature = "http")]
pub struct HttpTransport {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wraps an existing `reqwest` client (shared connection pool, proxies, TLS).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn header_map(
        headers: &[(String, String)],
    ) -> Result<reqwest::header::HeaderMap, TransportError> {
        use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

        let mut map = HeaderMap::with_capacity(headers.len());
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| TransportError::Request(format!("header {key:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Request(format!("header {key:?}: {e}")))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

#[cfg(feature = "http")]
impl Transport for HttpTransport {
    async fn send(&self, request: ExportRequest) -> Result<(), TransportError> {
        let headers = Self::header_map(&request.headers)?;
        let response = self
            .client
            .post(&request.url)
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Status {
                status: status.as_u16(),
            })
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Stdout transport for local debugging
pub struct StdoutTransport {
    pretty: bool,
}

impl StdoutTransport {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }
}

impl Transport for StdoutTransport {
    async fn send(&self, request: ExportRequest) -> Result<(), TransportError> {
        println!("=== POST {} ===", request.url);
        if self.pretty {
            let value: serde_json::Value = serde_json::from_str(&request.body)
                .map_err(|e| TransportError::Serialization(e.to_string()))?;
            let pretty = serde_json::to_string_pretty(&value)
                .map_err(|e| TransportError::Serialization(e.to_string()))?;
            println!("{pretty}");
        } else {
            println!("{}", request.body);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Null transport that accepts and discards every batch (for benchmarking)
pub struct NullTransport;

impl NullTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for NullTransport {
    async fn send(&self, _request: ExportRequest) -> Result<(), TransportError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Test transport that records every request and can be told to fail
#[cfg(test)]
pub(crate) struct RecordingTransport {
    requests: std::sync::Mutex<Vec<ExportRequest>>,
    fail_next: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl RecordingTransport {
    pub(crate) fn new() -> Self {
        Self {
            requests: std::sync::Mutex::new(Vec::new()),
            fail_next: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` sends (they are still recorded).
    pub(crate) fn fail_next(&self, n: usize) {
        self.fail_next.store(n, std::sync::atomic::Ordering::SeqCst);
    }

    pub(crate) fn requests(&self) -> Vec<ExportRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Transport for RecordingTransport {
    async fn send(&self, request: ExportRequest) -> Result<(), TransportError> {
        use std::sync::atomic::Ordering;

        self.requests.lock().unwrap().push(request);
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            Err(TransportError::Status { status: 503 })
        } else {
            Ok(())
        }
    }

    fn name(&self) -> &str {
        "recording"
    }
}
