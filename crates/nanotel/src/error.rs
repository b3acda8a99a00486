//! Error types for nanotel operations.

use thiserror::Error;

/// An OTLP-shaped value did not match any known tag.
///
/// Fatal to the decode call that produced it; never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The JSON node is an object, but carries none of the `AnyValue` tags.
    #[error("invalid OTLP value: {0}")]
    InvalidShape(String),

    /// The JSON node is a scalar (or null) where an OTLP value was expected.
    #[error("unsupported OTLP node: expected an object or array, got {0}")]
    Unsupported(&'static str),
}

/// Errors reported by a [`Transport`](crate::Transport).
///
/// These never reach application code: the client logs them and re-queues
/// the batch.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The request could not be issued or did not complete.
    #[error("request failed: {0}")]
    Request(String),

    /// The collector answered with a non-success status.
    #[error("collector responded with status {status}")]
    Status { status: u16 },

    /// The batch could not be rendered as a request body.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Invalid client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The collector base URL does not parse as an absolute http(s) URL.
    #[error("invalid collector url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// `service_name` is empty.
    #[error("service name must not be empty")]
    EmptyServiceName,
}

/// Errors raised while constructing a [`Client`](crate::Client).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The client schedules its flushes on tokio and must be created inside
    /// a runtime.
    #[error("nanotel client must be created inside a tokio runtime")]
    NoRuntime,

    /// The HTTP transport could not be built.
    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

/// Unknown symbolic severity name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown severity level: {0:?}")]
pub struct ParseSeverityError(pub String);

impl TransportError {
    /// Returns `true` if the collector rejected the request outright (4xx).
    ///
    /// The client still retries these; the distinction is only surfaced in logs.
    #[inline]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Status { status } if (400..500).contains(status))
    }
}
