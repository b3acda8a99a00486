//! Configuration for the telemetry client.

use std::time::Duration;

use crate::error::ConfigError;
use crate::scheduler::{BatchTime, RetryConfig};

/// Configuration for a [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Collector base URL, e.g. `http://localhost:4318`.
    ///
    /// Batches are posted to `<url>/v1/logs` and `<url>/v1/traces`; a
    /// trailing `/` is ignored.
    pub url: String,

    /// Reported as the `service.name` resource attribute of every batch.
    pub service_name: String,

    /// Batching window per channel.
    ///
    /// Default: 5s
    pub batch_time: BatchTime,

    /// Extra request headers (ingestion credentials and the like), sent
    /// after `Content-Type` in this order.
    pub headers: Vec<(String, String)>,

    /// Retry policy after a failed send.
    ///
    /// Default: retry forever
    pub retry: RetryConfig,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            service_name: service_name.into(),
            batch_time: BatchTime::default(),
            headers: Vec::new(),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the batching window.
    pub fn with_batch_time(mut self, batch_time: BatchTime) -> Self {
        self.batch_time = batch_time;
        self
    }

    /// Sets the batching window from milliseconds (`0` immediate, `f64::INFINITY` never).
    pub fn with_batch_millis(self, millis: f64) -> Self {
        self.with_batch_time(BatchTime::from_millis(millis))
    }

    /// Adds a request header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Gives up on a batch after `max_retries` failed retries, backing off
    /// from `initial_delay`.
    pub fn with_bounded_retry(mut self, max_retries: u32, initial_delay: Duration) -> Self {
        self.retry.max_retries = Some(max_retries);
        self.retry.initial_delay = initial_delay;
        self
    }

    /// Base URL without trailing slashes.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::EmptyServiceName);
        }
        check_url(self.base_url()).map_err(|reason| ConfigError::InvalidUrl {
            url: self.url.clone(),
            reason,
        })
    }
}

#[cfg(feature = "http")]
fn check_url(url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| e.to_string())?;
    match parsed.scheme() {
        "http" | "https" if parsed.has_host() => Ok(()),
        "http" | "https" => Err("missing host".to_string()),
        other => Err(format!("unsupported scheme {other:?}")),
    }
}

#[cfg(not(feature = "http"))]
fn check_url(url: &str) -> Result<(), String> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| "expected an http or https url".to_string())?;
    if rest.is_empty() || rest.starts_with('/') {
        Err("missing host".to_string())
    } else {
        Ok(())
    }
}
