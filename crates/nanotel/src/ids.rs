//! Trace and span identifiers.
//!
//! Identifiers are lowercase hex renderings of bytes drawn from the operating
//! system CSPRNG. There is no fallback source: if the OS generator fails,
//! `OsRng` panics rather than handing out predictable ids.

use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;

/// Byte length of a trace id (32 hex characters).
pub const TRACE_ID_BYTES: usize = 16;
/// Byte length of a span id (16 hex characters).
pub const SPAN_ID_BYTES: usize = 8;

/// Returns `byte_len` random bytes as lowercase, two-digit-per-byte hex.
pub fn random_hex(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn new_trace_id() -> String {
    random_hex(TRACE_ID_BYTES)
}

pub fn new_span_id() -> String {
    random_hex(SPAN_ID_BYTES)
}

/// Identity of an open or settled traced call, passed by value into nested
/// calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
}

impl TraceContext {
    pub fn new(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
        }
    }

    /// W3C `traceparent` header value for propagating this context downstream.
    pub fn traceparent(&self, sampled: bool) -> String {
        let flags = if sampled { "01" } else { "00" };
        format!("00-{}-{}-{}", self.trace_id, self.span_id, flags)
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.trace_id, self.span_id)
    }
}
