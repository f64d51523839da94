// SPDX-License-Identifier: MIT
//! Outbound transport boundary.
//!
//! The core never speaks HTTP, TLS, or any provider wire format. A host
//! injects a [`Transport`] implementation; the core hands it a generic
//! payload plus the leased credential secret and gets back a generic payload
//! or a structured [`TransportError`]. Fault classification runs on the
//! structured error, not on formatted strings.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// One outbound request, fully assembled by the core.
#[derive(Clone)]
pub struct TransportRequest {
    /// Correlation id, unique per attempt chain.
    pub request_id: Uuid,
    /// Provider name the adapter should route to.
    pub provider: String,
    /// Credential secret for the adapter's auth header.
    pub credential: String,
    /// Generic request payload. Wire shaping is the adapter's job.
    pub payload: Value,
    /// Per-request deadline the adapter should enforce.
    pub timeout: Duration,
}

impl fmt::Debug for TransportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never leak the credential secret into logs.
        f.debug_struct("TransportRequest")
            .field("request_id", &self.request_id)
            .field("provider", &self.provider)
            .field("credential", &"[REDACTED]")
            .field("payload", &self.payload)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Generic response payload from the adapter.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub payload: Value,
}

impl TransportResponse {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }
}

/// Structured transport failure.
///
/// Adapters should set `status` whenever the upstream gave one; the message
/// is only a fallback signal for classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", fmt_error(.status, .message))]
pub struct TransportError {
    pub status: Option<u16>,
    pub message: String,
}

fn fmt_error(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("status {code}: {message}"),
        None => message.to_string(),
    }
}

impl TransportError {
    /// Unstructured failure (no upstream status code).
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Failure with an upstream status code.
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

/// Abstract "send one request, get one response" seam.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

pub type SharedTransport = Arc<dyn Transport>;
