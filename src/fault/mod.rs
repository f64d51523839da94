//! Fault handling: classification, circuit breaking, retry.
//!
//! Every upstream failure is classified into a [`FaultKind`] before any
//! retry decision is made. Classification prefers the structured status code
//! on a [`TransportError`](crate::transport::TransportError); substring
//! matching on the message is a last resort for unstructured errors.

pub mod breaker;
pub mod retry;

use serde::{Deserialize, Serialize};

use crate::transport::TransportError;

pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{FaultHandler, RetryPolicy, SharedFaultHandler};

// ── Fault kinds ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    RateLimit,
    AuthError,
    NetworkError,
    ServerError,
    Timeout,
    Unknown,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FaultKind::RateLimit => "rate_limit",
            FaultKind::AuthError => "auth_error",
            FaultKind::NetworkError => "network_error",
            FaultKind::ServerError => "server_error",
            FaultKind::Timeout => "timeout",
            FaultKind::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl FaultKind {
    /// Whether retrying can plausibly help.
    ///
    /// Auth faults are never retried: the credential will not become valid
    /// by trying again. Unknown faults are treated as transient.
    pub fn is_retryable(self) -> bool {
        !matches!(self, FaultKind::AuthError)
    }
}

// ── Classification ───────────────────────────────────────────────────────────

/// Classify a transport failure into a [`FaultKind`].
///
/// Pure over the structured error: a status code decides outright when
/// present; otherwise [`classify_message`] scans the message text.
pub fn classify(err: &TransportError) -> FaultKind {
    match err.status {
        Some(429) => FaultKind::RateLimit,
        Some(401) | Some(403) => FaultKind::AuthError,
        Some(408) => FaultKind::Timeout,
        Some(code) if (500..600).contains(&code) => FaultKind::ServerError,
        _ => classify_message(&err.message),
    }
}

/// Fallback classification over unstructured message text.
///
/// Check order matters: a message naming both a timeout and a rate limit is
/// a timeout.
pub fn classify_message(message: &str) -> FaultKind {
    let text = message.to_lowercase();

    if text.contains("timeout") || text.contains("timed out") {
        FaultKind::Timeout
    } else if text.contains("rate limit") || text.contains("429") {
        FaultKind::RateLimit
    } else if text.contains("unauthorized") || text.contains("401") || text.contains("403") {
        FaultKind::AuthError
    } else if text.contains("network") || text.contains("connection") {
        FaultKind::NetworkError
    } else if text.contains("server")
        || ["500", "502", "503", "504"].iter().any(|c| text.contains(c))
    {
        FaultKind::ServerError
    } else {
        FaultKind::Unknown
    }
}

// ── Tallies ──────────────────────────────────────────────────────────────────

/// Per-provider fault counts for diagnostics.
#[derive(Debug, Default, Clone, Serialize)]
pub struct FaultTally {
    pub rate_limit: u64,
    pub auth_error: u64,
    pub network_error: u64,
    pub server_error: u64,
    pub timeout: u64,
    pub unknown: u64,
}

impl FaultTally {
    pub fn record(&mut self, kind: FaultKind) {
        match kind {
            FaultKind::RateLimit => self.rate_limit += 1,
            FaultKind::AuthError => self.auth_error += 1,
            FaultKind::NetworkError => self.network_error += 1,
            FaultKind::ServerError => self.server_error += 1,
            FaultKind::Timeout => self.timeout += 1,
            FaultKind::Unknown => self.unknown += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.rate_limit
            + self.auth_error
            + self.network_error
            + self.server_error
            + self.timeout
            + self.unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_wins_over_message() {
        // Message says timeout, code says rate limit; the code decides.
        let e = TransportError::with_status(429, "request timed out");
        assert_eq!(classify(&e), FaultKind::RateLimit);

        let e = TransportError::with_status(503, "please retry");
        assert_eq!(classify(&e), FaultKind::ServerError);

        let e = TransportError::with_status(401, "nope");
        assert_eq!(classify(&e), FaultKind::AuthError);

        let e = TransportError::with_status(408, "slow upstream");
        assert_eq!(classify(&e), FaultKind::Timeout);
    }

    #[test]
    fn unhandled_status_falls_back_to_message() {
        let e = TransportError::with_status(400, "connection refused by peer");
        assert_eq!(classify(&e), FaultKind::NetworkError);
    }

    #[test]
    fn message_buckets() {
        let cases = [
            ("Request timed out after 30s", FaultKind::Timeout),
            ("Rate limit exceeded, slow down", FaultKind::RateLimit),
            ("got HTTP 429 from upstream", FaultKind::RateLimit),
            ("Unauthorized: bad api key", FaultKind::AuthError),
            ("network unreachable", FaultKind::NetworkError),
            ("connection reset by peer", FaultKind::NetworkError),
            ("internal server error", FaultKind::ServerError),
            ("upstream returned 502", FaultKind::ServerError),
            ("something odd happened", FaultKind::Unknown),
        ];
        for (msg, expected) in cases {
            assert_eq!(
                classify(&TransportError::message(msg)),
                expected,
                "message {msg:?} misclassified"
            );
        }
    }

    #[test]
    fn timeout_outranks_rate_limit_in_message_scan() {
        let e = TransportError::message("429 rate limit check timed out");
        assert_eq!(classify(&e), FaultKind::Timeout);
    }

    #[test]
    fn only_auth_is_non_retryable() {
        assert!(!FaultKind::AuthError.is_retryable());
        for kind in [
            FaultKind::RateLimit,
            FaultKind::NetworkError,
            FaultKind::ServerError,
            FaultKind::Timeout,
            FaultKind::Unknown,
        ] {
            assert!(kind.is_retryable(), "{kind} should be retryable");
        }
    }

    #[test]
    fn tally_accumulates_by_kind() {
        let mut t = FaultTally::default();
        t.record(FaultKind::RateLimit);
        t.record(FaultKind::RateLimit);
        t.record(FaultKind::Timeout);
        assert_eq!(t.rate_limit, 2);
        assert_eq!(t.timeout, 1);
        assert_eq!(t.total(), 3);
    }
}
