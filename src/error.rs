// SPDX-License-Identifier: MIT
//! Error taxonomy for the orchestration core.
//!
//! Every public operation returns `Result<T, Error>`. Transport failures keep
//! their structured form (`TransportError`) so callers and the fault
//! classifier can inspect status codes instead of parsing strings.

use crate::fault::FaultKind;
use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Every credential is rate-limited, backing off, or retired.
    #[error("no credential available in the pool")]
    NoCredentialAvailable,

    /// The provider's circuit breaker rejected the call without dispatching it.
    #[error("circuit breaker open for provider {provider}")]
    CircuitOpen { provider: String },

    /// A retryable fault survived every allowed attempt.
    #[error("retries exhausted for provider {provider} after {attempts} attempts ({fault}): {source}")]
    RetriesExhausted {
        provider: String,
        attempts: u32,
        fault: FaultKind,
        source: TransportError,
    },

    /// A fault that must not be retried (credentials, permissions).
    #[error("non-retryable {fault} fault from provider {provider}: {source}")]
    NonRetryable {
        provider: String,
        fault: FaultKind,
        source: TransportError,
    },

    /// The primary provider and its whole fallback chain failed.
    #[error("all providers failed: {}", fmt_attempts(.attempts))]
    AllProvidersFailed { attempts: Vec<(String, String)> },

    #[error("language pair {source_lang}->{target_lang} not supported by provider {provider}")]
    UnsupportedLanguage {
        provider: String,
        source_lang: String,
        target_lang: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("job {id} already exists")]
    DuplicateJob { id: String },

    #[error("job not found: {id}")]
    JobNotFound { id: String },

    #[error("scheduler is not running")]
    SchedulerNotRunning,

    #[error("job {id} panicked: {detail}")]
    JobPanicked { id: String, detail: String },

    #[error("provider {name} already registered")]
    DuplicateProvider { name: String },

    #[error("provider not found: {name}")]
    UnknownProvider { name: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("config error: {0}")]
    Config(String),
}

/// Render the per-provider failure list as `name (reason); name (reason)`.
/// Each attempted provider appears exactly once.
fn fmt_attempts(attempts: &[(String, String)]) -> String {
    if attempts.is_empty() {
        return "no providers available".to_string();
    }
    attempts
        .iter()
        .map(|(provider, reason)| format!("{provider} ({reason})"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Classified fault kind, when this error carries one.
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            Error::RetriesExhausted { fault, .. } | Error::NonRetryable { fault, .. } => {
                Some(*fault)
            }
            Error::Transport(e) => Some(crate::fault::classify(e)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_providers_failed_lists_each_provider_once() {
        let err = Error::AllProvidersFailed {
            attempts: vec![
                ("openrouter".into(), "circuit breaker open".into()),
                ("google".into(), "timeout".into()),
            ],
        };
        let msg = err.to_string();
        assert_eq!(msg.matches("openrouter").count(), 1);
        assert_eq!(msg.matches("google").count(), 1);
        assert!(msg.contains("timeout"));
    }

    #[test]
    fn circuit_open_names_the_provider() {
        let err = Error::CircuitOpen {
            provider: "deepl".into(),
        };
        assert_eq!(err.to_string(), "circuit breaker open for provider deepl");
    }
}
