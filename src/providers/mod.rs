//! Translation providers and the orchestrator that selects between them.
//!
//! A provider is anything that can turn a batch of texts into a batch of
//! translations and answer a cheap health probe. The orchestrator keeps a
//! registry of providers with live health and lifetime stats, scores them
//! per request, and walks fallback chains when one fails.

pub mod orchestrator;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use orchestrator::{
    ProviderOrchestrator, ProviderStatistics, ProviderStatus, SharedOrchestrator,
};
pub use remote::RemoteProvider;

// ── Provider trait ───────────────────────────────────────────────────────────

/// One named translation backend.
///
/// Implementations own whatever state they need (credentials, transport,
/// fault handling). The orchestrator only sees this surface.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Stable name used for registration, fallback chains, and logging.
    fn name(&self) -> &str;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Translate a batch, preserving input order.
    async fn translate(
        &self,
        texts: &[String],
        target_lang: &str,
        source_lang: &str,
    ) -> Result<Vec<String>>;

    /// Cheap liveness probe. `Ok` carries a human-readable detail message.
    async fn health_check(&self) -> Result<String>;
}

pub type SharedProvider = Arc<dyn TranslationProvider>;

// ── Capabilities ─────────────────────────────────────────────────────────────

/// Static limits a provider advertises.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Largest batch one `translate` call accepts.
    pub max_batch_size: usize,
    /// Longest single text, in characters.
    pub max_text_length: usize,
    /// Language codes the provider handles. Empty means unrestricted.
    pub supported_languages: Vec<String>,
    /// Whether `source_lang = "auto"` is accepted.
    pub auto_detect_source: bool,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_text_length: 5000,
            supported_languages: Vec::new(),
            auto_detect_source: true,
        }
    }
}

impl ProviderCapabilities {
    pub fn supports_language(&self, lang: &str) -> bool {
        self.supported_languages.is_empty()
            || self
                .supported_languages
                .iter()
                .any(|l| l.eq_ignore_ascii_case(lang))
    }
}

/// Check a batch against a provider's advertised limits.
pub fn validate_batch(
    provider: &str,
    texts: &[String],
    target_lang: &str,
    source_lang: &str,
    caps: &ProviderCapabilities,
) -> Result<()> {
    if texts.is_empty() {
        return Err(Error::InvalidInput("empty batch".to_string()));
    }
    if texts.len() > caps.max_batch_size {
        return Err(Error::InvalidInput(format!(
            "batch of {} texts exceeds provider {provider} limit of {}",
            texts.len(),
            caps.max_batch_size
        )));
    }
    for (i, text) in texts.iter().enumerate() {
        let chars = text.chars().count();
        if chars > caps.max_text_length {
            return Err(Error::InvalidInput(format!(
                "text at index {i} is {chars} characters, provider {provider} limit is {}",
                caps.max_text_length
            )));
        }
    }

    let source_ok = if source_lang.eq_ignore_ascii_case("auto") {
        caps.auto_detect_source
    } else {
        caps.supports_language(source_lang)
    };
    if !source_ok || !caps.supports_language(target_lang) {
        return Err(Error::UnsupportedLanguage {
            provider: provider.to_string(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
        });
    }
    Ok(())
}

// ── Requests ─────────────────────────────────────────────────────────────────

/// One batch of texts to translate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub texts: Vec<String>,
    pub target_lang: String,
    /// `"auto"` asks the provider to detect the source.
    pub source_lang: String,
    /// Pin the request to one provider instead of scored selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl TranslationRequest {
    pub fn new(
        texts: Vec<String>,
        target_lang: impl Into<String>,
        source_lang: impl Into<String>,
    ) -> Self {
        Self {
            texts,
            target_lang: target_lang.into(),
            source_lang: source_lang.into(),
            provider: None,
        }
    }

    /// Pin to a named provider. Selection falls back to scoring when the
    /// pinned provider is unavailable at dispatch time.
    pub fn pinned(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

/// A served batch: translations aligned to the request, plus where and how
/// fast it was served.
#[derive(Debug, Clone, Serialize)]
pub struct TranslationOutcome {
    /// Same length and order as the request texts.
    pub translations: Vec<String>,
    /// Provider that produced the result, after any fallback hops.
    pub provider: String,
    pub duration_ms: u64,
}

// ── Health and stats ─────────────────────────────────────────────────────────

/// Last known probe result for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub healthy: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    pub checked_at: DateTime<Utc>,
    pub consecutive_failures: u32,
}

impl ProviderHealth {
    /// State before the first probe. Providers start out assumed usable so
    /// a freshly wired orchestrator can serve before the monitor's first pass.
    pub fn unprobed() -> Self {
        Self {
            healthy: true,
            message: "not probed yet".to_string(),
            latency_ms: None,
            checked_at: Utc::now(),
            consecutive_failures: 0,
        }
    }

    pub fn passing(message: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            healthy: true,
            message: message.into(),
            latency_ms: Some(latency_ms),
            checked_at: Utc::now(),
            consecutive_failures: 0,
        }
    }

    pub fn failing(
        message: impl Into<String>,
        latency_ms: Option<u64>,
        consecutive_failures: u32,
    ) -> Self {
        Self {
            healthy: false,
            message: message.into(),
            latency_ms,
            checked_at: Utc::now(),
            consecutive_failures,
        }
    }
}

/// Lifetime request counters for one provider.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ProviderStats {
    pub request_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_latency_ms: u64,
    pub last_request_at: Option<DateTime<Utc>>,
}

impl ProviderStats {
    pub fn record_success(&mut self, latency_ms: u64) {
        self.request_count += 1;
        self.success_count += 1;
        self.total_latency_ms += latency_ms;
        self.last_request_at = Some(Utc::now());
    }

    pub fn record_failure(&mut self) {
        self.request_count += 1;
        self.failure_count += 1;
        self.last_request_at = Some(Utc::now());
    }

    /// Fraction of requests that succeeded, 0.0 with no history.
    pub fn success_rate(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.request_count as f64
        }
    }

    /// Mean latency of successful requests.
    pub fn avg_latency_ms(&self) -> Option<f64> {
        if self.success_count == 0 {
            None
        } else {
            Some(self.total_latency_ms as f64 / self.success_count as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> ProviderCapabilities {
        ProviderCapabilities {
            max_batch_size: 3,
            max_text_length: 10,
            supported_languages: vec!["en".into(), "ja".into()],
            auto_detect_source: true,
        }
    }

    #[test]
    fn empty_language_list_accepts_anything() {
        let caps = ProviderCapabilities::default();
        assert!(caps.supports_language("zxx"));
        assert!(caps.supports_language("EN"));
    }

    #[test]
    fn language_match_ignores_case() {
        assert!(caps().supports_language("JA"));
        assert!(!caps().supports_language("fr"));
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let texts: Vec<String> = (0..4).map(|i| format!("t{i}")).collect();
        let err = validate_batch("p", &texts, "ja", "en", &caps()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn overlong_text_is_rejected() {
        let texts = vec!["0123456789ab".to_string()];
        let err = validate_batch("p", &texts, "ja", "en", &caps()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn unsupported_target_language_is_rejected() {
        let texts = vec!["hi".to_string()];
        let err = validate_batch("p", &texts, "fr", "en", &caps()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedLanguage { .. }));
    }

    #[test]
    fn auto_source_honours_the_capability_flag() {
        let texts = vec!["hi".to_string()];
        assert!(validate_batch("p", &texts, "ja", "auto", &caps()).is_ok());

        let no_auto = ProviderCapabilities {
            auto_detect_source: false,
            ..caps()
        };
        let err = validate_batch("p", &texts, "ja", "auto", &no_auto).unwrap_err();
        assert!(matches!(err, Error::UnsupportedLanguage { .. }));
    }

    #[test]
    fn stats_track_rate_and_latency() {
        let mut stats = ProviderStats::default();
        assert_eq!(stats.success_rate(), 0.0);
        assert_eq!(stats.avg_latency_ms(), None);

        stats.record_success(100);
        stats.record_success(300);
        stats.record_failure();
        assert_eq!(stats.request_count, 3);
        assert!((stats.success_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.avg_latency_ms(), Some(200.0));
    }
}
