//! Configuration surface for the orchestration core.
//!
//! The core never reads files itself. Callers hand in a TOML string (or build
//! `CoreConfig` directly) and keep ownership of where it came from.
//! Priority: env var > TOML > built-in default.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fault::{CircuitBreakerConfig, RetryPolicy};
use crate::pool::PoolConfig;
use crate::scheduler::SchedulerConfig;

const DEFAULT_JOB_DELAY_SECS: f64 = 10.0;
const DEFAULT_BREAKER_THRESHOLD: u32 = 5;
const DEFAULT_BREAKER_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY_SECS: f64 = 1.0;
const DEFAULT_RETRY_MAX_DELAY_SECS: f64 = 60.0;
const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;
const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 300;
const DEFAULT_PROVIDER_PRIORITY: u32 = 5;

// ── ResiliencyConfig ─────────────────────────────────────────────────────────

/// Retry and circuit-breaker settings (`[resiliency]` in the TOML surface).
///
/// Durations are plain numbers here so the section stays TOML-friendly;
/// `breaker_config()` and `retry_policy()` produce the runtime types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResiliencyConfig {
    /// Consecutive failures before a provider's breaker opens (default: 5).
    pub circuit_breaker_threshold: u32,
    /// Seconds an open breaker waits before allowing a probe (default: 60).
    pub circuit_breaker_timeout_secs: u64,
    /// Attempts per `execute` call, including the first (default: 3).
    pub max_attempts: u32,
    /// Delay before the first retry, in seconds (default: 1.0).
    pub retry_delay_secs: f64,
    /// Ceiling on any single retry delay, in seconds (default: 60.0).
    pub retry_max_delay_secs: f64,
    /// Growth factor between retry delays (default: 2.0).
    pub retry_multiplier: f64,
    /// Spread each delay by up to ±10% (default: true).
    pub retry_jitter: bool,
}

impl Default for ResiliencyConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
            circuit_breaker_timeout_secs: DEFAULT_BREAKER_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            retry_max_delay_secs: DEFAULT_RETRY_MAX_DELAY_SECS,
            retry_multiplier: DEFAULT_RETRY_MULTIPLIER,
            retry_jitter: true,
        }
    }
}

impl ResiliencyConfig {
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_threshold,
            success_threshold: 2,
            timeout: Duration::from_secs(self.circuit_breaker_timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_secs_f64(self.retry_delay_secs.max(0.0)),
            max_delay: Duration::from_secs_f64(self.retry_max_delay_secs.max(0.0)),
            multiplier: self.retry_multiplier,
            jitter: self.retry_jitter,
        }
    }
}

// ── HealthConfig ─────────────────────────────────────────────────────────────

/// Background health probing (`[health]` in the TOML surface).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Seconds between background probe sweeps (default: 300).
    pub check_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: DEFAULT_HEALTH_INTERVAL_SECS,
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

// ── ProviderProfile ──────────────────────────────────────────────────────────

/// Per-provider settings, parsed from sections like `[providers.openrouter]`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderProfile {
    /// Disabled providers stay registered but are never selected (default: true).
    pub enabled: bool,
    /// Selection priority; lower is preferred (default: 5).
    pub priority: u32,
    /// API secrets for this provider's credential pool.
    pub credentials: Vec<String>,
    /// Ordered fallback chain tried when this provider fails.
    pub fallback: Vec<String>,
    /// Override the pool-wide per-minute quota for this provider's credentials.
    pub max_requests_per_minute: Option<u64>,
    /// Override the transport timeout for this provider, in seconds.
    pub request_timeout_secs: Option<u64>,
}

impl Default for ProviderProfile {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: DEFAULT_PROVIDER_PRIORITY,
            credentials: Vec::new(),
            fallback: Vec::new(),
            max_requests_per_minute: None,
            request_timeout_secs: None,
        }
    }
}

impl fmt::Debug for ProviderProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Credentials are secret material; log the count only.
        f.debug_struct("ProviderProfile")
            .field("enabled", &self.enabled)
            .field("priority", &self.priority)
            .field("credentials", &format!("[{} redacted]", self.credentials.len()))
            .field("fallback", &self.fallback)
            .field("max_requests_per_minute", &self.max_requests_per_minute)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

// ── CoreConfig ───────────────────────────────────────────────────────────────

/// Top-level configuration for the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Credential pool defaults (`[pool]`).
    pub pool: PoolConfig,
    /// Job scheduler settings (`[scheduler]`).
    pub scheduler: SchedulerConfig,
    /// Retry and circuit-breaker settings (`[resiliency]`).
    pub resiliency: ResiliencyConfig,
    /// Background health probing (`[health]`).
    pub health: HealthConfig,
    /// Default spacing between queued jobs, in seconds (default: 10.0).
    pub job_delay_secs: f64,
    /// Per-provider profiles (`[providers.<name>]`).
    pub providers: HashMap<String, ProviderProfile>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            scheduler: SchedulerConfig::default(),
            resiliency: ResiliencyConfig::default(),
            health: HealthConfig::default(),
            job_delay_secs: DEFAULT_JOB_DELAY_SECS,
            providers: HashMap::new(),
        }
    }
}

impl CoreConfig {
    /// Parse a TOML document, then apply env-var overrides.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: CoreConfig =
            toml::from_str(raw).map_err(|e| Error::Config(format!("invalid config: {e}")))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply the env-var knobs: `LINGO_MAX_CONCURRENT`, `LINGO_RPM`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("LINGO_MAX_CONCURRENT").and_then(|s| s.parse().ok()) {
            self.scheduler.max_concurrent = v;
        }
        if let Some(v) = get("LINGO_RPM").and_then(|s| s.parse().ok()) {
            self.pool.max_requests_per_minute = v;
        }
    }

    pub fn job_delay(&self) -> Duration {
        Duration::from_secs_f64(self.job_delay_secs.max(0.0))
    }

    pub fn provider_profile(&self, name: &str) -> Option<&ProviderProfile> {
        self.providers.get(name)
    }

    /// Providers ordered by (priority, name) so registration is deterministic.
    pub fn providers_by_priority(&self) -> Vec<(&str, &ProviderProfile)> {
        let mut out: Vec<(&str, &ProviderProfile)> = self
            .providers
            .iter()
            .map(|(name, profile)| (name.as_str(), profile))
            .collect();
        out.sort_by(|a, b| a.1.priority.cmp(&b.1.priority).then(a.0.cmp(b.0)));
        out
    }

    /// Pool settings for one provider: the `[pool]` defaults with the
    /// profile's quota override applied.
    pub fn pool_config_for(&self, name: &str) -> PoolConfig {
        let mut pool = self.pool.clone();
        if let Some(rpm) = self.providers.get(name).and_then(|p| p.max_requests_per_minute) {
            pool.max_requests_per_minute = rpm;
        }
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BackoffKind;

    #[test]
    fn defaults_match_documented_values() {
        let config = CoreConfig::default();
        assert_eq!(config.pool.max_requests_per_minute, 20);
        assert_eq!(config.pool.max_retries, 3);
        assert_eq!(config.scheduler.max_concurrent, 5);
        assert_eq!(config.scheduler.tick_interval_ms, 100);
        assert_eq!(config.resiliency.circuit_breaker_threshold, 5);
        assert_eq!(config.resiliency.circuit_breaker_timeout_secs, 60);
        assert_eq!(config.resiliency.max_attempts, 3);
        assert_eq!(config.health.check_interval_secs, 300);
        assert_eq!(config.job_delay(), Duration::from_secs(10));
        assert!(config.providers.is_empty());
    }

    #[test]
    fn parses_every_section() {
        let raw = r#"
            job_delay_secs = 2.5

            [pool]
            max_requests_per_minute = 8
            max_retries = 2

            [pool.backoff]
            kind = "linear"
            base_secs = 3.0

            [scheduler]
            max_concurrent = 3
            tick_interval_ms = 50

            [resiliency]
            circuit_breaker_threshold = 2
            max_attempts = 4
            retry_delay_secs = 0.5
            retry_jitter = false

            [health]
            check_interval_secs = 30

            [providers.openrouter]
            priority = 1
            credentials = ["sk-a", "sk-b"]
            fallback = ["groq"]
            max_requests_per_minute = 4

            [providers.groq]
            priority = 2
            enabled = false
        "#;
        let config = CoreConfig::from_toml_str(raw).unwrap();

        assert_eq!(config.job_delay(), Duration::from_secs_f64(2.5));
        assert_eq!(config.pool.max_requests_per_minute, 8);
        assert_eq!(config.pool.backoff.kind, BackoffKind::Linear);
        assert_eq!(config.pool.backoff.base_secs, 3.0);
        assert_eq!(config.scheduler.max_concurrent, 3);
        assert_eq!(config.resiliency.circuit_breaker_threshold, 2);
        assert!(!config.resiliency.retry_jitter);

        let openrouter = config.provider_profile("openrouter").unwrap();
        assert!(openrouter.enabled);
        assert_eq!(openrouter.priority, 1);
        assert_eq!(openrouter.credentials.len(), 2);
        assert_eq!(openrouter.fallback, vec!["groq"]);
        assert!(!config.provider_profile("groq").unwrap().enabled);
        assert!(config.provider_profile("missing").is_none());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = CoreConfig::from_toml_str("[pool]\nmax_requests_per_minute = 5\n").unwrap();
        assert_eq!(config.pool.max_requests_per_minute, 5);
        assert_eq!(config.pool.max_retries, 3);
        assert_eq!(config.scheduler.max_concurrent, 5);
        assert_eq!(config.resiliency.max_attempts, 3);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = CoreConfig::from_toml_str("[pool\nmax = ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("invalid config"));
    }

    #[test]
    fn runtime_types_carry_the_configured_values() {
        let resiliency = ResiliencyConfig {
            circuit_breaker_threshold: 7,
            circuit_breaker_timeout_secs: 15,
            max_attempts: 2,
            retry_delay_secs: 0.25,
            retry_max_delay_secs: 4.0,
            retry_multiplier: 3.0,
            retry_jitter: false,
        };
        let breaker = resiliency.breaker_config();
        assert_eq!(breaker.failure_threshold, 7);
        assert_eq!(breaker.timeout, Duration::from_secs(15));

        let policy = resiliency.retry_policy();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.initial_delay, Duration::from_secs_f64(0.25));
        assert_eq!(policy.max_delay, Duration::from_secs(4));
        assert_eq!(policy.multiplier, 3.0);
        assert!(!policy.jitter);
    }

    #[test]
    fn providers_sort_by_priority_then_name() {
        let raw = r#"
            [providers.groq]
            priority = 2
            [providers.openrouter]
            priority = 1
            [providers.anthropic]
            priority = 2
        "#;
        let config = CoreConfig::from_toml_str(raw).unwrap();
        let names: Vec<&str> = config
            .providers_by_priority()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["openrouter", "anthropic", "groq"]);
    }

    #[test]
    fn per_provider_quota_override_applies() {
        let raw = r#"
            [pool]
            max_requests_per_minute = 20
            [providers.slow]
            max_requests_per_minute = 2
            [providers.plain]
        "#;
        let config = CoreConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.pool_config_for("slow").max_requests_per_minute, 2);
        assert_eq!(config.pool_config_for("plain").max_requests_per_minute, 20);
        assert_eq!(config.pool_config_for("unknown").max_requests_per_minute, 20);
    }

    #[test]
    fn env_overrides_beat_the_document() {
        let mut config = CoreConfig::from_toml_str("[scheduler]\nmax_concurrent = 2\n").unwrap();
        config.apply_overrides(|key| match key {
            "LINGO_MAX_CONCURRENT" => Some("9".to_string()),
            "LINGO_RPM" => Some("3".to_string()),
            _ => None,
        });

        assert_eq!(config.scheduler.max_concurrent, 9);
        assert_eq!(config.pool.max_requests_per_minute, 3);
    }

    #[test]
    fn unparseable_override_values_are_ignored() {
        let mut config = CoreConfig::default();
        config.apply_overrides(|key| {
            (key == "LINGO_MAX_CONCURRENT").then(|| "lots".to_string())
        });
        assert_eq!(config.scheduler.max_concurrent, 5);
    }

    #[test]
    fn debug_output_redacts_credentials() {
        let profile = ProviderProfile {
            credentials: vec!["sk-secret-value".to_string()],
            ..ProviderProfile::default()
        };
        let rendered = format!("{profile:?}");
        assert!(!rendered.contains("sk-secret-value"));
        assert!(rendered.contains("redacted"));
    }
}
