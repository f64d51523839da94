// SPDX-License-Identifier: MIT

//! Retry with exponential backoff, gated by per-provider circuit breakers.
//!
//! [`FaultHandler::execute`] is the single entry point: it checks the
//! provider's breaker once, then drives the operation through the retry
//! policy, classifying every failure and feeding the breaker as it goes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::fault::breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::fault::{classify, FaultTally};
use crate::pool::backoff::pseudo_rand;
use crate::transport::TransportError;

// ── Retry policy ─────────────────────────────────────────────────────────────

/// How many times to try an operation and how long to wait between tries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Ceiling applied before jitter.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Spread each delay by up to ten percent either way.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy with near-zero delays, for tests.
    pub fn instant() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::instant()
        }
    }

    /// Delay to wait after the failed attempt with the given zero-based index.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let raw = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let mut secs = raw.min(self.max_delay.as_secs_f64());
        if self.jitter {
            secs += pseudo_rand(attempt) * secs * 0.2;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

// ── Fault handler ────────────────────────────────────────────────────────────

/// Per-provider fault handling: retry policies, circuit breakers, tallies.
pub struct FaultHandler {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    policies: RwLock<HashMap<String, RetryPolicy>>,
    tallies: RwLock<HashMap<String, FaultTally>>,
    default_policy: RetryPolicy,
    breaker_config: CircuitBreakerConfig,
}

pub type SharedFaultHandler = Arc<FaultHandler>;

impl Default for FaultHandler {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), CircuitBreakerConfig::default())
    }
}

impl FaultHandler {
    pub fn new(default_policy: RetryPolicy, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            policies: RwLock::new(HashMap::new()),
            tallies: RwLock::new(HashMap::new()),
            default_policy,
            breaker_config,
        }
    }

    /// Override the retry policy for one provider.
    pub async fn set_retry_policy(&self, provider: &str, policy: RetryPolicy) {
        self.policies.write().await.insert(provider.to_string(), policy);
    }

    /// Install a breaker with its own thresholds, replacing any existing one.
    pub async fn configure_breaker(&self, provider: &str, config: CircuitBreakerConfig) {
        let breaker = Arc::new(CircuitBreaker::new(provider, config));
        self.breakers.write().await.insert(provider.to_string(), breaker);
    }

    /// Run `op` against a provider with breaker gating and retries.
    ///
    /// The breaker is consulted once per call, not once per attempt: a call
    /// admitted while half-open keeps its retry budget even if the breaker
    /// reopens underneath it.
    pub async fn execute<F, Fut, T>(&self, provider: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        let breaker = self.breaker_for(provider).await;
        if !breaker.is_allowed().await {
            return Err(Error::CircuitOpen {
                provider: provider.to_string(),
            });
        }

        let policy = {
            let policies = self.policies.read().await;
            policies.get(provider).unwrap_or(&self.default_policy).clone()
        };
        let attempts = policy.max_attempts.max(1);

        for attempt in 0..attempts {
            match op().await {
                Ok(value) => {
                    breaker.record_success().await;
                    if attempt > 0 {
                        debug!(provider, attempt = attempt + 1, "operation recovered after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let fault = classify(&err);
                    self.record_fault(provider, fault).await;
                    breaker.record_failure().await;

                    if !fault.is_retryable() {
                        warn!(provider, %fault, error = %err, "fault is not retryable, giving up");
                        return Err(Error::NonRetryable {
                            provider: provider.to_string(),
                            fault,
                            source: err,
                        });
                    }
                    if attempt + 1 == attempts {
                        return Err(Error::RetriesExhausted {
                            provider: provider.to_string(),
                            attempts,
                            fault,
                            source: err,
                        });
                    }

                    let delay = policy.delay_for(attempt);
                    warn!(
                        provider,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        %fault,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
        unreachable!("retry loop always returns")
    }

    /// Current breaker state for a provider, if one exists yet.
    pub async fn breaker_state(&self, provider: &str) -> Option<CircuitState> {
        let breakers = self.breakers.read().await;
        match breakers.get(provider) {
            Some(b) => Some(b.state().await),
            None => None,
        }
    }

    /// Snapshots of every breaker, for diagnostics.
    pub async fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers = self.breakers.read().await;
        let mut out = Vec::with_capacity(breakers.len());
        for breaker in breakers.values() {
            out.push(breaker.snapshot().await);
        }
        out
    }

    /// Manually close a provider's breaker. Returns false if none exists.
    pub async fn force_close(&self, provider: &str) -> bool {
        let breakers = self.breakers.read().await;
        match breakers.get(provider) {
            Some(b) => {
                b.force_close().await;
                true
            }
            None => false,
        }
    }

    /// Classified fault counts per provider.
    pub async fn fault_stats(&self) -> HashMap<String, FaultTally> {
        self.tallies.read().await.clone()
    }

    async fn record_fault(&self, provider: &str, fault: crate::fault::FaultKind) {
        let mut tallies = self.tallies.write().await;
        tallies.entry(provider.to_string()).or_default().record(fault);
    }

    async fn breaker_for(&self, provider: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().await;
            if let Some(b) = breakers.get(provider) {
                return b.clone();
            }
        }
        let mut breakers = self.breakers.write().await;
        breakers
            .entry(provider.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(provider, self.breaker_config.clone()))
            })
            .clone()
    }
}
