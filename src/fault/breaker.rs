// SPDX-License-Identifier: MIT
//! Per-provider circuit breaker.
//!
//! When a translation provider fails repeatedly, its circuit opens and calls
//! fail fast instead of burning retry budget and credential quota against a
//! dead upstream.
//!
//! # State machine
//!
//! ```text
//! Closed ──(failure_threshold failures)──► Open
//!   ▲                                        │
//!   └──(success_threshold successes)──── HalfOpen ◄─(timeout elapsed)──┘
//! ```
//!
//! - **Closed**: calls pass. Failures count up; each success pays one failure
//!   back down (a flaky-but-working provider drifts back toward zero instead
//!   of ratcheting toward the threshold).
//! - **Open**: calls are rejected immediately. After `timeout` elapses the
//!   breaker moves to HalfOpen for a probe.
//! - **HalfOpen**: probe calls pass. `success_threshold` consecutive
//!   successes close the circuit; any failure reopens it and restarts the
//!   timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Observable state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation — calls are allowed.
    Closed,
    /// Failing — calls are rejected without attempting the operation.
    Open,
    /// Testing recovery — probe calls are allowed through.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for a [`CircuitBreaker`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures before the circuit opens.
    ///
    /// Default: 5
    pub failure_threshold: u32,
    /// Consecutive successes (from HalfOpen) before the circuit closes.
    ///
    /// Default: 2
    pub success_threshold: u32,
    /// How long the circuit stays Open before allowing a probe.
    ///
    /// Default: 60 seconds
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Internal mutable state guarded by an `RwLock`.
#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_success: None,
        }
    }
}

/// Point-in-time breaker view for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub provider: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub secs_since_last_failure: Option<f64>,
    pub secs_since_last_success: Option<f64>,
}

/// Thread-safe circuit breaker.
///
/// Cheaply cloneable — all clones share the same internal state via `Arc`.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<RwLock<BreakerInner>>,
    config: Arc<CircuitBreakerConfig>,
    name: Arc<str>,
}

impl CircuitBreaker {
    /// Create a breaker for the named provider, starting `Closed`.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(BreakerInner::new())),
            config: Arc::new(config),
            name: Arc::from(name.into().as_str()),
        }
    }

    /// Returns `true` if a call should be attempted.
    ///
    /// - `Closed` → always `true`
    /// - `Open`   → `false`, unless the timeout has elapsed, in which case the
    ///   breaker transitions to `HalfOpen` and returns `true` for the probe.
    /// - `HalfOpen` → `true` (allows the probe call through)
    pub async fn is_allowed(&self) -> bool {
        // Fast path: read lock covers the common closed case.
        {
            let inner = self.inner.read().await;
            match inner.state {
                CircuitState::Closed | CircuitState::HalfOpen => return true,
                CircuitState::Open => {
                    if let Some(last_failure) = inner.last_failure {
                        if last_failure.elapsed() < self.config.timeout {
                            return false;
                        }
                        // Timeout elapsed — fall through to upgrade to HalfOpen.
                    }
                    // Open with no recorded failure time: allow the probe.
                }
            }
        }

        // Upgrade to a write lock for the Open → HalfOpen transition.
        let mut inner = self.inner.write().await;
        // Re-check after acquiring the write lock (another task may have moved first).
        if inner.state == CircuitState::Open {
            if let Some(last_failure) = inner.last_failure {
                if last_failure.elapsed() >= self.config.timeout {
                    info!(breaker = %self.name, "circuit breaker -> half_open (probe)");
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    return true;
                }
            }
        }

        inner.state != CircuitState::Open
    }

    /// Record a successful call.
    ///
    /// `HalfOpen`: counts toward `success_threshold`; reaching it closes the
    /// circuit. `Closed`: pays one failure back toward zero.
    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        inner.last_success = Some(Instant::now());
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    info!(breaker = %self.name, "circuit breaker -> closed (recovered)");
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.last_failure = None;
                }
            }
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_sub(1);
            }
            CircuitState::Open => {
                // Ignore — no call should have been allowed while Open.
            }
        }
    }

    /// Record a failed call.
    ///
    /// `Closed`: counts toward `failure_threshold`; reaching it opens the
    /// circuit. `HalfOpen`: the probe failed — reopen and restart the timeout.
    pub async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        "circuit breaker -> open (threshold reached)"
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "circuit breaker -> open (probe failed)");
                inner.state = CircuitState::Open;
                inner.success_count = 0;
            }
            CircuitState::Open => {
                // Already open — the timestamp update above restarts the window.
            }
        }
    }

    /// Current circuit state.
    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    /// Current failure count (diagnostics).
    pub async fn failure_count(&self) -> u32 {
        self.inner.read().await.failure_count
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Point-in-time snapshot for stats surfaces.
    pub async fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.read().await;
        BreakerSnapshot {
            provider: self.name.to_string(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            secs_since_last_failure: inner.last_failure.map(|t| t.elapsed().as_secs_f64()),
            secs_since_last_success: inner.last_success.map(|t| t.elapsed().as_secs_f64()),
        }
    }

    /// Force the circuit closed with counters cleared (operator override,
    /// e.g. after an out-of-band health confirmation).
    pub async fn force_close(&self) {
        let mut inner = self.inner.write().await;
        if inner.state != CircuitState::Closed {
            info!(breaker = %self.name, "circuit breaker force-closed");
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            inner.success_count = 0;
            inner.last_failure = None;
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .finish()
    }
}
