//! Rotating credential pool.
//!
//! Owns the set of API credentials, their status lifecycle, per-credential
//! quota windows, and backoff scheduling. Acquisition scans from a rotating
//! cursor so consecutive leases never favor the same credential while
//! another one is usable. A credential parked by rate-limit or server faults
//! is re-armed only by a success report or an explicit reset.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::pool::backoff::{delay_for_attempt, BackoffConfig};
use crate::pool::quota::SlidingWindow;

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Active,
    /// Parked behind a backoff window after rate-limit or server faults.
    RateLimited,
    /// Retired after exceeding the retry budget on server faults.
    Error,
    /// Retired after exceeding the retry budget on rate-limit faults.
    Exhausted,
}

impl fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CredentialStatus::Active => "active",
            CredentialStatus::RateLimited => "rate_limited",
            CredentialStatus::Error => "error",
            CredentialStatus::Exhausted => "exhausted",
        };
        write!(f, "{s}")
    }
}

/// Configuration for the credential pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Per-credential ceiling on calls in any trailing 60-second window.
    pub max_requests_per_minute: u64,
    /// Rate-limit / server faults tolerated per credential before it is retired.
    pub max_retries: u32,
    pub backoff: BackoffConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 20,
            max_retries: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

struct CredentialEntry {
    name: String,
    secret: String,
    status: CredentialStatus,
    retry_count: u32,
    last_used: Option<DateTime<Utc>>,
    next_retry_at: Option<DateTime<Utc>>,
    window: SlidingWindow,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
}

impl CredentialEntry {
    fn new(index: usize, secret: String, rpm: u64) -> Self {
        Self {
            name: format!("key{}", index + 1),
            secret,
            status: CredentialStatus::Active,
            retry_count: 0,
            last_used: None,
            next_retry_at: None,
            window: SlidingWindow::per_minute(rpm),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
        }
    }

    fn usable(&mut self, now: DateTime<Utc>) -> bool {
        self.status == CredentialStatus::Active
            && !self.window.is_limited(now)
            && self.next_retry_at.is_none_or(|t| now >= t)
    }
}

/// A leased credential handed to the request path. Leasing counts against the
/// quota window but does not lock the credential; concurrent leases of the
/// same credential are bounded by the window alone.
#[derive(Clone)]
pub struct LeasedCredential {
    pub name: String,
    pub secret: String,
}

impl fmt::Debug for LeasedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never leak the secret into logs.
        f.debug_struct("LeasedCredential")
            .field("name", &self.name)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Per-credential view for diagnostics. Carries no secret material.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSnapshot {
    pub name: String,
    pub status: CredentialStatus,
    pub retry_count: u32,
    pub window_used: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Aggregate pool statistics.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total_credentials: usize,
    pub active: usize,
    pub rate_limited: usize,
    pub error: usize,
    pub exhausted: usize,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Percentage of successful requests over total (0 when idle).
    pub success_rate: f64,
}

// ── Pool ─────────────────────────────────────────────────────────────────────

struct PoolInner {
    entries: Vec<CredentialEntry>,
    cursor: usize,
}

pub struct CredentialPool {
    inner: RwLock<PoolInner>,
    config: PoolConfig,
}

impl CredentialPool {
    /// Build a pool from raw secrets. Credentials are named `key1`, `key2`, …
    /// in registration order.
    pub fn new(secrets: Vec<String>, config: PoolConfig) -> Self {
        if secrets.is_empty() {
            warn!("credential pool constructed with no credentials");
        } else {
            info!(credentials = secrets.len(), "credential pool initialized");
        }
        let rpm = config.max_requests_per_minute;
        let entries = secrets
            .into_iter()
            .enumerate()
            .map(|(i, secret)| CredentialEntry::new(i, secret, rpm))
            .collect();
        Self {
            inner: RwLock::new(PoolInner { entries, cursor: 0 }),
            config,
        }
    }

    /// Lease the next usable credential, or `None` after one full rotation
    /// finds nothing usable.
    ///
    /// A usable credential is `active`, below its quota ceiling, and past any
    /// scheduled retry time. Leasing records a window timestamp and advances
    /// the rotation cursor past the chosen credential.
    pub async fn acquire(&self) -> Option<LeasedCredential> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let len = inner.entries.len();
        if len == 0 {
            return None;
        }

        for step in 0..len {
            let idx = (inner.cursor + step) % len;
            if !inner.entries[idx].usable(now) {
                continue;
            }
            let lease = {
                let entry = &mut inner.entries[idx];
                entry.window.record_event(now);
                entry.total_requests += 1;
                entry.last_used = Some(now);
                debug!(credential = %entry.name, "credential acquired");
                LeasedCredential {
                    name: entry.name.clone(),
                    secret: entry.secret.clone(),
                }
            };
            inner.cursor = (idx + 1) % len;
            return Some(lease);
        }

        warn!("no credential available after full rotation");
        None
    }

    /// Report a successful call. Restores `active`, clears the retry counter
    /// and any scheduled backoff. Safe to call repeatedly.
    pub async fn report_success(&self, name: &str) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.entries.iter_mut().find(|e| e.name == name) {
            entry.successful_requests += 1;
            entry.retry_count = 0;
            entry.next_retry_at = None;
            if entry.status != CredentialStatus::Active {
                entry.status = CredentialStatus::Active;
                info!(credential = %name, "credential restored to active");
            }
        }
    }

    /// Report a failed call with its classified fault.
    ///
    /// Rate-limit and server faults consume the retry budget and park the
    /// credential behind a backoff delay; exceeding the budget retires it
    /// (`exhausted` for rate limits, `error` for server faults). Any other
    /// fault kind is not a pool-level failure: the credential stays active
    /// with its budget cleared.
    pub async fn report_error(&self, name: &str, fault: crate::fault::FaultKind) {
        use crate::fault::FaultKind;

        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.entries.iter_mut().find(|e| e.name == name) else {
            return;
        };
        entry.failed_requests += 1;

        match fault {
            FaultKind::RateLimit => {
                entry.retry_count += 1;
                if entry.retry_count > self.config.max_retries {
                    entry.status = CredentialStatus::Exhausted;
                    error!(
                        credential = %name,
                        retries = self.config.max_retries,
                        "credential exhausted after repeated rate limits"
                    );
                } else {
                    let delay = delay_for_attempt(entry.retry_count, &self.config.backoff);
                    entry.status = CredentialStatus::RateLimited;
                    entry.next_retry_at =
                        Some(now + Duration::milliseconds(delay.as_millis() as i64));
                    warn!(
                        credential = %name,
                        retry_in_secs = delay.as_secs_f64(),
                        "credential rate limited"
                    );
                }
            }
            FaultKind::ServerError => {
                entry.retry_count += 1;
                if entry.retry_count > self.config.max_retries {
                    entry.status = CredentialStatus::Error;
                    error!(
                        credential = %name,
                        retries = self.config.max_retries,
                        "credential retired after repeated server errors"
                    );
                } else {
                    let delay = delay_for_attempt(entry.retry_count, &self.config.backoff);
                    entry.status = CredentialStatus::RateLimited;
                    entry.next_retry_at =
                        Some(now + Duration::milliseconds(delay.as_millis() as i64));
                    warn!(
                        credential = %name,
                        retry_in_secs = delay.as_secs_f64(),
                        "credential backing off after server error"
                    );
                }
            }
            _ => {
                // Auth, network, timeout and unknown faults are not held
                // against the credential itself.
                entry.status = CredentialStatus::Active;
                entry.retry_count = 0;
                entry.next_retry_at = None;
                warn!(credential = %name, fault = %fault, "fault not attributed to credential");
            }
        }
    }

    /// Force a credential back to `active` with budget and backoff cleared.
    /// Returns `false` if the name is unknown.
    pub async fn reset(&self, name: &str) -> bool {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.entries.iter_mut().find(|e| e.name == name) {
            entry.status = CredentialStatus::Active;
            entry.retry_count = 0;
            entry.next_retry_at = None;
            info!(credential = %name, "credential reset to active");
            true
        } else {
            false
        }
    }

    /// Aggregate statistics across the pool.
    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.read().await;
        let count = |s: CredentialStatus| inner.entries.iter().filter(|e| e.status == s).count();
        let total_requests: u64 = inner.entries.iter().map(|e| e.total_requests).sum();
        let successful_requests: u64 = inner.entries.iter().map(|e| e.successful_requests).sum();
        let failed_requests: u64 = inner.entries.iter().map(|e| e.failed_requests).sum();
        PoolStats {
            total_credentials: inner.entries.len(),
            active: count(CredentialStatus::Active),
            rate_limited: count(CredentialStatus::RateLimited),
            error: count(CredentialStatus::Error),
            exhausted: count(CredentialStatus::Exhausted),
            total_requests,
            successful_requests,
            failed_requests,
            success_rate: if total_requests > 0 {
                successful_requests as f64 / total_requests as f64 * 100.0
            } else {
                0.0
            },
        }
    }

    /// Per-credential snapshots in registration order.
    pub async fn snapshot(&self) -> Vec<CredentialSnapshot> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        inner
            .entries
            .iter_mut()
            .map(|e| CredentialSnapshot {
                name: e.name.clone(),
                status: e.status,
                retry_count: e.retry_count,
                window_used: e.window.count_in_window(now),
                total_requests: e.total_requests,
                successful_requests: e.successful_requests,
                failed_requests: e.failed_requests,
                last_used: e.last_used,
                next_retry_at: e.next_retry_at,
            })
            .collect()
    }

    /// Shortest wait until some active credential frees a quota slot.
    ///
    /// `None` when a credential is usable right now, or when nothing will
    /// free up on its own (every credential parked or retired).
    pub async fn time_until_slot(&self) -> Option<std::time::Duration> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let mut best: Option<Duration> = None;
        for entry in inner
            .entries
            .iter_mut()
            .filter(|e| e.status == CredentialStatus::Active)
        {
            if entry.usable(now) {
                return None;
            }
            let window_wait = entry.window.time_until_slot(now).unwrap_or(Duration::zero());
            let retry_wait = entry
                .next_retry_at
                .map(|t| (t - now).max(Duration::zero()))
                .unwrap_or(Duration::zero());
            let wait = window_wait.max(retry_wait);
            best = Some(match best {
                Some(b) => b.min(wait),
                None => wait,
            });
        }
        best.and_then(|d| d.to_std().ok())
    }
}

/// Thread-safe wrapper for use in `OrchestratorContext`.
pub type SharedCredentialPool = Arc<CredentialPool>;
