// SPDX-License-Identifier: MIT

//! Provider registry with scored selection and fallback chains.
//!
//! Selection ranks every available provider (enabled and last known healthy)
//! by a composite score: probe health and latency, configured priority, and
//! lifetime success rate. Ties go to the first registered. `translate` walks
//! the chosen provider's fallback chain until one succeeds, and aggregates
//! every failure when none does.
//!
//! Health is refreshed by [`ProviderOrchestrator::force_health_check`] or the
//! background task from [`ProviderOrchestrator::spawn_monitor`], never inline
//! with a translation call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::providers::{
    ProviderHealth, ProviderStats, SharedProvider, TranslationOutcome, TranslationRequest,
};

struct ProviderEntry {
    provider: SharedProvider,
    priority: u32,
    enabled: bool,
}

/// Registration order of `entries` is load-bearing: it breaks score ties and
/// orders the default fallback chain.
struct OrchestratorInner {
    entries: Vec<ProviderEntry>,
    health: HashMap<String, ProviderHealth>,
    stats: HashMap<String, ProviderStats>,
    chains: HashMap<String, Vec<String>>,
}

impl OrchestratorInner {
    fn entry(&self, name: &str) -> Option<&ProviderEntry> {
        self.entries.iter().find(|e| e.provider.name() == name)
    }

    fn entry_mut(&mut self, name: &str) -> Option<&mut ProviderEntry> {
        self.entries.iter_mut().find(|e| e.provider.name() == name)
    }

    fn is_available(&self, name: &str) -> bool {
        let enabled = self.entry(name).map(|e| e.enabled).unwrap_or(false);
        let healthy = self.health.get(name).map(|h| h.healthy).unwrap_or(false);
        enabled && healthy
    }

    fn available_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.provider.name().to_string())
            .filter(|name| self.is_available(name))
            .collect()
    }
}

pub struct ProviderOrchestrator {
    inner: RwLock<OrchestratorInner>,
}

pub type SharedOrchestrator = Arc<ProviderOrchestrator>;

impl Default for ProviderOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderOrchestrator {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(OrchestratorInner {
                entries: Vec::new(),
                health: HashMap::new(),
                stats: HashMap::new(),
                chains: HashMap::new(),
            }),
        }
    }

    // ── Registry ─────────────────────────────────────────────────────────────

    /// Register a provider. Lower `priority` scores higher in selection.
    ///
    /// Providers start out assumed healthy until the first probe says
    /// otherwise.
    pub async fn register(&self, provider: SharedProvider, priority: u32) -> Result<()> {
        let name = provider.name().to_string();
        let mut inner = self.inner.write().await;
        if inner.entry(&name).is_some() {
            return Err(Error::DuplicateProvider { name });
        }
        info!(provider = %name, priority, "provider registered");
        inner.health.insert(name.clone(), ProviderHealth::unprobed());
        inner.stats.insert(name, ProviderStats::default());
        inner.entries.push(ProviderEntry {
            provider,
            priority,
            enabled: true,
        });
        Ok(())
    }

    /// Remove a provider and its health, stats, and fallback chain.
    ///
    /// Other providers' chains may still name it; the fallback walk skips
    /// unknown members, so those entries go stale harmlessly.
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let before = inner.entries.len();
        inner.entries.retain(|e| e.provider.name() != name);
        if inner.entries.len() == before {
            return Err(Error::UnknownProvider {
                name: name.to_string(),
            });
        }
        inner.health.remove(name);
        inner.stats.remove(name);
        inner.chains.remove(name);
        info!(provider = %name, "provider unregistered");
        Ok(())
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner.entry_mut(name).ok_or_else(|| Error::UnknownProvider {
            name: name.to_string(),
        })?;
        if entry.enabled != enabled {
            info!(provider = name, enabled, "provider toggled");
        }
        entry.enabled = enabled;
        Ok(())
    }

    /// Configure the ordered fallback list tried after `name` fails.
    ///
    /// Every member must already be registered. With no configured chain the
    /// walk falls back to the remaining available providers in registration
    /// order.
    pub async fn set_fallback_chain(&self, name: &str, chain: Vec<String>) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.entry(name).is_none() {
            return Err(Error::UnknownProvider {
                name: name.to_string(),
            });
        }
        for member in &chain {
            if inner.entry(member).is_none() {
                return Err(Error::UnknownProvider {
                    name: member.clone(),
                });
            }
        }
        inner.chains.insert(name.to_string(), chain);
        Ok(())
    }

    pub async fn provider_names(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .entries
            .iter()
            .map(|e| e.provider.name().to_string())
            .collect()
    }

    /// Names of providers that are enabled and last known healthy,
    /// in registration order.
    pub async fn available(&self) -> Vec<String> {
        self.inner.read().await.available_names()
    }

    // ── Selection ────────────────────────────────────────────────────────────

    /// Pick the best provider for a request.
    ///
    /// A pinned provider wins outright when it is available; otherwise the
    /// highest-scoring available provider is chosen, first registered on ties.
    pub async fn select_provider(&self, pinned: Option<&str>) -> Result<String> {
        let inner = self.inner.read().await;
        if let Some(want) = pinned {
            if inner.is_available(want) {
                return Ok(want.to_string());
            }
            debug!(provider = want, "pinned provider unavailable, scoring the rest");
        }

        let mut best: Option<(f64, &str)> = None;
        for entry in &inner.entries {
            let name = entry.provider.name();
            if !inner.is_available(name) {
                continue;
            }
            let health = match inner.health.get(name) {
                Some(h) => h,
                None => continue,
            };
            let score = score_provider(entry.priority, health, inner.stats.get(name));
            match best {
                Some((top, _)) if score <= top => {}
                _ => best = Some((score, name)),
            }
        }

        match best {
            Some((score, name)) => {
                debug!(provider = name, score, "selected provider");
                Ok(name.to_string())
            }
            None => Err(Error::AllProvidersFailed {
                attempts: Vec::new(),
            }),
        }
    }

    // ── Translation ──────────────────────────────────────────────────────────

    /// Serve a request through the best provider, falling back down the
    /// chain on failure. Output always has the same length as the input.
    pub async fn translate_request(
        &self,
        request: &TranslationRequest,
    ) -> Result<TranslationOutcome> {
        if request.texts.is_empty() {
            return Err(Error::InvalidInput("empty batch".to_string()));
        }

        let started = std::time::Instant::now();
        let primary = self.select_provider(request.provider.as_deref()).await?;
        let chain = self.chain_for(&primary).await;
        let mut attempts: Vec<(String, String)> = Vec::new();

        for name in chain {
            match self
                .call_provider(&name, &request.texts, &request.target_lang, &request.source_lang)
                .await
            {
                Ok(mut out) => {
                    if out.len() != request.texts.len() {
                        warn!(
                            provider = %name,
                            got = out.len(),
                            expected = request.texts.len(),
                            "provider returned mismatched count, normalizing"
                        );
                        out.resize(request.texts.len(), String::new());
                    }
                    if !attempts.is_empty() {
                        info!(
                            provider = %name,
                            failed_before = attempts.len(),
                            "fallback provider succeeded"
                        );
                    }
                    return Ok(TranslationOutcome {
                        translations: out,
                        provider: name,
                        duration_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Err(err) => {
                    warn!(provider = %name, error = %err, "provider failed, trying next in chain");
                    attempts.push((name, err.to_string()));
                }
            }
        }

        Err(Error::AllProvidersFailed { attempts })
    }

    /// [`translate_request`](Self::translate_request) without the pin or the
    /// serving metadata: just the translated batch.
    pub async fn translate(
        &self,
        texts: &[String],
        target_lang: &str,
        source_lang: &str,
    ) -> Result<Vec<String>> {
        let request = TranslationRequest::new(texts.to_vec(), target_lang, source_lang);
        Ok(self.translate_request(&request).await?.translations)
    }

    /// The walk order for a request that starts at `primary`: the primary
    /// itself, then its configured chain, or every other available provider
    /// in registration order. No provider appears twice.
    async fn chain_for(&self, primary: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        let available = inner.available_names();
        let mut chain = vec![primary.to_string()];
        match inner.chains.get(primary) {
            Some(configured) => {
                for name in configured {
                    if available.contains(name) && !chain.contains(name) {
                        chain.push(name.clone());
                    }
                }
            }
            None => {
                for name in available {
                    if !chain.contains(&name) {
                        chain.push(name);
                    }
                }
            }
        }
        chain
    }

    async fn call_provider(
        &self,
        name: &str,
        texts: &[String],
        target_lang: &str,
        source_lang: &str,
    ) -> Result<Vec<String>> {
        let provider = {
            let inner = self.inner.read().await;
            inner.entry(name).map(|e| e.provider.clone())
        }
        .ok_or_else(|| Error::UnknownProvider {
            name: name.to_string(),
        })?;

        let started = std::time::Instant::now();
        let result = provider.translate(texts, target_lang, source_lang).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let mut inner = self.inner.write().await;
        let stats = inner.stats.entry(name.to_string()).or_default();
        match &result {
            Ok(_) => stats.record_success(latency_ms),
            Err(_) => stats.record_failure(),
        }
        result
    }

    // ── Health ───────────────────────────────────────────────────────────────

    /// Probe every provider now, concurrently, and return the refreshed
    /// statuses. Each probe runs in its own task so one hung provider cannot
    /// block the rest.
    pub async fn force_health_check(&self) -> Vec<ProviderStatus> {
        let targets: Vec<(String, SharedProvider)> = {
            let inner = self.inner.read().await;
            inner
                .entries
                .iter()
                .map(|e| (e.provider.name().to_string(), e.provider.clone()))
                .collect()
        };
        debug!(providers = targets.len(), "probing provider health");

        let handles: Vec<(String, JoinHandle<(Result<String>, u64)>)> = targets
            .into_iter()
            .map(|(name, provider)| {
                let handle = tokio::spawn(async move {
                    let started = std::time::Instant::now();
                    let outcome = provider.health_check().await;
                    (outcome, started.elapsed().as_millis() as u64)
                });
                (name, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            match handle.await {
                Ok((outcome, latency_ms)) => results.push((name, outcome, Some(latency_ms))),
                Err(e) => {
                    results.push((name, Err(Error::Config(format!("probe panicked: {e}"))), None))
                }
            }
        }

        {
            let mut inner = self.inner.write().await;
            for (name, outcome, latency_ms) in results {
                let prior_failures = inner
                    .health
                    .get(&name)
                    .map(|h| h.consecutive_failures)
                    .unwrap_or(0);
                let health = match outcome {
                    Ok(detail) => {
                        debug!(provider = %name, latency_ms, "provider healthy");
                        ProviderHealth::passing(detail, latency_ms.unwrap_or(0))
                    }
                    Err(err) => {
                        warn!(provider = %name, error = %err, "provider unhealthy");
                        ProviderHealth::failing(err.to_string(), latency_ms, prior_failures + 1)
                    }
                };
                inner.health.insert(name, health);
            }
        }

        self.provider_status().await
    }

    /// Re-probe all providers on a fixed interval until the handle is dropped
    /// or aborted.
    pub fn spawn_monitor(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        info!(interval_secs = every.as_secs(), "provider health monitor started");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                self.force_health_check().await;
            }
        })
    }

    // ── Observability ────────────────────────────────────────────────────────

    pub async fn provider_status(&self) -> Vec<ProviderStatus> {
        let inner = self.inner.read().await;
        inner
            .entries
            .iter()
            .map(|entry| {
                let name = entry.provider.name();
                let health = inner
                    .health
                    .get(name)
                    .cloned()
                    .unwrap_or_else(ProviderHealth::unprobed);
                ProviderStatus {
                    name: name.to_string(),
                    enabled: entry.enabled,
                    priority: entry.priority,
                    healthy: health.healthy,
                    message: health.message.clone(),
                    latency_ms: health.latency_ms,
                    checked_at: health.checked_at,
                    consecutive_failures: health.consecutive_failures,
                    score: score_provider(entry.priority, &health, inner.stats.get(name)),
                }
            })
            .collect()
    }

    pub async fn statistics(&self) -> HashMap<String, ProviderStatistics> {
        let inner = self.inner.read().await;
        inner
            .stats
            .iter()
            .map(|(name, stats)| {
                (
                    name.clone(),
                    ProviderStatistics {
                        request_count: stats.request_count,
                        success_count: stats.success_count,
                        failure_count: stats.failure_count,
                        success_rate: stats.success_rate(),
                        avg_latency_ms: stats.avg_latency_ms(),
                        last_request_at: stats.last_request_at,
                    },
                )
            })
            .collect()
    }
}

/// One provider's current standing, as reported by `provider_status`.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub enabled: bool,
    pub priority: u32,
    pub healthy: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    pub checked_at: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub score: f64,
}

/// Lifetime request counters derived from [`ProviderStats`].
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatistics {
    pub request_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<f64>,
    pub last_request_at: Option<DateTime<Utc>>,
}

/// Composite selection score. Bigger is better.
fn score_provider(priority: u32, health: &ProviderHealth, stats: Option<&ProviderStats>) -> f64 {
    let mut score = 0.0;
    if health.healthy {
        score += 40.0;
    }
    match health.latency_ms {
        Some(ms) if ms < 1_000 => score += 10.0,
        Some(ms) if ms < 3_000 => score += 5.0,
        _ => {}
    }
    score += (30.0 - priority as f64 * 5.0).max(0.0);
    match stats {
        Some(s) if s.request_count > 0 => {
            score += s.success_rate() * 20.0;
            match s.avg_latency_ms() {
                Some(avg) if avg < 1_000.0 => score += 10.0,
                Some(avg) if avg < 3_000.0 => score += 7.0,
                Some(avg) if avg < 5_000.0 => score += 4.0,
                Some(_) => {}
                None => score += 5.0,
            }
        }
        _ => {
            // No history yet: neutral defaults instead of zero.
            score += 15.0;
            score += 5.0;
        }
    }
    score
}
