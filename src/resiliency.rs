//! Top-level façade for the request pipeline.
//!
//! Composes the fault handler (retry + circuit breakers) with the provider
//! orchestrator (selection + fallback chains) behind one handle, so callers
//! wire a single object instead of three.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::fault::{
    BreakerSnapshot, CircuitBreakerConfig, CircuitState, FaultTally, RetryPolicy,
    SharedFaultHandler,
};
use crate::providers::{
    ProviderStatistics, ProviderStatus, SharedOrchestrator, TranslationOutcome, TranslationRequest,
};
use crate::transport::TransportError;

pub struct ResiliencyManager {
    orchestrator: SharedOrchestrator,
    faults: SharedFaultHandler,
}

pub type SharedResiliencyManager = Arc<ResiliencyManager>;

impl ResiliencyManager {
    pub fn new(orchestrator: SharedOrchestrator, faults: SharedFaultHandler) -> Self {
        Self {
            orchestrator,
            faults,
        }
    }

    pub fn orchestrator(&self) -> &SharedOrchestrator {
        &self.orchestrator
    }

    pub fn faults(&self) -> &SharedFaultHandler {
        &self.faults
    }

    // ── Request surface ──────────────────────────────────────────────────────

    /// Run one operation against a named provider with breaker gating and
    /// retry. See [`FaultHandler::execute`](crate::fault::FaultHandler::execute).
    pub async fn execute_with_retry<F, Fut, T>(&self, provider: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        self.faults.execute(provider, op).await
    }

    /// Serve a request through the best available provider, with fallback.
    pub async fn translate_request(
        &self,
        request: &TranslationRequest,
    ) -> Result<TranslationOutcome> {
        self.orchestrator.translate_request(request).await
    }

    /// Translate through the best available provider, with fallback.
    pub async fn translate(
        &self,
        texts: &[String],
        target_lang: &str,
        source_lang: &str,
    ) -> Result<Vec<String>> {
        self.orchestrator.translate(texts, target_lang, source_lang).await
    }

    // ── Configuration ────────────────────────────────────────────────────────

    pub async fn set_fallback_chain(&self, provider: &str, chain: Vec<String>) -> Result<()> {
        self.orchestrator.set_fallback_chain(provider, chain).await
    }

    pub async fn enable_provider(&self, name: &str) -> Result<()> {
        self.orchestrator.set_enabled(name, true).await
    }

    pub async fn disable_provider(&self, name: &str) -> Result<()> {
        self.orchestrator.set_enabled(name, false).await
    }

    pub async fn set_retry_policy(&self, provider: &str, policy: RetryPolicy) {
        self.faults.set_retry_policy(provider, policy).await;
    }

    pub async fn configure_breaker(&self, provider: &str, config: CircuitBreakerConfig) {
        self.faults.configure_breaker(provider, config).await;
    }

    /// Give every registered provider its own breaker and retry policy up
    /// front, so no state is lazily constructed mid-incident.
    pub async fn install_default_policies(
        &self,
        breaker: CircuitBreakerConfig,
        retry: RetryPolicy,
    ) {
        let names = self.orchestrator.provider_names().await;
        for name in &names {
            self.faults.configure_breaker(name, breaker.clone()).await;
            self.faults.set_retry_policy(name, retry.clone()).await;
        }
        info!(providers = names.len(), "default resiliency policies installed");
    }

    // ── Breaker control ──────────────────────────────────────────────────────

    pub async fn breaker_state(&self, provider: &str) -> Option<CircuitState> {
        self.faults.breaker_state(provider).await
    }

    /// Manually close a provider's breaker after an incident.
    pub async fn force_close_breaker(&self, provider: &str) -> bool {
        self.faults.force_close(provider).await
    }

    // ── Observability ────────────────────────────────────────────────────────

    pub async fn report(&self) -> ResiliencyReport {
        ResiliencyReport {
            providers: self.orchestrator.provider_status().await,
            statistics: self.orchestrator.statistics().await,
            breakers: self.faults.breaker_snapshots().await,
            faults: self.faults.fault_stats().await,
        }
    }
}

/// Point-in-time view across providers, breakers, and fault tallies.
#[derive(Debug, Clone, Serialize)]
pub struct ResiliencyReport {
    pub providers: Vec<ProviderStatus>,
    pub statistics: HashMap<String, ProviderStatistics>,
    pub breakers: Vec<BreakerSnapshot>,
    pub faults: HashMap<String, FaultTally>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::fault::FaultHandler;
    use crate::providers::{
        ProviderCapabilities, ProviderOrchestrator, TranslationProvider,
    };

    struct EchoProvider;

    #[async_trait]
    impl TranslationProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities::default()
        }

        async fn translate(
            &self,
            texts: &[String],
            _target_lang: &str,
            _source_lang: &str,
        ) -> Result<Vec<String>> {
            Ok(texts.to_vec())
        }

        async fn health_check(&self) -> Result<String> {
            Ok("ok".to_string())
        }
    }

    async fn manager() -> ResiliencyManager {
        let orchestrator = Arc::new(ProviderOrchestrator::new());
        orchestrator.register(Arc::new(EchoProvider), 1).await.unwrap();
        ResiliencyManager::new(orchestrator, Arc::new(FaultHandler::default()))
    }

    #[tokio::test]
    async fn install_default_policies_covers_every_provider() {
        let mgr = manager().await;
        assert_eq!(mgr.breaker_state("echo").await, None);

        mgr.install_default_policies(CircuitBreakerConfig::default(), RetryPolicy::instant())
            .await;
        assert_eq!(mgr.breaker_state("echo").await, Some(CircuitState::Closed));
    }

    #[tokio::test]
    async fn report_includes_registered_providers() {
        let mgr = manager().await;
        mgr.translate(&["hi".to_string()], "es", "en").await.unwrap();

        let report = mgr.report().await;
        assert_eq!(report.providers.len(), 1);
        assert_eq!(report.providers[0].name, "echo");
        assert_eq!(report.statistics["echo"].success_count, 1);
    }

    #[tokio::test]
    async fn disable_then_enable_round_trips_availability() {
        let mgr = manager().await;
        mgr.disable_provider("echo").await.unwrap();
        assert!(mgr.translate(&["hi".to_string()], "es", "en").await.is_err());
        mgr.enable_provider("echo").await.unwrap();
        assert!(mgr.translate(&["hi".to_string()], "es", "en").await.is_ok());
    }
}
