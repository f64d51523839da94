//! Resilient request orchestration for flaky, rate-limited translation APIs:
//! credential rotation with sliding-window quotas, delayed priority job
//! scheduling, per-provider circuit breakers with retry, and health-scored
//! provider selection with fallback chains.

pub mod config;
pub mod error;
pub mod fault;
pub mod logging;
pub mod pool;
pub mod providers;
pub mod resiliency;
pub mod scheduler;
pub mod transport;

pub use config::CoreConfig;
pub use error::{Error, Result};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use fault::{FaultHandler, SharedFaultHandler};
use pool::{CredentialPool, PoolStats, SharedCredentialPool};
use providers::{
    ProviderOrchestrator, RemoteProvider, SharedOrchestrator, TranslationOutcome,
    TranslationRequest,
};
use resiliency::{ResiliencyManager, ResiliencyReport, SharedResiliencyManager};
use scheduler::{JobScheduler, SharedJobScheduler, StatusCounts};
use transport::SharedTransport;

const DEFAULT_JOB_PRIORITY: u32 = 5;

/// Shared handle over the assembled core, passed around by the host.
#[derive(Clone)]
pub struct OrchestratorContext {
    pub config: Arc<CoreConfig>,
    /// Provider selection, fallback, breakers, and retry.
    pub resiliency: SharedResiliencyManager,
    /// Delayed priority job execution; results are served translation
    /// outcomes, claimed per job id.
    pub scheduler: SharedJobScheduler<TranslationOutcome>,
    pools: Arc<HashMap<String, SharedCredentialPool>>,
    monitor: Arc<Mutex<Option<JoinHandle<()>>>>,
}

/// One status document covering providers, breakers, jobs, and pools.
#[derive(Debug, Clone, Serialize)]
pub struct CoreStatus {
    pub resiliency: ResiliencyReport,
    pub jobs: StatusCounts,
    pub pools: HashMap<String, PoolStats>,
}

impl OrchestratorContext {
    /// Assemble the core from configuration: one credential pool and remote
    /// provider per `[providers.<name>]` profile, registered in priority
    /// order, with breakers and retry policies installed up front.
    pub async fn from_config(config: CoreConfig, transport: SharedTransport) -> Result<Self> {
        let faults: SharedFaultHandler = Arc::new(FaultHandler::new(
            config.resiliency.retry_policy(),
            config.resiliency.breaker_config(),
        ));
        let orchestrator: SharedOrchestrator = Arc::new(ProviderOrchestrator::new());

        let mut pools = HashMap::new();
        for (name, profile) in config.providers_by_priority() {
            let pool: SharedCredentialPool = Arc::new(CredentialPool::new(
                profile.credentials.clone(),
                config.pool_config_for(name),
            ));
            let mut provider =
                RemoteProvider::new(name, transport.clone(), pool.clone(), faults.clone());
            if let Some(secs) = profile.request_timeout_secs {
                provider = provider.with_timeout(Duration::from_secs(secs));
            }
            orchestrator.register(Arc::new(provider), profile.priority).await?;
            pools.insert(name.to_string(), pool);
        }
        for (name, profile) in &config.providers {
            if !profile.enabled {
                orchestrator.set_enabled(name, false).await?;
            }
            if !profile.fallback.is_empty() {
                orchestrator
                    .set_fallback_chain(name, profile.fallback.clone())
                    .await?;
            }
        }

        let resiliency = Arc::new(ResiliencyManager::new(orchestrator, faults));
        resiliency
            .install_default_policies(
                config.resiliency.breaker_config(),
                config.resiliency.retry_policy(),
            )
            .await;
        let scheduler = Arc::new(JobScheduler::new(config.scheduler.clone()));

        info!(providers = pools.len(), "orchestration core assembled");
        Ok(Self {
            config: Arc::new(config),
            resiliency,
            scheduler,
            pools: Arc::new(pools),
            monitor: Arc::new(Mutex::new(None)),
        })
    }

    /// Start the job dispatch loop and the background health monitor.
    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await?;
        let mut monitor = self.monitor.lock().await;
        if monitor.is_none() {
            let handle = self
                .resiliency
                .orchestrator()
                .clone()
                .spawn_monitor(self.config.health.check_interval());
            *monitor = Some(handle);
        }
        Ok(())
    }

    /// Stop the health monitor and the scheduler, cancelling queued jobs.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(handle) = self.monitor.lock().await.take() {
            handle.abort();
        }
        if self.scheduler.is_running().await {
            self.scheduler.stop().await?;
        }
        Ok(())
    }

    /// Queue a translation request as a scheduled job. `priority` defaults to
    /// 5, `delay` to the configured job spacing; the outcome is collected
    /// later via `scheduler.take_result(id)`.
    pub async fn submit_translation(
        &self,
        id: impl Into<String>,
        request: TranslationRequest,
        priority: Option<u32>,
        delay: Option<Duration>,
    ) -> Result<()> {
        let resiliency = self.resiliency.clone();
        self.scheduler
            .add_job(
                id,
                priority.unwrap_or(DEFAULT_JOB_PRIORITY),
                delay.unwrap_or_else(|| self.config.job_delay()),
                move || async move { resiliency.translate_request(&request).await },
            )
            .await
    }

    /// Serve a request immediately, bypassing the scheduler.
    pub async fn translate_request(
        &self,
        request: &TranslationRequest,
    ) -> Result<TranslationOutcome> {
        self.resiliency.translate_request(request).await
    }

    /// Translate immediately, bypassing the scheduler.
    pub async fn translate(
        &self,
        texts: &[String],
        target_lang: &str,
        source_lang: &str,
    ) -> Result<Vec<String>> {
        self.resiliency.translate(texts, target_lang, source_lang).await
    }

    pub fn pool(&self, provider: &str) -> Option<&SharedCredentialPool> {
        self.pools.get(provider)
    }

    pub async fn pool_stats(&self) -> HashMap<String, PoolStats> {
        let mut out = HashMap::new();
        for (name, pool) in self.pools.iter() {
            out.insert(name.clone(), pool.stats().await);
        }
        out
    }

    pub async fn status(&self) -> CoreStatus {
        CoreStatus {
            resiliency: self.resiliency.report().await,
            jobs: self.scheduler.counts().await,
            pools: self.pool_stats().await,
        }
    }
}
