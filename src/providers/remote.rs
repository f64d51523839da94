//! Provider backed by an injected transport and its own credential pool.
//!
//! Each attempt leases a fresh credential, so a credential parked by a rate
//! limit mid-retry is never reused for the next attempt. Pool reports happen
//! inside the attempt, before the retry layer decides what to do.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::fault::{classify, SharedFaultHandler};
use crate::pool::SharedCredentialPool;
use crate::providers::{validate_batch, ProviderCapabilities, TranslationProvider};
use crate::transport::{SharedTransport, TransportError, TransportRequest};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempt-level marker for an empty pool. Contains "rate limit" on purpose
/// so the classifier treats it as retryable with backoff, giving the sliding
/// window time to free a slot.
const NO_CREDENTIAL: &str = "no usable credential (pool rate limited or exhausted)";

pub struct RemoteProvider {
    name: String,
    capabilities: ProviderCapabilities,
    transport: SharedTransport,
    pool: SharedCredentialPool,
    faults: SharedFaultHandler,
    request_timeout: Duration,
}

impl RemoteProvider {
    pub fn new(
        name: impl Into<String>,
        transport: SharedTransport,
        pool: SharedCredentialPool,
        faults: SharedFaultHandler,
    ) -> Self {
        Self {
            name: name.into(),
            capabilities: ProviderCapabilities::default(),
            transport,
            pool,
            faults,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait]
impl TranslationProvider for RemoteProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities.clone()
    }

    async fn translate(
        &self,
        texts: &[String],
        target_lang: &str,
        source_lang: &str,
    ) -> Result<Vec<String>> {
        validate_batch(&self.name, texts, target_lang, source_lang, &self.capabilities)?;

        let payload = json!({
            "action": "translate",
            "texts": texts,
            "target_lang": target_lang,
            "source_lang": source_lang,
        });

        let provider = self.name.clone();
        let transport = self.transport.clone();
        let pool = self.pool.clone();
        let timeout = self.request_timeout;

        let response = self
            .faults
            .execute(&self.name, move || {
                let provider = provider.clone();
                let transport = transport.clone();
                let pool = pool.clone();
                let payload = payload.clone();
                async move {
                    let lease = match pool.acquire().await {
                        Some(lease) => lease,
                        None => return Err(TransportError::message(NO_CREDENTIAL)),
                    };
                    let request = TransportRequest {
                        request_id: Uuid::new_v4(),
                        provider,
                        credential: lease.secret.clone(),
                        payload,
                        timeout,
                    };
                    match transport.send(request).await {
                        Ok(response) => {
                            pool.report_success(&lease.name).await;
                            Ok(response)
                        }
                        Err(err) => {
                            pool.report_error(&lease.name, classify(&err)).await;
                            Err(err)
                        }
                    }
                }
            })
            .await
            .map_err(|err| {
                if is_no_credential(&err) {
                    Error::NoCredentialAvailable
                } else {
                    err
                }
            })?;

        Ok(parse_translations(&self.name, response.payload, texts.len()))
    }

    async fn health_check(&self) -> Result<String> {
        let lease = self.pool.acquire().await.ok_or(Error::NoCredentialAvailable)?;
        let request = TransportRequest {
            request_id: Uuid::new_v4(),
            provider: self.name.clone(),
            credential: lease.secret.clone(),
            payload: json!({ "action": "health" }),
            timeout: PROBE_TIMEOUT,
        };
        match self.transport.send(request).await {
            Ok(_) => {
                self.pool.report_success(&lease.name).await;
                let stats = self.pool.stats().await;
                Ok(format!(
                    "{} of {} credentials active",
                    stats.active, stats.total_credentials
                ))
            }
            Err(err) => {
                self.pool.report_error(&lease.name, classify(&err)).await;
                Err(err.into())
            }
        }
    }
}

fn is_no_credential(err: &Error) -> bool {
    matches!(err, Error::RetriesExhausted { source, .. } if source.message == NO_CREDENTIAL)
}

/// Pull the translation array out of a response payload, padding or trimming
/// to the expected count so output order always lines up with input order.
fn parse_translations(provider: &str, payload: Value, expected: usize) -> Vec<String> {
    let mut out: Vec<String> = payload
        .get("translations")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|v| v.as_str().unwrap_or_default().to_string())
                .collect()
        })
        .unwrap_or_default();
    if out.len() != expected {
        warn!(
            provider,
            got = out.len(),
            expected,
            "translation count mismatch, padding with empty strings"
        );
        out.resize(expected, String::new());
    }
    out
}
