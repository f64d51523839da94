//! Integration tests for fault handling.
//!
//! Drives the handler end to end: circuits tripping over repeated calls,
//! recovery probes after the open timeout, per-provider policy overrides.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lingocore::fault::{CircuitBreakerConfig, CircuitState, FaultHandler, RetryPolicy};
use lingocore::transport::TransportError;
use lingocore::Error;

type OpFuture =
    Pin<Box<dyn Future<Output = std::result::Result<&'static str, TransportError>> + Send>>;

/// Operation failing its first `fail_times` calls with `status`, then succeeding.
fn op_with(status: u16, fail_times: u32) -> (Arc<AtomicU32>, impl FnMut() -> OpFuture) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let op = move || -> OpFuture {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if n < fail_times {
                Err(TransportError::with_status(status, "induced failure"))
            } else {
                Ok("done")
            }
        })
    };
    (calls, op)
}

fn snappy_breaker() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 2,
        success_threshold: 2,
        timeout: Duration::from_millis(100),
    }
}

// ── Circuit lifecycle through execute ────────────────────────────────────────

#[tokio::test]
async fn test_circuit_trips_and_recovers_across_calls() {
    let handler = FaultHandler::new(RetryPolicy::no_retry(), snappy_breaker());

    // Two failing calls reach the threshold.
    for _ in 0..2 {
        let (_, op) = op_with(503, u32::MAX);
        let _ = handler.execute("alpha", op).await;
    }
    assert_eq!(
        handler.breaker_state("alpha").await,
        Some(CircuitState::Open)
    );

    // Open state rejects without dispatching.
    let (calls, op) = op_with(503, u32::MAX);
    let err = handler.execute("alpha", op).await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0, "no dispatch while open");

    // After the timeout, a probe is admitted; two successes close it.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let (_, op) = op_with(503, 0);
    handler.execute("alpha", op).await.expect("probe should pass");
    assert_eq!(
        handler.breaker_state("alpha").await,
        Some(CircuitState::HalfOpen),
        "one success of two is not enough to close"
    );

    let (_, op) = op_with(503, 0);
    handler.execute("alpha", op).await.expect("second probe should pass");
    assert_eq!(
        handler.breaker_state("alpha").await,
        Some(CircuitState::Closed)
    );
}

#[tokio::test]
async fn test_failed_probe_reopens_and_restarts_the_timeout() {
    let handler = FaultHandler::new(RetryPolicy::no_retry(), snappy_breaker());

    for _ in 0..2 {
        let (_, op) = op_with(503, u32::MAX);
        let _ = handler.execute("alpha", op).await;
    }
    tokio::time::sleep(Duration::from_millis(250)).await;

    // Probe is admitted and fails.
    let (calls, op) = op_with(503, u32::MAX);
    let _ = handler.execute("alpha", op).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1, "probe call was dispatched");
    assert_eq!(
        handler.breaker_state("alpha").await,
        Some(CircuitState::Open)
    );

    // The timeout restarted: the next call is rejected again.
    let (calls, op) = op_with(503, u32::MAX);
    let err = handler.execute("alpha", op).await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // And the circuit still recovers after another full wait.
    tokio::time::sleep(Duration::from_millis(250)).await;
    for _ in 0..2 {
        let (_, op) = op_with(503, 0);
        handler.execute("alpha", op).await.expect("recovery");
    }
    assert_eq!(
        handler.breaker_state("alpha").await,
        Some(CircuitState::Closed)
    );
}

// ── Policies ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_policy_override_is_scoped_to_one_provider() {
    let handler = FaultHandler::new(RetryPolicy::instant(), CircuitBreakerConfig::default());
    handler.set_retry_policy("alpha", RetryPolicy::no_retry()).await;

    let (calls, op) = op_with(503, u32::MAX);
    let err = handler.execute("alpha", op).await.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 1, "no_retry means one attempt");
    assert!(matches!(err, Error::RetriesExhausted { attempts: 1, .. }));

    let (calls, op) = op_with(503, u32::MAX);
    let err = handler.execute("beta", op).await.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 3, "default policy still retries");
    assert!(matches!(err, Error::RetriesExhausted { attempts: 3, .. }));
}

#[tokio::test]
async fn test_auth_faults_feed_the_breaker() {
    let handler = FaultHandler::new(RetryPolicy::no_retry(), snappy_breaker());

    for _ in 0..2 {
        let (_, op) = op_with(401, u32::MAX);
        let err = handler.execute("alpha", op).await.unwrap_err();
        assert!(matches!(err, Error::NonRetryable { .. }));
    }
    assert_eq!(
        handler.breaker_state("alpha").await,
        Some(CircuitState::Open),
        "non-retryable failures still trip the circuit"
    );

    let stats = handler.fault_stats().await;
    assert_eq!(stats["alpha"].auth_error, 2);
    assert_eq!(stats["alpha"].total(), 2);
}

// ── Diagnostics ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_snapshots_name_their_provider() {
    let handler = FaultHandler::new(
        RetryPolicy::no_retry(),
        CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            timeout: Duration::from_secs(60),
        },
    );

    let (_, op) = op_with(503, u32::MAX);
    let _ = handler.execute("alpha", op).await;
    let (_, op) = op_with(503, 0);
    handler.execute("beta", op).await.unwrap();

    let snapshots = handler.breaker_snapshots().await;
    assert_eq!(snapshots.len(), 2);

    let alpha = snapshots
        .iter()
        .find(|s| s.provider == "alpha")
        .expect("alpha breaker in report");
    assert_eq!(alpha.state, CircuitState::Open);
    assert!(alpha.failure_count >= 1);
    assert!(alpha.secs_since_last_failure.is_some());

    let beta = snapshots
        .iter()
        .find(|s| s.provider == "beta")
        .expect("beta breaker in report");
    assert_eq!(beta.state, CircuitState::Closed);
    assert!(beta.secs_since_last_success.is_some());
}
