//! Integration tests for the job scheduler.
//!
//! Exercises the dispatch loop as a caller sees it: concurrency caps, slot
//! handover to due jobs, restart, and the status surfaces.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use lingocore::scheduler::{JobScheduler, JobStatus, SchedulerConfig};
use tokio::time::Instant;

fn config(max_concurrent: usize) -> SchedulerConfig {
    SchedulerConfig {
        max_concurrent,
        tick_interval_ms: 10,
    }
}

// ── Dispatch under load ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_due_job_starts_the_moment_a_slot_opens() {
    let scheduler: JobScheduler<()> = JobScheduler::new(config(1));
    let t0 = Instant::now();

    scheduler
        .add_job("hog", 0, Duration::ZERO, || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await
        .unwrap();

    let due_started: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
    let mark = due_started.clone();
    scheduler
        .add_job("due", 0, Duration::from_secs(2), move || async move {
            *mark.lock().unwrap() = Some(Instant::now());
            Ok(())
        })
        .await
        .unwrap();

    scheduler.start().await.unwrap();
    assert!(scheduler.wait_for_completion(Duration::from_secs(30)).await);
    scheduler.stop().await.unwrap();

    // "due" became eligible at t+2s but the only slot was busy until t+10s;
    // it must start right at the handover, not 2s after it.
    let started = due_started.lock().unwrap().expect("due should have run");
    let offset = started - t0;
    assert!(
        offset >= Duration::from_secs(10) && offset <= Duration::from_millis(10_500),
        "due started {offset:?} after enqueue"
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_never_exceeds_the_cap() {
    let scheduler: JobScheduler<()> = JobScheduler::new(config(2));
    let current = Arc::new(AtomicU32::new(0));
    let peak = Arc::new(AtomicU32::new(0));

    for i in 0..6 {
        let current = current.clone();
        let peak = peak.clone();
        scheduler
            .add_job(format!("job-{i}"), 1, Duration::ZERO, move || async move {
                let occupied = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(occupied, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
    }

    scheduler.start().await.unwrap();
    assert!(scheduler.wait_for_completion(Duration::from_secs(10)).await);
    scheduler.stop().await.unwrap();

    assert_eq!(
        peak.load(Ordering::SeqCst),
        2,
        "cap of two should be reached but never exceeded"
    );
    assert_eq!(scheduler.counts().await.completed, 6);
}

#[tokio::test(start_paused = true)]
async fn test_jobs_queued_before_start_dispatch_on_start() {
    let scheduler: JobScheduler<()> = JobScheduler::new(config(3));
    for i in 0..3 {
        scheduler
            .add_job(format!("early-{i}"), 1, Duration::ZERO, || async { Ok(()) })
            .await
            .unwrap();
    }
    assert_eq!(scheduler.counts().await.pending, 3);
    assert!(!scheduler.is_running().await);

    scheduler.start().await.unwrap();
    assert!(scheduler.wait_for_completion(Duration::from_secs(5)).await);
    assert_eq!(scheduler.counts().await.completed, 3);
    scheduler.stop().await.unwrap();
}

// ── Status surfaces ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_delayed_jobs_surface_as_waiting() {
    let scheduler: JobScheduler<()> = JobScheduler::new(config(2));
    for id in ["later-1", "later-2"] {
        scheduler
            .add_job(id, 1, Duration::from_secs(60), || async { Ok(()) })
            .await
            .unwrap();
    }
    assert_eq!(
        scheduler.counts().await.pending,
        2,
        "not examined before start"
    );

    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let counts = scheduler.counts().await;
    assert_eq!(counts.waiting, 2);
    assert_eq!(counts.running, 0);
    assert_eq!(
        scheduler.get_status("later-1").await.unwrap(),
        JobStatus::Waiting
    );
    assert_eq!(scheduler.pending_ids().await.len(), 2);

    scheduler.stop().await.unwrap();
    assert_eq!(scheduler.counts().await.cancelled, 2);
}

#[tokio::test(start_paused = true)]
async fn test_results_are_claimed_exactly_once() {
    let scheduler: JobScheduler<String> = JobScheduler::new(config(2));
    scheduler
        .add_job("t", 1, Duration::ZERO, || async { Ok("hola".to_string()) })
        .await
        .unwrap();
    scheduler.start().await.unwrap();
    assert!(scheduler.wait_for_completion(Duration::from_secs(5)).await);

    assert_eq!(scheduler.take_result("t").await.unwrap().unwrap(), "hola");
    assert!(
        scheduler.take_result("t").await.is_none(),
        "second claim finds nothing"
    );

    // Status and snapshot stay readable after the claim.
    assert_eq!(scheduler.get_status("t").await.unwrap(), JobStatus::Completed);
    let snap = scheduler.snapshot().await;
    assert_eq!(snap.len(), 1);
    assert!(snap[0].duration_ms.is_some());
    assert!(snap[0].started_at.is_some());

    scheduler.stop().await.unwrap();
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop_dispatches_new_work() {
    let scheduler: JobScheduler<u32> = JobScheduler::new(config(2));
    scheduler
        .add_job("first", 1, Duration::ZERO, || async { Ok(1) })
        .await
        .unwrap();
    scheduler.start().await.unwrap();
    assert!(scheduler.wait_for_completion(Duration::from_secs(5)).await);
    scheduler.stop().await.unwrap();
    assert!(!scheduler.is_running().await);

    scheduler
        .add_job("second", 1, Duration::ZERO, || async { Ok(2) })
        .await
        .unwrap();
    scheduler.start().await.unwrap();
    assert!(scheduler.is_running().await);
    assert!(scheduler.wait_for_completion(Duration::from_secs(5)).await);

    assert_eq!(scheduler.take_result("first").await.unwrap().unwrap(), 1);
    assert_eq!(scheduler.take_result("second").await.unwrap().unwrap(), 2);
    scheduler.stop().await.unwrap();
}
