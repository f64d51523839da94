// SPDX-License-Identifier: MIT

//! The scheduler itself: a queue, a running set, and a dispatch loop.
//!
//! The loop wakes on a short tick and on job completions. Each pass it reaps
//! finished tasks, computes the free concurrency budget, and starts every
//! queued job whose dispatch time has arrived, in priority order. A job's
//! dispatch time is `enqueue + delay`, never tied to when sibling jobs
//! finish, so a slot opening late cannot push an already-due job further out.
//!
//! Failures stay on the job record: a work future that errors or panics
//! marks its job failed and the loop keeps running.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::scheduler::job::{
    FinishedJob, JobSnapshot, JobStatus, JobWork, PendingJob, RunningJob, StatusCounts,
};
use crate::scheduler::queue::PendingQueue;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Jobs allowed to run at the same time.
    pub max_concurrent: usize,
    /// Dispatch loop wake interval.
    pub tick_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            tick_interval_ms: 100,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

// ── Scheduler ────────────────────────────────────────────────────────────────

struct Completion<T> {
    id: String,
    outcome: Result<T>,
}

struct SchedulerInner<T> {
    queue: PendingQueue<T>,
    running: HashMap<String, RunningJob>,
    finished: HashMap<String, FinishedJob<T>>,
    next_seq: u64,
    completion_tx: Option<mpsc::UnboundedSender<Completion<T>>>,
}

struct LoopControl {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

pub struct JobScheduler<T> {
    inner: Arc<Mutex<SchedulerInner<T>>>,
    config: SchedulerConfig,
    control: Mutex<Option<LoopControl>>,
}

pub type SharedJobScheduler<T> = Arc<JobScheduler<T>>;

impl<T: Send + 'static> Default for JobScheduler<T> {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl<T: Send + 'static> JobScheduler<T> {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SchedulerInner {
                queue: PendingQueue::new(),
                running: HashMap::new(),
                finished: HashMap::new(),
                next_seq: 0,
                completion_tx: None,
            })),
            config,
            control: Mutex::new(None),
        }
    }

    // ── Submission ───────────────────────────────────────────────────────────

    /// Queue a job. Lower `priority` dispatches sooner; `delay` counts from
    /// now. Jobs may be added before `start`, they dispatch once it runs.
    pub async fn add_job<F, Fut>(
        &self,
        id: impl Into<String>,
        priority: u32,
        delay: Duration,
        work: F,
    ) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let id = id.into();
        let mut guard = self.inner.lock().await;
        if guard.queue.contains(&id)
            || guard.running.contains_key(&id)
            || guard.finished.contains_key(&id)
        {
            return Err(Error::DuplicateJob { id });
        }
        let seq = guard.next_seq;
        guard.next_seq += 1;
        let work: JobWork<T> = Box::new(move || Box::pin(work()));
        debug!(job = %id, priority, delay_ms = delay.as_millis() as u64, "job queued");
        guard.queue.insert(PendingJob {
            id,
            priority,
            seq,
            delay,
            enqueued_at: Utc::now(),
            not_before: Instant::now() + delay,
            status: JobStatus::Pending,
            work,
        });
        Ok(())
    }

    /// Cancel one job. `Ok(true)` if it was pending or running, `Ok(false)`
    /// if it had already finished.
    pub async fn cancel_job(&self, id: &str) -> Result<bool> {
        let mut guard = self.inner.lock().await;
        if let Some(job) = guard.queue.remove(id) {
            let PendingJob {
                id,
                priority,
                delay,
                enqueued_at,
                ..
            } = job;
            info!(job = %id, "pending job cancelled");
            guard.finished.insert(
                id,
                FinishedJob {
                    status: JobStatus::Cancelled,
                    priority,
                    delay,
                    enqueued_at,
                    started_at: None,
                    finished_at: Utc::now(),
                    error: None,
                    outcome: None,
                },
            );
            return Ok(true);
        }
        if let Some(job) = guard.running.remove(id) {
            job.handle.abort();
            info!(job = id, "running job cancelled");
            guard.finished.insert(
                id.to_string(),
                FinishedJob {
                    status: JobStatus::Cancelled,
                    priority: job.priority,
                    delay: job.delay,
                    enqueued_at: job.enqueued_at,
                    started_at: Some(job.started_at),
                    finished_at: Utc::now(),
                    error: None,
                    outcome: None,
                },
            );
            return Ok(true);
        }
        if guard.finished.contains_key(id) {
            return Ok(false);
        }
        Err(Error::JobNotFound { id: id.to_string() })
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Start the dispatch loop. Calling it again while running is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut control = self.control.lock().await;
        if control.is_some() {
            warn!("job scheduler already running");
            return Ok(());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.inner.lock().await.completion_tx = Some(tx);
        let handle = Self::run_loop(self.inner.clone(), self.config.clone(), rx, shutdown_rx);
        *control = Some(LoopControl {
            handle,
            shutdown: shutdown_tx,
        });
        info!(
            max_concurrent = self.config.max_concurrent,
            tick_ms = self.config.tick_interval_ms,
            "job scheduler started"
        );
        Ok(())
    }

    /// Stop the loop and cancel every pending and running job.
    pub async fn stop(&self) -> Result<()> {
        let control = { self.control.lock().await.take() };
        let control = match control {
            Some(c) => c,
            None => return Err(Error::SchedulerNotRunning),
        };
        let _ = control.shutdown.send(true);
        let _ = control.handle.await;

        let mut guard = self.inner.lock().await;
        guard.completion_tx = None;
        let mut cancelled = 0usize;
        for job in guard.queue.drain() {
            let PendingJob {
                id,
                priority,
                delay,
                enqueued_at,
                ..
            } = job;
            guard.finished.insert(
                id,
                FinishedJob {
                    status: JobStatus::Cancelled,
                    priority,
                    delay,
                    enqueued_at,
                    started_at: None,
                    finished_at: Utc::now(),
                    error: None,
                    outcome: None,
                },
            );
            cancelled += 1;
        }
        let running: Vec<(String, RunningJob)> = guard.running.drain().collect();
        for (id, job) in running {
            job.handle.abort();
            guard.finished.insert(
                id,
                FinishedJob {
                    status: JobStatus::Cancelled,
                    priority: job.priority,
                    delay: job.delay,
                    enqueued_at: job.enqueued_at,
                    started_at: Some(job.started_at),
                    finished_at: Utc::now(),
                    error: None,
                    outcome: None,
                },
            );
            cancelled += 1;
        }
        info!(cancelled, "job scheduler stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.control.lock().await.is_some()
    }

    /// Block until no job is pending or running, polling on a short
    /// interval. Returns false if `timeout` elapses first.
    pub async fn wait_for_completion(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let guard = self.inner.lock().await;
                if guard.queue.is_empty() && guard.running.is_empty() {
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    // ── Inspection ───────────────────────────────────────────────────────────

    pub async fn get_status(&self, id: &str) -> Result<JobStatus> {
        let guard = self.inner.lock().await;
        if let Some(job) = guard.queue.iter().find(|j| j.id == id) {
            return Ok(job.status);
        }
        if guard.running.contains_key(id) {
            return Ok(JobStatus::Running);
        }
        if let Some(job) = guard.finished.get(id) {
            return Ok(job.status);
        }
        Err(Error::JobNotFound { id: id.to_string() })
    }

    /// Claim a finished job's result. Returns `None` for unknown, unfinished,
    /// cancelled, or already claimed jobs.
    pub async fn take_result(&self, id: &str) -> Option<Result<T>> {
        let mut guard = self.inner.lock().await;
        guard.finished.get_mut(id).and_then(|job| job.outcome.take())
    }

    pub async fn counts(&self) -> StatusCounts {
        let guard = self.inner.lock().await;
        let mut counts = StatusCounts::default();
        for job in guard.queue.iter() {
            match job.status {
                JobStatus::Waiting => counts.waiting += 1,
                _ => counts.pending += 1,
            }
        }
        counts.running = guard.running.len();
        for job in guard.finished.values() {
            match job.status {
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                _ => counts.cancelled += 1,
            }
        }
        counts
    }

    pub async fn pending_ids(&self) -> Vec<String> {
        let guard = self.inner.lock().await;
        guard.queue.iter().map(|j| j.id.clone()).collect()
    }

    pub async fn running_ids(&self) -> Vec<String> {
        let guard = self.inner.lock().await;
        let mut ids: Vec<String> = guard.running.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Every job the scheduler knows about, oldest submission first.
    pub async fn snapshot(&self) -> Vec<JobSnapshot> {
        let guard = self.inner.lock().await;
        let mut out = Vec::with_capacity(
            guard.queue.len() + guard.running.len() + guard.finished.len(),
        );
        for job in guard.queue.iter() {
            out.push(JobSnapshot {
                id: job.id.clone(),
                status: job.status,
                priority: job.priority,
                delay_ms: job.delay.as_millis() as u64,
                enqueued_at: job.enqueued_at,
                started_at: None,
                finished_at: None,
                duration_ms: None,
                error: None,
            });
        }
        for (id, job) in &guard.running {
            out.push(JobSnapshot {
                id: id.clone(),
                status: JobStatus::Running,
                priority: job.priority,
                delay_ms: job.delay.as_millis() as u64,
                enqueued_at: job.enqueued_at,
                started_at: Some(job.started_at),
                finished_at: None,
                duration_ms: None,
                error: None,
            });
        }
        for (id, job) in &guard.finished {
            let duration_ms = job
                .started_at
                .map(|s| (job.finished_at - s).num_milliseconds().max(0) as u64);
            out.push(JobSnapshot {
                id: id.clone(),
                status: job.status,
                priority: job.priority,
                delay_ms: job.delay.as_millis() as u64,
                enqueued_at: job.enqueued_at,
                started_at: job.started_at,
                finished_at: Some(job.finished_at),
                duration_ms,
                error: job.error.clone(),
            });
        }
        out.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at).then(a.id.cmp(&b.id)));
        out
    }

    // ── Dispatch loop ────────────────────────────────────────────────────────

    fn run_loop(
        inner: Arc<Mutex<SchedulerInner<T>>>,
        config: SchedulerConfig,
        mut completions: mpsc::UnboundedReceiver<Completion<T>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.tick_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    Some(done) = completions.recv() => {
                        Self::reap(&inner, done).await;
                        Self::dispatch_ready(&inner, config.max_concurrent).await;
                    }
                    _ = ticker.tick() => {
                        while let Ok(done) = completions.try_recv() {
                            Self::reap(&inner, done).await;
                        }
                        Self::dispatch_ready(&inner, config.max_concurrent).await;
                    }
                }
            }
            debug!("scheduler loop exited");
        })
    }

    async fn dispatch_ready(inner: &Arc<Mutex<SchedulerInner<T>>>, max_concurrent: usize) {
        let mut guard = inner.lock().await;
        let tx = match &guard.completion_tx {
            Some(tx) => tx.clone(),
            None => return,
        };
        let budget = max_concurrent.saturating_sub(guard.running.len());
        if budget == 0 {
            return;
        }
        let ready = guard.queue.take_ready(Instant::now(), budget);
        for job in ready {
            let PendingJob {
                id,
                priority,
                delay,
                enqueued_at,
                work,
                ..
            } = job;
            let started_at = Utc::now();
            let fut = work();
            let tx = tx.clone();
            let task_id = id.clone();
            let handle = tokio::spawn(async move {
                let outcome = match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(Error::JobPanicked {
                        id: task_id.clone(),
                        detail: panic_message(panic),
                    }),
                };
                let _ = tx.send(Completion {
                    id: task_id,
                    outcome,
                });
            });
            debug!(job = %id, priority, "job dispatched");
            guard.running.insert(
                id,
                RunningJob {
                    handle,
                    priority,
                    delay,
                    enqueued_at,
                    started_at,
                },
            );
        }
    }

    async fn reap(inner: &Arc<Mutex<SchedulerInner<T>>>, done: Completion<T>) {
        let mut guard = inner.lock().await;
        // A job cancelled after its completion was queued is left cancelled.
        let running = match guard.running.remove(&done.id) {
            Some(r) => r,
            None => return,
        };
        let finished_at = Utc::now();
        let (status, error) = match &done.outcome {
            Ok(_) => {
                debug!(job = %done.id, "job completed");
                (JobStatus::Completed, None)
            }
            Err(e) => {
                warn!(job = %done.id, error = %e, "job failed");
                (JobStatus::Failed, Some(e.to_string()))
            }
        };
        guard.finished.insert(
            done.id.clone(),
            FinishedJob {
                status,
                priority: running.priority,
                delay: running.delay,
                enqueued_at: running.enqueued_at,
                started_at: Some(running.started_at),
                finished_at,
                error,
                outcome: Some(done.outcome),
            },
        );
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
