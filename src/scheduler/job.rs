//! Job records and their state machine.
//!
//! A job moves `pending -> waiting -> running -> completed | failed |
//! cancelled`. Pending and waiting jobs live in the queue, running jobs in
//! the running set, everything else in the finished map; a job is always in
//! exactly one of the three.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::Result;

/// A unit of work, captured with its arguments at submission time.
/// Invoked once, when the scheduler dispatches the job.
pub type JobWork<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T>> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, dispatch time already reached or not yet examined.
    Pending,
    /// Queued, examined at least once while its delay had not elapsed.
    Waiting,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Waiting => "waiting",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A queued job. `not_before` is anchored to the enqueue instant, never to
/// sibling jobs, so delays measure from `add_job` time.
pub(crate) struct PendingJob<T> {
    pub id: String,
    pub priority: u32,
    /// Monotonic submission counter, breaks priority ties FIFO.
    pub seq: u64,
    pub delay: Duration,
    pub enqueued_at: DateTime<Utc>,
    pub not_before: Instant,
    pub status: JobStatus,
    pub work: JobWork<T>,
}

impl<T> PendingJob<T> {
    /// Queue order: lower priority value first, then submission order.
    pub fn sort_key(&self) -> (u32, u64) {
        (self.priority, self.seq)
    }
}

pub(crate) struct RunningJob {
    pub handle: JoinHandle<()>,
    pub priority: u32,
    pub delay: Duration,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

pub(crate) struct FinishedJob<T> {
    pub status: JobStatus,
    pub priority: u32,
    pub delay: Duration,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
    /// Present until claimed through `take_result`. Cancelled jobs have none.
    pub outcome: Option<Result<T>>,
}

/// Point-in-time view of one job, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    pub priority: u32,
    pub delay_ms: u64,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Jobs per status across the whole scheduler.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub waiting: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.waiting + self.running + self.completed + self.failed + self.cancelled
    }
}
