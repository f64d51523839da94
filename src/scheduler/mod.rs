//! Delayed, prioritized job execution with bounded concurrency.
//!
//! This module runs translation work (or any async job) on a schedule:
//! - Per-job dispatch delay measured from submission time
//! - Priority ordering with FIFO ties among equal priorities
//! - A concurrency cap on simultaneously running jobs
//! - Cancellation of pending and in-flight jobs
//! - Status tracking and result collection per job id

pub mod job;
mod queue;
pub mod runner;

pub use job::{JobSnapshot, JobStatus, JobWork, StatusCounts};
pub use runner::{JobScheduler, SchedulerConfig, SharedJobScheduler};
