//! Priority-ordered pending queue with per-job dispatch times.
//!
//! Jobs are held sorted by `(priority, seq)`: lower priority value dequeues
//! first, equal priorities keep submission order. A sorted `Vec` instead of a
//! heap because the ready-scan has to step over jobs whose delay has not
//! elapsed without disturbing their order.

use tokio::time::Instant;

use crate::scheduler::job::{JobStatus, PendingJob};

pub(crate) struct PendingQueue<T> {
    jobs: Vec<PendingJob<T>>,
}

impl<T> PendingQueue<T> {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    pub fn insert(&mut self, job: PendingJob<T>) {
        let key = job.sort_key();
        let pos = self.jobs.partition_point(|j| j.sort_key() <= key);
        self.jobs.insert(pos, job);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs.iter().any(|j| j.id == id)
    }

    pub fn remove(&mut self, id: &str) -> Option<PendingJob<T>> {
        let idx = self.jobs.iter().position(|j| j.id == id)?;
        Some(self.jobs.remove(idx))
    }

    /// Take up to `budget` jobs whose dispatch time has arrived, in queue
    /// order. Jobs examined before their time are marked waiting and stay
    /// put; jobs behind them can still be taken this pass.
    pub fn take_ready(&mut self, now: Instant, budget: usize) -> Vec<PendingJob<T>> {
        let mut ready = Vec::new();
        let mut i = 0;
        while i < self.jobs.len() && ready.len() < budget {
            if self.jobs[i].not_before <= now {
                ready.push(self.jobs.remove(i));
            } else {
                self.jobs[i].status = JobStatus::Waiting;
                i += 1;
            }
        }
        ready
    }

    /// Remove and return everything, for shutdown.
    pub fn drain(&mut self) -> Vec<PendingJob<T>> {
        std::mem::take(&mut self.jobs)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingJob<T>> {
        self.jobs.iter()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
