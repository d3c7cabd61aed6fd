//! In-process notifications about jobs.
//!
//! Status changes and progress logs fan out over a broadcast channel; the
//! `job_available` notifier wakes workers blocked in `next_job`. Nothing here
//! is a source of truth: subscribers re-read the job store after waking.

use crate::job::{JobLog, JobStatus};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum JobEvent {
    Status { job_id: String, status: JobStatus },
    Log(JobLog),
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Status { job_id, .. } => job_id,
            JobEvent::Log(log) => &log.job_id,
        }
    }
}

#[derive(Clone, Debug)]
pub struct JobEvents {
    tx: broadcast::Sender<JobEvent>,
    job_available: Arc<Notify>,
}

impl JobEvents {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            job_available: Arc::new(Notify::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    pub fn publish_status(&self, job_id: &str, status: JobStatus) {
        // No subscribers is fine.
        let _ = self.tx.send(JobEvent::Status {
            job_id: job_id.to_string(),
            status,
        });
    }

    pub fn publish_log(&self, log: JobLog) {
        let _ = self.tx.send(JobEvent::Log(log));
    }

    pub fn notify_job_available(&self) {
        self.job_available.notify_waiters();
    }

    pub(crate) fn job_available(&self) -> &Notify {
        &self.job_available
    }
}

impl Default for JobEvents {
    fn default() -> Self {
        Self::new()
    }
}
