//! Blocking until a job reaches a terminal status.

use crate::error::{OrchestratorError, Result};
use crate::events::{JobEvent, JobEvents};
use crate::job::{JobStore, ProvisionerJob};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct CompletionWaiter {
    jobs: JobStore,
    events: JobEvents,
    poll_interval: Duration,
}

impl CompletionWaiter {
    pub fn new(jobs: JobStore, events: JobEvents, poll_interval: Duration) -> Self {
        Self {
            jobs,
            events,
            poll_interval,
        }
    }

    /// Wait until `job_id` is succeeded, failed or canceled and return its
    /// final record. Running out of time yields `DeadlineExceeded` and leaves
    /// the job alone.
    ///
    /// Local status events wake the waiter early; the periodic re-read covers
    /// transitions committed by other engine processes.
    pub async fn await_terminal(&self, job_id: &str, timeout: Duration) -> Result<ProvisionerJob> {
        let deadline = Instant::now() + timeout;
        // Subscribe before the first read so no transition slips between them.
        let mut rx = self.events.subscribe();

        loop {
            let job = self.jobs.get(job_id).await?;
            if job.status.is_terminal() {
                return Ok(job);
            }

            let woke = tokio::time::timeout_at(deadline, async {
                tokio::select! {
                    event = wait_for_status(&mut rx, job_id) => event,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            })
            .await;

            if woke.is_err() {
                // One last look: the job may have finished right at the deadline.
                let job = self.jobs.get(job_id).await?;
                if job.status.is_terminal() {
                    return Ok(job);
                }
                debug!(job_id, status = %job.status, "gave up waiting for job");
                return Err(OrchestratorError::DeadlineExceeded(job_id.to_string()));
            }
        }
    }
}

/// Resolves on the next status event for `job_id`, or when events were
/// dropped and the caller should re-read.
async fn wait_for_status(rx: &mut tokio::sync::broadcast::Receiver<JobEvent>, job_id: &str) {
    loop {
        match rx.recv().await {
            Ok(JobEvent::Status { job_id: id, status }) if id == job_id && status.is_terminal() => {
                return;
            }
            Ok(_) => continue,
            Err(RecvError::Lagged(_)) => return,
            // Sender gone; fall back to polling.
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
