//! In-process provisioner daemon.
//!
//! Drives a [`Provisioner`] through the worker protocol: register a session,
//! wait for a job, stream progress, send exactly one terminal message, and
//! unregister on shutdown.

use crate::error::{OrchestratorError, Result};
use crate::protocol::{AcquiredJob, ReportAck, WorkerMessage};
use crate::scheduler::Scheduler;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Executes the provisioning logic of one job.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Run `job` and return the resulting state blob. An error fails the job
    /// with its message.
    async fn provision(&self, job: &AcquiredJob, progress: &ProgressSink) -> anyhow::Result<Vec<u8>>;
}

/// Forwards progress of the running job to the scheduler.
#[derive(Clone, Debug)]
pub struct ProgressSink {
    scheduler: Scheduler,
    session_id: String,
    job_id: String,
}

impl ProgressSink {
    pub async fn send(&self, stage: &str, output: &str) -> Result<()> {
        self.scheduler
            .report(
                &self.session_id,
                &self.job_id,
                WorkerMessage::Progress {
                    stage: stage.to_string(),
                    output: output.to_string(),
                },
            )
            .await?;
        Ok(())
    }
}

pub struct ProvisionerDaemon {
    scheduler: Scheduler,
    provisioner: Arc<dyn Provisioner>,
    name: String,
    tags: BTreeSet<String>,
}

impl ProvisionerDaemon {
    pub fn new(
        scheduler: Scheduler,
        provisioner: Arc<dyn Provisioner>,
        name: impl Into<String>,
        tags: BTreeSet<String>,
    ) -> Self {
        Self {
            scheduler,
            provisioner,
            name: name.into(),
            tags,
        }
    }

    /// Register the session and start serving jobs in the background.
    pub fn spawn(self) -> DaemonHandle {
        let session = self.scheduler.sessions().register(&self.name, self.tags.clone());
        let session_id = session.id.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(self.run(session.id, shutdown_rx));

        DaemonHandle {
            session_id,
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(self, session_id: String, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %self.name, session_id = %session_id, "provisioner daemon started");

        loop {
            let next = tokio::select! {
                next = self.scheduler.sessions().next_job(&session_id) => next,
                _ = shutdown.wait_for(|stop| *stop) => break,
            };

            match next {
                Ok(Some(job)) => {
                    let job_id = job.job.id.clone();
                    if let Err(e) = self.execute(&session_id, job, &mut shutdown).await {
                        error!(worker = %self.name, job_id = %job_id, error = %e, "failed to report job result");
                        self.release(&session_id, &job_id, &e).await;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(worker = %self.name, error = %e, "failed to acquire job");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        match self.scheduler.sessions().unregister(&session_id).await {
            Ok(Some(outcome)) => warn!(worker = %self.name, ?outcome, "daemon stopped mid-job"),
            Ok(None) => {}
            Err(e) => error!(worker = %self.name, error = %e, "failed to unregister worker session"),
        }
        info!(worker = %self.name, "provisioner daemon stopped");
    }

    // A session still holding the job can acquire nothing else.
    async fn release(&self, session_id: &str, job_id: &str, cause: &OrchestratorError) {
        let reason = format!("result could not be recorded: {}", cause);
        match self
            .scheduler
            .sessions()
            .release_job(session_id, job_id, &reason)
            .await
        {
            Ok(outcome) => warn!(worker = %self.name, job_id, ?outcome, "released job after failed report"),
            Err(e) => error!(worker = %self.name, job_id, error = %e, "failed to release job, leaving it to the reaper"),
        }
    }

    async fn execute(
        &self,
        session_id: &str,
        job: AcquiredJob,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let job_id = job.job.id.clone();
        let mut cancel = self
            .scheduler
            .sessions()
            .registry()
            .cancel_signal(session_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("worker session {}", session_id)))?;

        let sink = ProgressSink {
            scheduler: self.scheduler.clone(),
            session_id: session_id.to_string(),
            job_id: job_id.clone(),
        };

        let message = tokio::select! {
            result = self.provisioner.provision(&job, &sink) => match result {
                Ok(state) => WorkerMessage::Succeeded { state },
                Err(e) => WorkerMessage::Failed { error: format!("{:#}", e) },
            },
            _ = cancel.wait_for(|c| c.as_deref() == Some(job_id.as_str())) => {
                info!(job_id = %job_id, "job canceled by request");
                WorkerMessage::Canceled
            }
            // Leave the job running; unregistering hands it back to the queue.
            _ = shutdown.wait_for(|stop| *stop) => return Ok(()),
        };

        match self.scheduler.report(session_id, &job_id, message).await? {
            ReportAck::AlreadyCompleted(status) => {
                debug!(job_id = %job_id, %status, "job was already finished")
            }
            ack => debug!(job_id = %job_id, ?ack, "job result committed"),
        }
        Ok(())
    }
}

pub struct DaemonHandle {
    session_id: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DaemonHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Stop the daemon and wait for it to unregister. A job still running is
    /// returned to the queue.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "provisioner daemon task panicked");
        }
    }
}
