//! Job dispatch: enqueueing, worker reports and cancellation.
//!
//! A successful job and its state artifact commit in one transaction, and the
//! worker is only acknowledged afterwards. If the engine dies before the
//! commit the job is still `running`, so worker-loss recovery requeues it
//! instead of losing the state.

use crate::artifact::ArtifactStore;
use crate::build::BuildStore;
use crate::clock::Clock;
use crate::config::OrchestratorConfig;
use crate::db;
use crate::error::{OrchestratorError, Result};
use crate::events::JobEvents;
use crate::job::{JobStatus, JobStore, NewJob, ProvisionerJob, TransitionUpdate};
use crate::protocol::{ReportAck, WorkerMessage};
use crate::sessions::{LostJobOutcome, WorkerSessionManager};
use chrono::Duration as ChronoDuration;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of one reaper pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub heartbeats: usize,
    pub requeued: usize,
    pub failed: usize,
    pub canceled: usize,
}

#[derive(Clone, Debug)]
pub struct Scheduler {
    pool: SqlitePool,
    jobs: JobStore,
    artifacts: ArtifactStore,
    sessions: WorkerSessionManager,
    events: JobEvents,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
}

impl Scheduler {
    pub fn new(
        pool: SqlitePool,
        jobs: JobStore,
        artifacts: ArtifactStore,
        sessions: WorkerSessionManager,
        events: JobEvents,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            pool,
            jobs,
            artifacts,
            sessions,
            events,
            clock,
            config,
        }
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn sessions(&self) -> &WorkerSessionManager {
        &self.sessions
    }

    pub fn events(&self) -> &JobEvents {
        &self.events
    }

    /// Queue a job. Fails with `WorkspaceBusy` if the job's workspace already
    /// has a pending or running job.
    pub async fn enqueue(&self, new: NewJob) -> Result<ProvisionerJob> {
        let mut conn = self.pool.acquire().await?;
        let job = self.enqueue_with(&mut conn, new).await?;
        drop(conn);
        self.announce(&job);
        Ok(job)
    }

    /// Insert the job inside the caller's transaction. Call [`Scheduler::announce`]
    /// after committing.
    pub async fn enqueue_with(
        &self,
        conn: &mut SqliteConnection,
        new: NewJob,
    ) -> Result<ProvisionerJob> {
        self.jobs.insert(conn, new).await
    }

    /// Wake workers for a newly committed job.
    pub fn announce(&self, job: &ProvisionerJob) {
        info!(job_id = %job.id, job_type = ?job.job_type, tags = ?job.tags, "job enqueued");
        self.events.publish_status(&job.id, job.status);
        self.events.notify_job_available();
    }

    /// Handle one message from the worker session holding `job_id`.
    #[instrument(skip(self, message), fields(kind = message_kind(&message)))]
    pub async fn report(
        &self,
        session_id: &str,
        job_id: &str,
        message: WorkerMessage,
    ) -> Result<ReportAck> {
        let job = self.jobs.get(job_id).await?;

        if job.status.is_terminal() {
            debug!(status = %job.status, "report for finished job ignored");
            self.sessions.registry().finish_job(session_id, job_id);
            return Ok(ReportAck::AlreadyCompleted(job.status));
        }
        if job.status != JobStatus::Running || job.worker_id.as_deref() != Some(session_id) {
            return Err(OrchestratorError::InvalidState(format!(
                "job {} is not running on worker session {}",
                job_id, session_id
            )));
        }

        let ack = match message {
            WorkerMessage::Progress { stage, output } => {
                self.jobs.touch(job_id).await?;
                let log = self.jobs.append_log(job_id, &stage, &output).await?;
                self.events.publish_log(log);
                return Ok(ReportAck::Progress);
            }
            WorkerMessage::Succeeded { state } => self.commit_success(job_id, &state).await?,
            WorkerMessage::Failed { error } => {
                self.finish(job_id, JobStatus::Failed, TransitionUpdate::failed(error))
                    .await?
            }
            WorkerMessage::Canceled => {
                self.finish(job_id, JobStatus::Canceled, TransitionUpdate::default())
                    .await?
            }
        };

        self.sessions.registry().finish_job(session_id, job_id);
        Ok(ack)
    }

    async fn commit_success(&self, job_id: &str, state: &[u8]) -> Result<ReportAck> {
        let mut tx = db::begin_immediate(&self.pool).await?;

        if let Some(build) = BuildStore::fetch_by_job(&mut *tx, job_id).await? {
            self.artifacts.put_with(&mut *tx, &build.id, state).await?;
        }

        match self
            .jobs
            .transition_with(
                &mut *tx,
                job_id,
                JobStatus::Running,
                JobStatus::Succeeded,
                TransitionUpdate::default(),
            )
            .await
        {
            Ok(_) => {}
            Err(OrchestratorError::StaleTransition { actual, .. }) => {
                // Dropping the transaction discards the artifact write.
                debug!(%actual, "success report lost the race");
                return Ok(ReportAck::AlreadyCompleted(actual));
            }
            Err(e) => return Err(e),
        }

        tx.commit().await?;

        info!(job_id, bytes = state.len(), "job succeeded, state stored");
        self.events.publish_status(job_id, JobStatus::Succeeded);
        Ok(ReportAck::CommitAccepted)
    }

    async fn finish(
        &self,
        job_id: &str,
        to: JobStatus,
        update: TransitionUpdate,
    ) -> Result<ReportAck> {
        match self
            .jobs
            .transition(job_id, JobStatus::Running, to, update)
            .await
        {
            Ok(job) => {
                info!(job_id, status = %to, error = ?job.error, "job finished");
                self.events.publish_status(job_id, to);
                Ok(ReportAck::CommitAccepted)
            }
            Err(OrchestratorError::StaleTransition { actual, .. }) => {
                debug!(job_id, %actual, "terminal report lost the race");
                Ok(ReportAck::AlreadyCompleted(actual))
            }
            Err(e) => Err(e),
        }
    }

    /// Cancel a job. A pending job is canceled on the spot; a running job is
    /// flagged and its worker signalled, and becomes `canceled` when the
    /// worker acknowledges or its session is lost.
    #[instrument(skip(self))]
    pub async fn cancel(&self, job_id: &str) -> Result<ProvisionerJob> {
        let job = self.jobs.get(job_id).await?;

        if job.status == JobStatus::Pending {
            match self
                .jobs
                .transition(
                    job_id,
                    JobStatus::Pending,
                    JobStatus::Canceled,
                    TransitionUpdate::default(),
                )
                .await
            {
                Ok(canceled) => {
                    info!("pending job canceled");
                    self.events.publish_status(job_id, JobStatus::Canceled);
                    return Ok(canceled);
                }
                // Claimed by a worker in the meantime; cancel it as running.
                Err(OrchestratorError::StaleTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let job = self.jobs.get(job_id).await?;
        if job.status != JobStatus::Running {
            return Ok(job);
        }

        if self.jobs.request_cancel(job_id).await? {
            match job.worker_id.as_deref() {
                Some(worker) if self.sessions.registry().signal_cancel(worker, job_id) => {
                    info!(worker, "cancel signalled to worker");
                }
                // The owning engine forwards the flag on its next heartbeat;
                // if that engine is gone the reaper resolves the job as canceled.
                _ => debug!("worker session not local, cancel recorded"),
            }
        }

        self.jobs.get(job_id).await
    }

    /// Refresh heartbeats of locally held jobs, then resolve running jobs
    /// whose heartbeat lapsed as worker-lost.
    pub async fn reap(&self) -> Result<ReapReport> {
        let mut report = ReapReport {
            heartbeats: self.sessions.heartbeat().await?,
            ..Default::default()
        };

        let timeout = ChronoDuration::from_std(self.config.stale_job_timeout)
            .unwrap_or_else(|_| ChronoDuration::seconds(300));
        let cutoff = self.clock.now() - timeout;

        for job in self.jobs.stale_running(cutoff).await? {
            let local = job
                .worker_id
                .as_deref()
                .is_some_and(|w| self.sessions.registry().holds(w, &job.id));
            if local {
                continue;
            }

            let outcome = self
                .sessions
                .recover_lost_job(&job, "worker heartbeat timed out")
                .await?;
            match outcome {
                LostJobOutcome::Requeued => report.requeued += 1,
                LostJobOutcome::Failed => report.failed += 1,
                LostJobOutcome::Canceled => report.canceled += 1,
                LostJobOutcome::Untouched => {}
            }
        }

        if report.requeued + report.failed + report.canceled > 0 {
            warn!(?report, "reaped stale jobs");
        }

        Ok(report)
    }
}

fn message_kind(message: &WorkerMessage) -> &'static str {
    match message {
        WorkerMessage::Progress { .. } => "progress",
        WorkerMessage::Succeeded { .. } => "succeeded",
        WorkerMessage::Failed { .. } => "failed",
        WorkerMessage::Canceled => "canceled",
    }
}
