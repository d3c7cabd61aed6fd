//! Worker session management: registration, job hand-out and worker loss.

use crate::build::BuildStore;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::events::JobEvents;
use crate::job::{JobStatus, JobStore, ProvisionerJob, TransitionUpdate};
use crate::protocol::AcquiredJob;
use crate::registry::{WorkerRegistry, WorkerSession};
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use tracing::{debug, info, instrument, warn};

/// What happened to a job whose worker went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LostJobOutcome {
    Requeued,
    Failed,
    Canceled,
    /// The job had already moved on; nothing was changed.
    Untouched,
}

#[derive(Clone, Debug)]
pub struct WorkerSessionManager {
    pool: SqlitePool,
    jobs: JobStore,
    registry: WorkerRegistry,
    events: JobEvents,
    config: OrchestratorConfig,
}

impl WorkerSessionManager {
    pub fn new(
        pool: SqlitePool,
        jobs: JobStore,
        registry: WorkerRegistry,
        events: JobEvents,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            pool,
            jobs,
            registry,
            events,
            config,
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn register(&self, name: &str, tags: BTreeSet<String>) -> WorkerSession {
        let session = self.registry.register(name, tags);
        info!(session_id = %session.id, worker = %name, tags = ?session.tags, "worker connected");
        session
    }

    /// Drop a session. A job it was running is requeued, or failed once its
    /// attempt budget is spent, or canceled if cancellation was requested.
    #[instrument(skip(self))]
    pub async fn unregister(&self, session_id: &str) -> Result<Option<LostJobOutcome>> {
        let Some(session) = self.registry.remove(session_id) else {
            return Ok(None);
        };
        info!(worker = %session.name, "worker disconnected");

        match session.current_job_id {
            Some(job_id) => {
                let job = self.jobs.get(&job_id).await?;
                if job.worker_id.as_deref() != Some(session_id) {
                    return Ok(Some(LostJobOutcome::Untouched));
                }
                let outcome = self
                    .recover_lost_job(&job, &format!("worker {} disconnected", session.name))
                    .await?;
                Ok(Some(outcome))
            }
            None => Ok(None),
        }
    }

    /// Resolve a running job whose worker is gone.
    pub async fn recover_lost_job(
        &self,
        job: &ProvisionerJob,
        reason: &str,
    ) -> Result<LostJobOutcome> {
        if job.status != JobStatus::Running {
            return Ok(LostJobOutcome::Untouched);
        }

        let (to, update, outcome) = if job.cancel_requested {
            (JobStatus::Canceled, TransitionUpdate::default(), LostJobOutcome::Canceled)
        } else if job.attempts >= self.config.max_job_attempts {
            let lost = OrchestratorError::WorkerLost(job.id.clone());
            (
                JobStatus::Failed,
                TransitionUpdate::failed(format!("{} after {} attempts: {}", lost, job.attempts, reason)),
                LostJobOutcome::Failed,
            )
        } else {
            let mut conn = self.pool.acquire().await?;
            if !self.jobs.requeue_with(&mut conn, &job.id).await? {
                debug!(job_id = %job.id, "job finished before it could be requeued");
                return Ok(LostJobOutcome::Untouched);
            }
            drop(conn);
            warn!(job_id = %job.id, attempts = job.attempts, %reason, "requeued job after worker loss");
            self.events.publish_status(&job.id, JobStatus::Pending);
            self.events.notify_job_available();
            return Ok(LostJobOutcome::Requeued);
        };

        match self
            .jobs
            .transition(&job.id, JobStatus::Running, to, update)
            .await
        {
            Ok(_) => {
                warn!(job_id = %job.id, status = %to, %reason, "worker lost");
                self.events.publish_status(&job.id, to);
                Ok(outcome)
            }
            Err(OrchestratorError::StaleTransition { actual, .. }) => {
                debug!(job_id = %job.id, %actual, "lost job already resolved");
                Ok(LostJobOutcome::Untouched)
            }
            Err(e) => Err(e),
        }
    }

    /// Claim the oldest pending job this session can run, without waiting.
    #[instrument(skip(self))]
    pub async fn try_next_job(&self, session_id: &str) -> Result<Option<AcquiredJob>> {
        let session = self
            .registry
            .get(session_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("worker session {}", session_id)))?;

        if let Some(current) = &session.current_job_id {
            return Err(OrchestratorError::InvalidState(format!(
                "worker session {} is still running job {}",
                session_id, current
            )));
        }

        let candidates = self.jobs.pending().await?;
        for job in candidates.iter().filter(|j| j.matches_tags(&session.tags)) {
            let claimed = match self
                .jobs
                .transition(
                    &job.id,
                    JobStatus::Pending,
                    JobStatus::Running,
                    TransitionUpdate::assigned_to(session_id),
                )
                .await
            {
                Ok(claimed) => claimed,
                Err(OrchestratorError::StaleTransition { .. }) => continue,
                Err(e) => return Err(e),
            };

            if !self
                .registry
                .set_current_job(session_id, Some(claimed.id.clone()))
            {
                // Disconnected between the claim and now.
                self.recover_lost_job(&claimed, "worker disconnected while acquiring")
                    .await?;
                return Ok(None);
            }

            info!(job_id = %claimed.id, attempt = claimed.attempts, "job acquired");
            self.events.publish_status(&claimed.id, JobStatus::Running);

            return self.describe(claimed).await.map(Some);
        }

        Ok(None)
    }

    /// Wait until a job this session can run is available and claim it.
    /// Returns `None` once the session is closed.
    pub async fn next_job(&self, session_id: &str) -> Result<Option<AcquiredJob>> {
        let mut closed = self
            .registry
            .closed_signal(session_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("worker session {}", session_id)))?;

        loop {
            let notified = self.events.job_available().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if *closed.borrow() {
                return Ok(None);
            }

            match self.try_next_job(session_id).await {
                Ok(Some(job)) => return Ok(Some(job)),
                Ok(None) => {}
                Err(OrchestratorError::NotFound(_)) => return Ok(None),
                Err(e) => return Err(e),
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = closed.wait_for(|c| *c) => return Ok(None),
            }
        }
    }

    async fn describe(&self, job: ProvisionerJob) -> Result<AcquiredJob> {
        let mut conn = self.pool.acquire().await?;
        let build = BuildStore::fetch_by_job(&mut conn, &job.id).await?;
        let prior_state = match &build {
            Some(build) => {
                BuildStore::prior_state(&mut conn, &build.workspace_id, build.build_number).await?
            }
            None => None,
        };

        Ok(AcquiredJob {
            job,
            build,
            prior_state,
        })
    }

    /// Keep jobs held by live local sessions from looking abandoned.
    ///
    /// A cancel may have been recorded by another engine process that could
    /// not reach the worker, so the flag is re-read and forwarded here.
    pub async fn heartbeat(&self) -> Result<usize> {
        let mut touched = 0;
        for session in self.registry.list() {
            let Some(job_id) = session.current_job_id else {
                continue;
            };
            self.jobs.touch(&job_id).await?;
            touched += 1;

            let job = self.jobs.get(&job_id).await?;
            if job.cancel_requested && job.status == JobStatus::Running {
                debug!(job_id = %job_id, session_id = %session.id, "forwarding recorded cancel");
                self.registry.signal_cancel(&session.id, &job_id);
            }
        }
        Ok(touched)
    }

    /// Give up a job whose result this session failed to record. The slot is
    /// freed for new work and the job is resolved as if its worker were lost.
    #[instrument(skip(self))]
    pub async fn release_job(
        &self,
        session_id: &str,
        job_id: &str,
        reason: &str,
    ) -> Result<LostJobOutcome> {
        self.registry.finish_job(session_id, job_id);

        let job = self.jobs.get(job_id).await?;
        if job.worker_id.as_deref() != Some(session_id) {
            return Ok(LostJobOutcome::Untouched);
        }
        self.recover_lost_job(&job, reason).await
    }
}
