//! Provisioner job records.
//!
//! The `status` column is the single serialization point for a job: every
//! status change goes through [`JobStore::transition`], a compare-and-swap on
//! the current status. A caller that loses the race gets
//! [`OrchestratorError::StaleTransition`] and nothing is written.

use crate::clock::{from_millis, to_millis, Clock};
use crate::error::{is_unique_violation_on, OrchestratorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled
        )
    }

    /// Forward-only movement along `pending -> running -> terminal`.
    /// A pending job may also end without ever running.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match self {
            JobStatus::Pending => matches!(
                next,
                JobStatus::Running | JobStatus::Canceled | JobStatus::Failed
            ),
            JobStatus::Running => next.is_terminal(),
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Apply,
    Destroy,
    Import,
}

/// Immutable build input handed to the worker. The engine never looks inside.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JobInput {
    pub template_version_id: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProvisionerJob {
    pub id: String,
    pub workspace_id: Option<String>,
    pub job_type: JobType,
    pub input: JobInput,
    pub tags: Vec<String>,
    pub status: JobStatus,
    pub worker_id: Option<String>,
    pub attempts: i64,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ProvisionerJob {
    /// A job can run on a worker advertising every tag the job requires.
    pub fn matches_tags(&self, worker_tags: &BTreeSet<String>) -> bool {
        self.tags.iter().all(|required| worker_tags.contains(required))
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub workspace_id: Option<String>,
    pub job_type: JobType,
    pub input: JobInput,
    pub tags: Vec<String>,
}

/// Extra columns written alongside a status change.
#[derive(Debug, Clone, Default)]
pub struct TransitionUpdate {
    pub worker_id: Option<String>,
    pub error: Option<String>,
}

impl TransitionUpdate {
    pub fn assigned_to(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: Some(worker_id.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            worker_id: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobLog {
    pub id: i64,
    pub job_id: String,
    pub stage: String,
    pub output: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct JobStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl JobStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub async fn create(&self, new: NewJob) -> Result<ProvisionerJob> {
        let mut conn = self.pool.acquire().await?;
        self.insert(&mut conn, new).await
    }

    /// Insert a pending job. Fails with `WorkspaceBusy` when the workspace
    /// already owns a pending or running job; the check is the partial unique
    /// index, so it holds across engine processes sharing the database.
    #[instrument(skip(self, conn, new), fields(workspace_id = ?new.workspace_id, job_type = ?new.job_type))]
    pub async fn insert(&self, conn: &mut SqliteConnection, new: NewJob) -> Result<ProvisionerJob> {
        let id = Uuid::new_v4().to_string();
        let now = to_millis(self.clock.now());

        let inserted = sqlx::query(
            r#"
            INSERT INTO provisioner_jobs (id, workspace_id, job_type, input, tags, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&new.workspace_id)
        .bind(new.job_type)
        .bind(serde_json::to_string(&new.input)?)
        .bind(serde_json::to_string(&new.tags)?)
        .bind(JobStatus::Pending)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await;

        if let Err(e) = inserted {
            if is_unique_violation_on(&e, "provisioner_jobs") {
                return Err(OrchestratorError::WorkspaceBusy(
                    new.workspace_id.unwrap_or_default(),
                ));
            }
            return Err(e.into());
        }

        Self::fetch(conn, &id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(id))
    }

    pub async fn get(&self, id: &str) -> Result<ProvisionerJob> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut conn, id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("job {}", id)))
    }

    pub(crate) async fn fetch(
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<Option<ProvisionerJob>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM provisioner_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        row.map(ProvisionerJob::try_from).transpose()
    }

    pub async fn transition(
        &self,
        id: &str,
        from: JobStatus,
        to: JobStatus,
        update: TransitionUpdate,
    ) -> Result<ProvisionerJob> {
        let mut conn = self.pool.acquire().await?;
        self.transition_with(&mut conn, id, from, to, update).await
    }

    /// Compare-and-swap the job status from `from` to `to`.
    #[instrument(skip(self, conn, update), fields(job_id = %id, %from, %to))]
    pub async fn transition_with(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        from: JobStatus,
        to: JobStatus,
        update: TransitionUpdate,
    ) -> Result<ProvisionerJob> {
        if !from.can_transition_to(to) {
            return Err(OrchestratorError::InvalidState(format!(
                "job {} cannot move from {} to {}",
                id, from, to
            )));
        }
        if (to == JobStatus::Failed) != update.error.is_some() {
            return Err(OrchestratorError::InvalidInput(format!(
                "job {}: an error message is required for failed and only for failed",
                id
            )));
        }

        let now = to_millis(self.clock.now());
        let started_at = (to == JobStatus::Running).then_some(now);
        let attempt_increment = i64::from(to == JobStatus::Running);
        let completed_at = to.is_terminal().then_some(now);

        let result = sqlx::query(
            r#"
            UPDATE provisioner_jobs
            SET status = ?,
                updated_at = ?,
                worker_id = COALESCE(?, worker_id),
                started_at = COALESCE(?, started_at),
                attempts = attempts + ?,
                completed_at = ?,
                error = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to)
        .bind(now)
        .bind(&update.worker_id)
        .bind(started_at)
        .bind(attempt_increment)
        .bind(completed_at)
        .bind(&update.error)
        .bind(id)
        .bind(from)
        .execute(&mut *conn)
        .await?;

        let current = Self::fetch(conn, id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("job {}", id)))?;

        if result.rows_affected() == 0 {
            debug!(actual = %current.status, "lost status compare-and-swap");
            return Err(OrchestratorError::StaleTransition {
                job_id: id.to_string(),
                expected: from,
                actual: current.status,
            });
        }

        Ok(current)
    }

    /// Put a running job back in the queue after its worker disappeared.
    /// Returns false if the job was no longer running.
    pub(crate) async fn requeue_with(&self, conn: &mut SqliteConnection, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE provisioner_jobs
             SET status = ?, worker_id = NULL, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(JobStatus::Pending)
        .bind(to_millis(self.clock.now()))
        .bind(id)
        .bind(JobStatus::Running)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record worker liveness for a running job.
    pub async fn touch(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE provisioner_jobs SET updated_at = ? WHERE id = ? AND status = ?")
            .bind(to_millis(self.clock.now()))
            .bind(id)
            .bind(JobStatus::Running)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Flag a non-terminal job for cancellation. Returns false if it already finished.
    pub async fn request_cancel(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE provisioner_jobs
             SET cancel_requested = 1, updated_at = ?
             WHERE id = ? AND status IN ('pending', 'running')",
        )
        .bind(to_millis(self.clock.now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Pending jobs in enqueue order.
    pub async fn pending(&self) -> Result<Vec<ProvisionerJob>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM provisioner_jobs WHERE status = ? ORDER BY created_at, rowid",
        )
        .bind(JobStatus::Pending)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ProvisionerJob::try_from).collect()
    }

    /// Running jobs whose last heartbeat is older than `before`.
    pub async fn stale_running(&self, before: DateTime<Utc>) -> Result<Vec<ProvisionerJob>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM provisioner_jobs WHERE status = ? AND updated_at < ? ORDER BY created_at, rowid",
        )
        .bind(JobStatus::Running)
        .bind(to_millis(before))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ProvisionerJob::try_from).collect()
    }

    pub(crate) async fn active_for_workspace(
        conn: &mut SqliteConnection,
        workspace_id: &str,
    ) -> Result<Option<ProvisionerJob>> {
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM provisioner_jobs WHERE workspace_id = ? AND status IN ('pending', 'running')",
        )
        .bind(workspace_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(ProvisionerJob::try_from).transpose()
    }

    pub async fn append_log(&self, job_id: &str, stage: &str, output: &str) -> Result<JobLog> {
        let now = to_millis(self.clock.now());

        let result = sqlx::query(
            "INSERT INTO provisioner_job_logs (job_id, stage, output, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(job_id)
        .bind(stage)
        .bind(output)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(JobLog {
            id: result.last_insert_rowid(),
            job_id: job_id.to_string(),
            stage: stage.to_string(),
            output: output.to_string(),
            created_at: from_millis(now),
        })
    }

    pub async fn logs(&self, job_id: &str) -> Result<Vec<JobLog>> {
        let rows = sqlx::query_as::<_, JobLogRow>(
            "SELECT * FROM provisioner_job_logs WHERE job_id = ? ORDER BY id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(JobLog::from).collect())
    }
}

// Internal row types for sqlx
#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    workspace_id: Option<String>,
    job_type: JobType,
    input: String,
    tags: String,
    status: JobStatus,
    worker_id: Option<String>,
    attempts: i64,
    cancel_requested: bool,
    created_at: i64,
    updated_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    error: Option<String>,
}

#[derive(sqlx::FromRow)]
struct JobLogRow {
    id: i64,
    job_id: String,
    stage: String,
    output: String,
    created_at: i64,
}

impl TryFrom<JobRow> for ProvisionerJob {
    type Error = OrchestratorError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            workspace_id: row.workspace_id,
            job_type: row.job_type,
            input: serde_json::from_str(&row.input)?,
            tags: serde_json::from_str(&row.tags)?,
            status: row.status,
            worker_id: row.worker_id,
            attempts: row.attempts,
            cancel_requested: row.cancel_requested,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
            started_at: row.started_at.map(from_millis),
            completed_at: row.completed_at.map(from_millis),
            error: row.error,
        })
    }
}

impl From<JobLogRow> for JobLog {
    fn from(row: JobLogRow) -> Self {
        Self {
            id: row.id,
            job_id: row.job_id,
            stage: row.stage,
            output: row.output,
            created_at: from_millis(row.created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::test_utils::create_test_db;

    fn store(pool: SqlitePool) -> JobStore {
        JobStore::new(pool, Arc::new(SystemClock))
    }

    fn import_job() -> NewJob {
        NewJob {
            workspace_id: None,
            job_type: JobType::Import,
            input: JobInput {
                template_version_id: "tv-1".to_string(),
                parameters: BTreeMap::new(),
            },
            tags: vec!["scope:organization".to_string()],
        }
    }

    #[test]
    fn test_status_transitions_are_forward_only() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Canceled));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Succeeded));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Succeeded));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Pending));
        for terminal in [JobStatus::Succeeded, JobStatus::Failed, JobStatus::Canceled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(JobStatus::Running));
            assert!(!terminal.can_transition_to(JobStatus::Pending));
        }
    }

    #[test]
    fn test_matches_tags_requires_subset() {
        let job = ProvisionerJob {
            id: "j".to_string(),
            workspace_id: None,
            job_type: JobType::Apply,
            input: JobInput::default(),
            tags: vec!["os:linux".to_string(), "arch:amd64".to_string()],
            status: JobStatus::Pending,
            worker_id: None,
            attempts: 0,
            cancel_requested: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        };

        let full: BTreeSet<String> = ["arch:amd64", "os:linux", "gpu"]
            .into_iter()
            .map(String::from)
            .collect();
        let partial: BTreeSet<String> = ["os:linux"].into_iter().map(String::from).collect();

        assert!(job.matches_tags(&full));
        assert!(!job.matches_tags(&partial));
    }

    #[tokio::test]
    async fn test_transition_compare_and_swap() {
        let jobs = store(create_test_db().await);
        let job = jobs.create(import_job()).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);

        let running = jobs
            .transition(
                &job.id,
                JobStatus::Pending,
                JobStatus::Running,
                TransitionUpdate::assigned_to("worker-a"),
            )
            .await
            .unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.worker_id.as_deref(), Some("worker-a"));
        assert_eq!(running.attempts, 1);
        assert!(running.started_at.is_some());

        // A second claim from pending loses the race.
        let err = jobs
            .transition(
                &job.id,
                JobStatus::Pending,
                JobStatus::Running,
                TransitionUpdate::assigned_to("worker-b"),
            )
            .await
            .unwrap_err();
        match err {
            OrchestratorError::StaleTransition {
                expected, actual, ..
            } => {
                assert_eq!(expected, JobStatus::Pending);
                assert_eq!(actual, JobStatus::Running);
            }
            other => panic!("Expected StaleTransition, got {:?}", other),
        }

        let done = jobs
            .transition(
                &job.id,
                JobStatus::Running,
                JobStatus::Succeeded,
                TransitionUpdate::default(),
            )
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.worker_id.as_deref(), Some("worker-a"));
        assert!(done.completed_at.is_some());
        assert!(done.error.is_none());

        // Duplicate terminal report from a flaky worker.
        let err = jobs
            .transition(
                &job.id,
                JobStatus::Running,
                JobStatus::Failed,
                TransitionUpdate::failed("boom"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::StaleTransition { .. }));
        assert_eq!(jobs.get(&job.id).await.unwrap().status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_failed_requires_error_message() {
        let jobs = store(create_test_db().await);
        let job = jobs.create(import_job()).await.unwrap();

        let err = jobs
            .transition(
                &job.id,
                JobStatus::Pending,
                JobStatus::Failed,
                TransitionUpdate::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidInput(_)));

        let failed = jobs
            .transition(
                &job.id,
                JobStatus::Pending,
                JobStatus::Failed,
                TransitionUpdate::failed("template is invalid"),
            )
            .await
            .unwrap();
        assert_eq!(failed.error.as_deref(), Some("template is invalid"));
    }

    #[tokio::test]
    async fn test_transition_unknown_job_is_not_found() {
        let jobs = store(create_test_db().await);
        let err = jobs
            .transition(
                "missing",
                JobStatus::Pending,
                JobStatus::Canceled,
                TransitionUpdate::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_pending_is_fifo() {
        let jobs = store(create_test_db().await);
        let first = jobs.create(import_job()).await.unwrap();
        let second = jobs.create(import_job()).await.unwrap();
        let third = jobs.create(import_job()).await.unwrap();

        let ids: Vec<String> = jobs
            .pending()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();

        assert_eq!(ids, vec![first.id, second.id, third.id]);
    }

    #[tokio::test]
    async fn test_job_logs_are_ordered() {
        let jobs = store(create_test_db().await);
        let job = jobs.create(import_job()).await.unwrap();

        jobs.append_log(&job.id, "init", "initializing").await.unwrap();
        jobs.append_log(&job.id, "apply", "creating resources").await.unwrap();

        let logs = jobs.logs(&job.id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].stage, "init");
        assert_eq!(logs[1].output, "creating resources");
    }
}
