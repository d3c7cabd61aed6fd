use crate::clock::{from_millis, to_millis, Clock};
use crate::error::{is_unique_violation_on, OrchestratorError, Result};
use crate::job::{JobStatus, JobType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BuildTransition {
    Start,
    Stop,
    Delete,
}

impl BuildTransition {
    /// Job type a worker runs to carry out this transition.
    pub fn job_type(self) -> JobType {
        match self {
            BuildTransition::Start | BuildTransition::Stop => JobType::Apply,
            BuildTransition::Delete => JobType::Destroy,
        }
    }
}

impl fmt::Display for BuildTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BuildTransition::Start => "start",
            BuildTransition::Stop => "stop",
            BuildTransition::Delete => "delete",
        })
    }
}

impl FromStr for BuildTransition {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(BuildTransition::Start),
            "stop" => Ok(BuildTransition::Stop),
            "delete" => Ok(BuildTransition::Delete),
            other => Err(OrchestratorError::InvalidInput(format!(
                "unknown transition '{}', expected start, stop or delete",
                other
            ))),
        }
    }
}

/// One numbered attempt to move a workspace to `transition`.
///
/// `status` mirrors the build's job. Builds without a job carry pushed state
/// and are succeeded from the moment they exist.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkspaceBuild {
    pub id: String,
    pub workspace_id: String,
    pub build_number: i64,
    pub transition: BuildTransition,
    pub job_id: Option<String>,
    pub initiator: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub(crate) struct NewBuild<'a> {
    pub workspace_id: &'a str,
    pub build_number: i64,
    pub transition: BuildTransition,
    pub job_id: Option<&'a str>,
    pub initiator: &'a str,
}

const SELECT_BUILD: &str = r#"
    SELECT b.id, b.workspace_id, b.build_number, b.transition, b.job_id, b.initiator, b.created_at,
           COALESCE(j.status, 'succeeded') AS status
    FROM workspace_builds b
    LEFT JOIN provisioner_jobs j ON j.id = b.job_id
"#;

#[derive(Clone, Debug)]
pub struct BuildStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl BuildStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Build numbers start at 1 and have no gaps.
    pub(crate) async fn next_build_number(
        conn: &mut SqliteConnection,
        workspace_id: &str,
    ) -> Result<i64> {
        let (max,): (Option<i64>,) =
            sqlx::query_as("SELECT MAX(build_number) FROM workspace_builds WHERE workspace_id = ?")
                .bind(workspace_id)
                .fetch_one(&mut *conn)
                .await?;

        Ok(max.unwrap_or(0) + 1)
    }

    pub(crate) async fn insert(
        &self,
        conn: &mut SqliteConnection,
        new: NewBuild<'_>,
    ) -> Result<WorkspaceBuild> {
        let id = Uuid::new_v4().to_string();

        let inserted = sqlx::query(
            r#"
            INSERT INTO workspace_builds (id, workspace_id, build_number, transition, job_id, initiator, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(new.workspace_id)
        .bind(new.build_number)
        .bind(new.transition)
        .bind(new.job_id)
        .bind(new.initiator)
        .bind(to_millis(self.clock.now()))
        .execute(&mut *conn)
        .await;

        if let Err(e) = inserted {
            // Another engine instance allocated this number first.
            if is_unique_violation_on(&e, "workspace_builds") {
                return Err(OrchestratorError::WorkspaceBusy(new.workspace_id.to_string()));
            }
            return Err(e.into());
        }

        Self::fetch(conn, &id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(id))
    }

    pub async fn get(&self, id: &str) -> Result<WorkspaceBuild> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut conn, id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("build {}", id)))
    }

    pub(crate) async fn fetch(
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<Option<WorkspaceBuild>> {
        let row = sqlx::query_as::<_, BuildRow>(&format!("{} WHERE b.id = ?", SELECT_BUILD))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.map(WorkspaceBuild::from))
    }

    pub async fn get_by_number(&self, workspace_id: &str, build_number: i64) -> Result<WorkspaceBuild> {
        let row = sqlx::query_as::<_, BuildRow>(&format!(
            "{} WHERE b.workspace_id = ? AND b.build_number = ?",
            SELECT_BUILD
        ))
        .bind(workspace_id)
        .bind(build_number)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            OrchestratorError::NotFound(format!("build #{} of workspace {}", build_number, workspace_id))
        })?;

        Ok(row.into())
    }

    pub(crate) async fn fetch_by_job(
        conn: &mut SqliteConnection,
        job_id: &str,
    ) -> Result<Option<WorkspaceBuild>> {
        let row = sqlx::query_as::<_, BuildRow>(&format!("{} WHERE b.job_id = ?", SELECT_BUILD))
            .bind(job_id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.map(WorkspaceBuild::from))
    }

    pub async fn get_by_job(&self, job_id: &str) -> Result<Option<WorkspaceBuild>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_by_job(&mut conn, job_id).await
    }

    /// Builds of a workspace, newest first.
    pub async fn list(&self, workspace_id: &str) -> Result<Vec<WorkspaceBuild>> {
        let rows = sqlx::query_as::<_, BuildRow>(&format!(
            "{} WHERE b.workspace_id = ? ORDER BY b.build_number DESC",
            SELECT_BUILD
        ))
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(WorkspaceBuild::from).collect())
    }

    /// State of the newest build before `build_number` that stored one.
    pub(crate) async fn prior_state(
        conn: &mut SqliteConnection,
        workspace_id: &str,
        build_number: i64,
    ) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            r#"
            SELECT a.state
            FROM workspace_builds b
            JOIN state_artifacts a ON a.build_id = b.id
            WHERE b.workspace_id = ? AND b.build_number < ?
            ORDER BY b.build_number DESC
            LIMIT 1
            "#,
        )
        .bind(workspace_id)
        .bind(build_number)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(|(state,)| state))
    }
}

// Internal row type for sqlx
#[derive(sqlx::FromRow)]
struct BuildRow {
    id: String,
    workspace_id: String,
    build_number: i64,
    transition: BuildTransition,
    job_id: Option<String>,
    initiator: String,
    created_at: i64,
    status: JobStatus,
}

impl From<BuildRow> for WorkspaceBuild {
    fn from(row: BuildRow) -> Self {
        Self {
            id: row.id,
            workspace_id: row.workspace_id,
            build_number: row.build_number,
            transition: row.transition,
            job_id: row.job_id,
            initiator: row.initiator,
            status: row.status,
            created_at: from_millis(row.created_at),
        }
    }
}
