use crate::clock::{from_millis, to_millis, Clock};
use crate::error::{is_unique_violation_on, OrchestratorError, Result};
use crate::job::JobInput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

pub const DEFAULT_ORGANIZATION: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Workspace {
    pub id: String,
    pub organization_id: String,
    pub owner: String,
    pub name: String,
    pub template_version_id: String,
    /// Worker tags required by this workspace's jobs.
    pub tags: Vec<String>,
    pub latest_build_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateWorkspaceRequest {
    pub name: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    pub template_version_id: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Worker tags the workspace's jobs require.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Queue a `start` build right away. Without it the workspace has no
    /// builds until one is requested or state is pushed.
    #[serde(default = "default_initial_build")]
    pub initial_build: bool,
}

fn default_initial_build() -> bool {
    true
}

impl CreateWorkspaceRequest {
    pub fn new(name: impl Into<String>, template_version_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            organization_id: None,
            template_version_id: template_version_id.into(),
            parameters: BTreeMap::new(),
            tags: Vec::new(),
            initial_build: true,
        }
    }

    pub fn without_initial_build(mut self) -> Self {
        self.initial_build = false;
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn job_input(&self) -> JobInput {
        JobInput {
            template_version_id: self.template_version_id.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkspaceFilters {
    pub owner: Option<String>,
    pub organization_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct WorkspaceStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl WorkspaceStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Insert a workspace. Names are unique per owner and organization.
    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        owner: &str,
        req: &CreateWorkspaceRequest,
    ) -> Result<Workspace> {
        if req.name.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "workspace name must not be empty".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let now = to_millis(self.clock.now());
        let organization_id = req
            .organization_id
            .clone()
            .unwrap_or_else(|| DEFAULT_ORGANIZATION.to_string());

        let inserted = sqlx::query(
            r#"
            INSERT INTO workspaces (id, organization_id, owner, name, template_version_id, tags, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&organization_id)
        .bind(owner)
        .bind(&req.name)
        .bind(&req.template_version_id)
        .bind(serde_json::to_string(&req.tags)?)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await;

        if let Err(e) = inserted {
            if is_unique_violation_on(&e, "workspaces.") {
                return Err(OrchestratorError::InvalidInput(format!(
                    "workspace {} already exists for {}",
                    req.name, owner
                )));
            }
            return Err(e.into());
        }

        Self::fetch(conn, &id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(id))
    }

    /// Get a single workspace by ID
    pub async fn get(&self, id: &str) -> Result<Workspace> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut conn, id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("workspace {}", id)))
    }

    pub(crate) async fn fetch(conn: &mut SqliteConnection, id: &str) -> Result<Option<Workspace>> {
        let row = sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspaces WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.map(Workspace::from))
    }

    pub async fn get_by_name(
        &self,
        owner: &str,
        organization_id: Option<&str>,
        name: &str,
    ) -> Result<Workspace> {
        let organization_id = organization_id.unwrap_or(DEFAULT_ORGANIZATION);

        let row = sqlx::query_as::<_, WorkspaceRow>(
            "SELECT * FROM workspaces WHERE owner = ? AND organization_id = ? AND name = ?",
        )
        .bind(owner)
        .bind(organization_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("workspace {}/{}", owner, name)))?;

        Ok(row.into())
    }

    /// List workspaces with optional filters
    pub async fn list(&self, filters: WorkspaceFilters) -> Result<Vec<Workspace>> {
        let mut query = "SELECT * FROM workspaces WHERE 1=1".to_string();

        if filters.owner.is_some() {
            query.push_str(" AND owner = ?");
        }
        if filters.organization_id.is_some() {
            query.push_str(" AND organization_id = ?");
        }

        query.push_str(" ORDER BY created_at DESC, rowid DESC");

        let mut q = sqlx::query_as::<_, WorkspaceRow>(&query);

        if let Some(owner) = &filters.owner {
            q = q.bind(owner);
        }
        if let Some(organization_id) = &filters.organization_id {
            q = q.bind(organization_id);
        }

        let rows = q.fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(|row| row.into()).collect())
    }

    /// Point the workspace at its newest build.
    pub(crate) async fn set_latest_build(
        &self,
        conn: &mut SqliteConnection,
        workspace_id: &str,
        build_id: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE workspaces SET latest_build_id = ?, updated_at = ? WHERE id = ?")
            .bind(build_id)
            .bind(to_millis(self.clock.now()))
            .bind(workspace_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}

// Internal row type for sqlx
#[derive(sqlx::FromRow)]
struct WorkspaceRow {
    id: String,
    organization_id: String,
    owner: String,
    name: String,
    template_version_id: String,
    tags: String,
    latest_build_id: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl From<WorkspaceRow> for Workspace {
    fn from(row: WorkspaceRow) -> Self {
        Self {
            id: row.id,
            organization_id: row.organization_id,
            owner: row.owner,
            name: row.name,
            template_version_id: row.template_version_id,
            tags: serde_json::from_str(&row.tags).unwrap_or_default(),
            latest_build_id: row.latest_build_id,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        }
    }
}
