//! Entry point for build-triggering operations.
//!
//! Every method consults the permission gate before any write, so a denied
//! call has no side effects. Builds that run a job go through the
//! scheduler; pushed state short-circuits to a finished build in the same
//! transaction that stores the blob.

use crate::artifact::ArtifactStore;
use crate::build::{BuildStore, BuildTransition, NewBuild, WorkspaceBuild};
use crate::clock::{Clock, SystemClock};
use crate::config::OrchestratorConfig;
use crate::db;
use crate::error::{OrchestratorError, Result};
use crate::events::JobEvents;
use crate::job::{JobInput, JobLog, JobStore, NewJob, ProvisionerJob};
use crate::permission::{authorize, Action, Actor, PermissionGate, Resource};
use crate::registry::WorkerRegistry;
use crate::scheduler::Scheduler;
use crate::sessions::WorkerSessionManager;
use crate::waiter::CompletionWaiter;
use crate::workspace::{CreateWorkspaceRequest, Workspace, WorkspaceFilters, WorkspaceStore};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateBuildRequest {
    pub transition: BuildTransition,
    /// Defaults to the workspace's current template version.
    #[serde(default)]
    pub template_version_id: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl CreateBuildRequest {
    pub fn new(transition: BuildTransition) -> Self {
        Self {
            transition,
            template_version_id: None,
            parameters: BTreeMap::new(),
        }
    }
}

/// A new workspace together with its first build, if one was queued.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreatedWorkspace {
    pub workspace: Workspace,
    pub build: Option<WorkspaceBuild>,
}

#[derive(Clone)]
pub struct BuildOrchestrator {
    pool: SqlitePool,
    gate: Arc<dyn PermissionGate>,
    workspaces: WorkspaceStore,
    builds: BuildStore,
    artifacts: ArtifactStore,
    scheduler: Scheduler,
    waiter: CompletionWaiter,
}

impl BuildOrchestrator {
    pub fn new(pool: SqlitePool, gate: Arc<dyn PermissionGate>) -> Self {
        Self::with_config(pool, gate, Arc::new(SystemClock), OrchestratorConfig::default())
    }

    pub fn with_config(
        pool: SqlitePool,
        gate: Arc<dyn PermissionGate>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        let events = JobEvents::new();
        let jobs = JobStore::new(pool.clone(), clock.clone());
        let artifacts = ArtifactStore::new(pool.clone(), clock.clone());
        let sessions = WorkerSessionManager::new(
            pool.clone(),
            jobs.clone(),
            WorkerRegistry::new(clock.clone()),
            events.clone(),
            config.clone(),
        );
        let waiter = CompletionWaiter::new(jobs.clone(), events.clone(), config.poll_interval);
        let scheduler = Scheduler::new(
            pool.clone(),
            jobs,
            artifacts.clone(),
            sessions,
            events,
            clock.clone(),
            config,
        );

        Self {
            workspaces: WorkspaceStore::new(pool.clone(), clock.clone()),
            builds: BuildStore::new(pool.clone(), clock),
            pool,
            gate,
            artifacts,
            scheduler,
            waiter,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn sessions(&self) -> &WorkerSessionManager {
        self.scheduler.sessions()
    }

    pub fn waiter(&self) -> &CompletionWaiter {
        &self.waiter
    }

    pub fn events(&self) -> &JobEvents {
        self.scheduler.events()
    }

    fn check(&self, actor: &Actor, action: Action, resource: &Resource) -> Result<()> {
        authorize(self.gate.as_ref(), actor, action, resource)
    }

    fn check_workspace(&self, actor: &Actor, action: Action, workspace: &Workspace) -> Result<()> {
        self.check(
            actor,
            action,
            &Resource::Workspace {
                id: workspace.id.clone(),
                owner: workspace.owner.clone(),
            },
        )
    }

    /// Create a workspace owned by the actor and, unless told otherwise,
    /// queue its first `start` build.
    #[instrument(skip(self, req), fields(actor = %actor.id, name = %req.name))]
    pub async fn create_workspace(
        &self,
        actor: &Actor,
        req: CreateWorkspaceRequest,
    ) -> Result<CreatedWorkspace> {
        self.check(
            actor,
            Action::CreateWorkspace,
            &Resource::NewWorkspace {
                owner: actor.id.clone(),
            },
        )?;

        let mut tx = db::begin_immediate(&self.pool).await?;

        let workspace = self.workspaces.insert(&mut *tx, &actor.id, &req).await?;
        let first = if req.initial_build {
            let first = self
                .insert_executed_build(
                    &mut *tx,
                    &workspace,
                    BuildTransition::Start,
                    req.job_input(),
                    &actor.id,
                )
                .await?;
            Some(first)
        } else {
            None
        };
        let workspace = WorkspaceStore::fetch(&mut *tx, &workspace.id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("workspace {}", workspace.id)))?;

        tx.commit().await?;

        info!(workspace_id = %workspace.id, "workspace created");
        let build = first.map(|(build, job)| {
            self.scheduler.announce(&job);
            build
        });
        Ok(CreatedWorkspace { workspace, build })
    }

    pub async fn get_workspace(&self, actor: &Actor, workspace_id: &str) -> Result<Workspace> {
        let workspace = self.workspaces.get(workspace_id).await?;
        self.check_workspace(actor, Action::ReadWorkspace, &workspace)?;
        Ok(workspace)
    }

    pub async fn get_workspace_by_name(
        &self,
        actor: &Actor,
        owner: &str,
        organization_id: Option<&str>,
        name: &str,
    ) -> Result<Workspace> {
        let workspace = self
            .workspaces
            .get_by_name(owner, organization_id, name)
            .await?;
        self.check_workspace(actor, Action::ReadWorkspace, &workspace)?;
        Ok(workspace)
    }

    /// Workspaces matching `filters` that the actor may read.
    pub async fn list_workspaces(
        &self,
        actor: &Actor,
        filters: WorkspaceFilters,
    ) -> Result<Vec<Workspace>> {
        let workspaces = self.workspaces.list(filters).await?;
        Ok(workspaces
            .into_iter()
            .filter(|ws| self.check_workspace(actor, Action::ReadWorkspace, ws).is_ok())
            .collect())
    }

    /// Create the workspace's next build and queue a job for it.
    /// Fails with `WorkspaceBusy` while another build of the workspace is active.
    #[instrument(skip(self, req), fields(actor = %actor.id, transition = %req.transition))]
    pub async fn create_build(
        &self,
        actor: &Actor,
        workspace_id: &str,
        req: CreateBuildRequest,
    ) -> Result<WorkspaceBuild> {
        let workspace = self.workspaces.get(workspace_id).await?;
        self.check_workspace(actor, Action::UpdateWorkspace, &workspace)?;

        let input = JobInput {
            template_version_id: req
                .template_version_id
                .unwrap_or_else(|| workspace.template_version_id.clone()),
            parameters: req.parameters,
        };

        let mut tx = db::begin_immediate(&self.pool).await?;
        let (build, job) = self
            .insert_executed_build(&mut *tx, &workspace, req.transition, input, &actor.id)
            .await?;
        tx.commit().await?;

        self.scheduler.announce(&job);
        info!(build_id = %build.id, build_number = build.build_number, job_id = %job.id, "build queued");
        Ok(build)
    }

    async fn insert_executed_build(
        &self,
        conn: &mut SqliteConnection,
        workspace: &Workspace,
        transition: BuildTransition,
        input: JobInput,
        initiator: &str,
    ) -> Result<(WorkspaceBuild, ProvisionerJob)> {
        let build_number = BuildStore::next_build_number(conn, &workspace.id).await?;

        let job = self
            .scheduler
            .enqueue_with(
                conn,
                NewJob {
                    workspace_id: Some(workspace.id.clone()),
                    job_type: transition.job_type(),
                    input,
                    tags: workspace.tags.clone(),
                },
            )
            .await?;

        let build = self
            .builds
            .insert(
                conn,
                NewBuild {
                    workspace_id: &workspace.id,
                    build_number,
                    transition,
                    job_id: Some(&job.id),
                    initiator,
                },
            )
            .await?;

        self.workspaces
            .set_latest_build(conn, &workspace.id, &build.id)
            .await?;

        Ok((build, job))
    }

    /// Record `state` as the result of a new build that runs no job.
    ///
    /// `expected_build_number`, when given, must equal the number the new
    /// build receives, otherwise `BuildNumberConflict`. The build keeps the
    /// transition of the workspace's previous build.
    #[instrument(skip(self, state), fields(actor = %actor.id, bytes = state.len()))]
    pub async fn create_build_with_state(
        &self,
        actor: &Actor,
        workspace_id: &str,
        state: &[u8],
        expected_build_number: Option<i64>,
    ) -> Result<WorkspaceBuild> {
        let workspace = self.workspaces.get(workspace_id).await?;
        self.check_workspace(actor, Action::WriteState, &workspace)?;

        let mut tx = db::begin_immediate(&self.pool).await?;

        if let Some(active) = JobStore::active_for_workspace(&mut *tx, &workspace.id).await? {
            info!(job_id = %active.id, status = %active.status, "push rejected, build in progress");
            return Err(OrchestratorError::WorkspaceBusy(workspace.id));
        }

        let next = BuildStore::next_build_number(&mut *tx, &workspace.id).await?;
        if let Some(expected) = expected_build_number {
            if expected != next {
                return Err(OrchestratorError::BuildNumberConflict { expected, next });
            }
        }

        let transition = match &workspace.latest_build_id {
            Some(latest) => BuildStore::fetch(&mut *tx, latest)
                .await?
                .map(|b| b.transition)
                .unwrap_or(BuildTransition::Start),
            None => BuildTransition::Start,
        };

        let build = self
            .builds
            .insert(
                &mut *tx,
                NewBuild {
                    workspace_id: &workspace.id,
                    build_number: next,
                    transition,
                    job_id: None,
                    initiator: &actor.id,
                },
            )
            .await?;
        self.artifacts.put_with(&mut *tx, &build.id, state).await?;
        self.workspaces
            .set_latest_build(&mut *tx, &workspace.id, &build.id)
            .await?;

        tx.commit().await?;

        info!(build_id = %build.id, build_number = build.build_number, "state pushed");
        Ok(build)
    }

    /// State of the workspace's latest build. `NoState` if that build has not
    /// stored any, for example because it is still running or failed.
    pub async fn read_latest_state(&self, actor: &Actor, workspace_id: &str) -> Result<Vec<u8>> {
        let workspace = self.workspaces.get(workspace_id).await?;
        self.check_workspace(actor, Action::ReadState, &workspace)?;

        let Some(build_id) = workspace.latest_build_id else {
            return Err(OrchestratorError::NoState(workspace.id));
        };

        self.artifacts
            .get(&build_id)
            .await?
            .ok_or(OrchestratorError::NoState(workspace.id))
    }

    /// State stored by one specific build.
    pub async fn read_build_state(
        &self,
        actor: &Actor,
        workspace_id: &str,
        build_number: i64,
    ) -> Result<Vec<u8>> {
        let workspace = self.workspaces.get(workspace_id).await?;
        self.check_workspace(actor, Action::ReadState, &workspace)?;

        let build = self.builds.get_by_number(&workspace.id, build_number).await?;
        self.artifacts
            .get(&build.id)
            .await?
            .ok_or_else(|| OrchestratorError::NoState(format!("{} build #{}", workspace.id, build_number)))
    }

    pub async fn get_build(&self, actor: &Actor, build_id: &str) -> Result<WorkspaceBuild> {
        let build = self.builds.get(build_id).await?;
        let workspace = self.workspaces.get(&build.workspace_id).await?;
        self.check_workspace(actor, Action::ReadWorkspace, &workspace)?;
        Ok(build)
    }

    /// Builds of a workspace, newest first.
    pub async fn list_builds(&self, actor: &Actor, workspace_id: &str) -> Result<Vec<WorkspaceBuild>> {
        let workspace = self.workspaces.get(workspace_id).await?;
        self.check_workspace(actor, Action::ReadWorkspace, &workspace)?;
        self.builds.list(&workspace.id).await
    }

    /// Cancel the build's job. Builds without a job are already finished and
    /// are returned unchanged.
    #[instrument(skip(self), fields(actor = %actor.id))]
    pub async fn cancel_build(&self, actor: &Actor, build_id: &str) -> Result<WorkspaceBuild> {
        let build = self.builds.get(build_id).await?;
        let workspace = self.workspaces.get(&build.workspace_id).await?;
        self.check_workspace(actor, Action::UpdateWorkspace, &workspace)?;

        let Some(job_id) = &build.job_id else {
            return Ok(build);
        };
        self.scheduler.cancel(job_id).await?;

        self.builds.get(build_id).await
    }

    /// Wait for the build's job to finish. `DeadlineExceeded` leaves the job running.
    pub async fn await_build(
        &self,
        actor: &Actor,
        build_id: &str,
        timeout: Duration,
    ) -> Result<WorkspaceBuild> {
        let build = self.get_build(actor, build_id).await?;
        let Some(job_id) = &build.job_id else {
            return Ok(build);
        };
        self.waiter.await_terminal(job_id, timeout).await?;

        self.builds.get(build_id).await
    }

    pub async fn get_job(&self, actor: &Actor, job_id: &str) -> Result<ProvisionerJob> {
        let job = self.scheduler.jobs().get(job_id).await?;
        self.check_job(actor, &job).await?;
        Ok(job)
    }

    pub async fn job_logs(&self, actor: &Actor, job_id: &str) -> Result<Vec<JobLog>> {
        let job = self.get_job(actor, job_id).await?;
        self.scheduler.jobs().logs(&job.id).await
    }

    async fn check_job(&self, actor: &Actor, job: &ProvisionerJob) -> Result<()> {
        match &job.workspace_id {
            Some(workspace_id) => {
                let workspace = self.workspaces.get(workspace_id).await?;
                self.check_workspace(actor, Action::ReadWorkspace, &workspace)
            }
            None => self.check(
                actor,
                Action::ReadWorkspace,
                &Resource::Job { id: job.id.clone() },
            ),
        }
    }
}
