use crate::error::ErrorBody;
use hangar_orchestrator::{
    BuildTransition, CreateBuildRequest, CreateWorkspaceRequest, CreatedWorkspace, JobInput,
    JobLog, JobStatus, JobType, ProvisionerJob, Workspace, WorkspaceBuild, WorkerSession,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health_check,
        crate::routes::health::readiness_check,
        crate::routes::workspaces::list_workspaces,
        crate::routes::workspaces::create_workspace,
        crate::routes::workspaces::get_workspace,
        crate::routes::workspaces::get_workspace_by_name,
        crate::routes::builds::create_build,
        crate::routes::builds::list_builds,
        crate::routes::builds::get_build,
        crate::routes::builds::cancel_build,
        crate::routes::state::pull_state,
        crate::routes::state::push_state,
        crate::routes::jobs::get_job,
        crate::routes::jobs::job_logs,
        crate::routes::jobs::wait_job,
        crate::routes::provisioner::serve_provisioner,
        crate::routes::provisioner::list_sessions,
    ),
    components(
        schemas(
            Workspace,
            CreateWorkspaceRequest,
            CreatedWorkspace,
            WorkspaceBuild,
            BuildTransition,
            CreateBuildRequest,
            ProvisionerJob,
            JobInput,
            JobStatus,
            JobType,
            JobLog,
            WorkerSession,
            ErrorBody
        )
    ),
    tags(
        (name = "hangar-api", description = "Workspace build orchestration API")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_state_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/v1/workspaces/{id}/state"));
        assert!(doc.paths.paths.contains_key("/api/v1/jobs/{id}/wait"));
    }
}
