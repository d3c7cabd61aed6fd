use crate::{
    error::{ApiResult, ErrorBody},
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Extension, Json, Router,
};
use hangar_orchestrator::{Actor, CreateWorkspaceRequest, CreatedWorkspace, Workspace, WorkspaceFilters};
use serde::Deserialize;
use utoipa::IntoParams;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/workspaces",
            get(list_workspaces).post(create_workspace),
        )
        .route("/api/v1/workspaces/{id}", get(get_workspace))
        .route(
            "/api/v1/users/{owner}/workspaces/{name}",
            get(get_workspace_by_name),
        )
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListWorkspacesQuery {
    /// Only workspaces owned by this user
    pub owner: Option<String>,
    pub organization_id: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrganizationQuery {
    pub organization_id: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/workspaces",
    request_body = CreateWorkspaceRequest,
    responses(
        (status = 200, description = "Workspace created with its initial build", body = CreatedWorkspace),
        (status = 403, description = "Permission denied", body = ErrorBody),
        (status = 409, description = "Name already taken", body = ErrorBody)
    ),
    tag = "workspaces"
)]
pub async fn create_workspace(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateWorkspaceRequest>,
) -> ApiResult<Json<CreatedWorkspace>> {
    let created = state.orchestrator.create_workspace(&actor, req).await?;

    Ok(Json(created))
}

#[utoipa::path(
    get,
    path = "/api/v1/workspaces",
    params(ListWorkspacesQuery),
    responses(
        (status = 200, description = "Workspaces the caller may read", body = Vec<Workspace>)
    ),
    tag = "workspaces"
)]
pub async fn list_workspaces(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<ListWorkspacesQuery>,
) -> ApiResult<Json<Vec<Workspace>>> {
    let filters = WorkspaceFilters {
        owner: query.owner,
        organization_id: query.organization_id,
    };

    let workspaces = state.orchestrator.list_workspaces(&actor, filters).await?;

    Ok(Json(workspaces))
}

#[utoipa::path(
    get,
    path = "/api/v1/workspaces/{id}",
    params(("id" = String, Path, description = "Workspace ID")),
    responses(
        (status = 200, description = "Workspace", body = Workspace),
        (status = 403, description = "Permission denied", body = ErrorBody),
        (status = 404, description = "Workspace not found", body = ErrorBody)
    ),
    tag = "workspaces"
)]
pub async fn get_workspace(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Json<Workspace>> {
    let workspace = state.orchestrator.get_workspace(&actor, &id).await?;

    Ok(Json(workspace))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{owner}/workspaces/{name}",
    params(
        ("owner" = String, Path, description = "Owning user"),
        ("name" = String, Path, description = "Workspace name"),
        OrganizationQuery
    ),
    responses(
        (status = 200, description = "Workspace", body = Workspace),
        (status = 404, description = "Workspace not found", body = ErrorBody)
    ),
    tag = "workspaces"
)]
pub async fn get_workspace_by_name(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<OrganizationQuery>,
) -> ApiResult<Json<Workspace>> {
    let workspace = state
        .orchestrator
        .get_workspace_by_name(&actor, &owner, query.organization_id.as_deref(), &name)
        .await?;

    Ok(Json(workspace))
}
