use crate::{
    error::{ApiResult, ErrorBody},
    state::AppState,
};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use hangar_orchestrator::{Actor, CreateBuildRequest, WorkspaceBuild};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/workspaces/{id}/builds",
            get(list_builds).post(create_build),
        )
        .route("/api/v1/builds/{id}", get(get_build))
        .route("/api/v1/builds/{id}/cancel", post(cancel_build))
}

#[utoipa::path(
    post,
    path = "/api/v1/workspaces/{id}/builds",
    params(("id" = String, Path, description = "Workspace ID")),
    request_body = CreateBuildRequest,
    responses(
        (status = 200, description = "Build created and its job queued", body = WorkspaceBuild),
        (status = 403, description = "Permission denied", body = ErrorBody),
        (status = 409, description = "Another build of the workspace is active", body = ErrorBody)
    ),
    tag = "builds"
)]
pub async fn create_build(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(req): Json<CreateBuildRequest>,
) -> ApiResult<Json<WorkspaceBuild>> {
    let build = state.orchestrator.create_build(&actor, &id, req).await?;

    Ok(Json(build))
}

#[utoipa::path(
    get,
    path = "/api/v1/workspaces/{id}/builds",
    params(("id" = String, Path, description = "Workspace ID")),
    responses(
        (status = 200, description = "Builds, newest first", body = Vec<WorkspaceBuild>),
        (status = 404, description = "Workspace not found", body = ErrorBody)
    ),
    tag = "builds"
)]
pub async fn list_builds(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<WorkspaceBuild>>> {
    let builds = state.orchestrator.list_builds(&actor, &id).await?;

    Ok(Json(builds))
}

#[utoipa::path(
    get,
    path = "/api/v1/builds/{id}",
    params(("id" = String, Path, description = "Build ID")),
    responses(
        (status = 200, description = "Build", body = WorkspaceBuild),
        (status = 404, description = "Build not found", body = ErrorBody)
    ),
    tag = "builds"
)]
pub async fn get_build(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkspaceBuild>> {
    let build = state.orchestrator.get_build(&actor, &id).await?;

    Ok(Json(build))
}

#[utoipa::path(
    post,
    path = "/api/v1/builds/{id}/cancel",
    params(("id" = String, Path, description = "Build ID")),
    responses(
        (status = 200, description = "Cancellation requested", body = WorkspaceBuild),
        (status = 404, description = "Build not found", body = ErrorBody)
    ),
    tag = "builds"
)]
pub async fn cancel_build(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkspaceBuild>> {
    let build = state.orchestrator.cancel_build(&actor, &id).await?;

    Ok(Json(build))
}
