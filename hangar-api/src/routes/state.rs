use crate::{
    error::{ApiResult, ErrorBody},
    state::AppState,
};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use hangar_orchestrator::{Actor, WorkspaceBuild};
use serde::Deserialize;
use utoipa::IntoParams;

/// Largest state blob accepted by `PUT .../state`.
const MAX_STATE_BYTES: usize = 64 * 1024 * 1024;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/workspaces/{id}/state",
            get(pull_state).put(push_state),
        )
        .layer(DefaultBodyLimit::max(MAX_STATE_BYTES))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StateQuery {
    /// Pull: the build whose state to read (defaults to the latest build).
    /// Push: the build number the new build is expected to get.
    pub build: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/api/v1/workspaces/{id}/state",
    params(("id" = String, Path, description = "Workspace ID"), StateQuery),
    responses(
        (status = 200, description = "Raw state bytes", body = String, content_type = "application/octet-stream"),
        (status = 403, description = "Permission denied", body = ErrorBody),
        (status = 404, description = "Workspace not found or no state to pull", body = ErrorBody)
    ),
    tag = "state"
)]
pub async fn pull_state(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Query(query): Query<StateQuery>,
) -> ApiResult<impl IntoResponse> {
    let blob = match query.build {
        Some(number) => {
            state
                .orchestrator
                .read_build_state(&actor, &id, number)
                .await?
        }
        None => state.orchestrator.read_latest_state(&actor, &id).await?,
    };

    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], blob))
}

#[utoipa::path(
    put,
    path = "/api/v1/workspaces/{id}/state",
    params(("id" = String, Path, description = "Workspace ID"), StateQuery),
    request_body(content = String, content_type = "application/octet-stream", description = "Raw state bytes"),
    responses(
        (status = 200, description = "Build created with the pushed state", body = WorkspaceBuild),
        (status = 403, description = "Permission denied", body = ErrorBody),
        (status = 409, description = "Workspace busy or build number conflict", body = ErrorBody)
    ),
    tag = "state"
)]
pub async fn push_state(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Query(query): Query<StateQuery>,
    body: Bytes,
) -> ApiResult<Json<WorkspaceBuild>> {
    let build = state
        .orchestrator
        .create_build_with_state(&actor, &id, &body, query.build)
        .await?;

    Ok(Json(build))
}
