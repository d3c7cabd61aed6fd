use crate::{
    error::{ApiResult, ErrorBody},
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Extension, Json, Router,
};
use hangar_orchestrator::{Actor, JobLog, ProvisionerJob};
use serde::Deserialize;
use std::time::Duration;
use utoipa::IntoParams;

const DEFAULT_WAIT_SECS: u64 = 60;
const MAX_WAIT_SECS: u64 = 3600;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/jobs/{id}", get(get_job))
        .route("/api/v1/jobs/{id}/logs", get(job_logs))
        .route("/api/v1/jobs/{id}/wait", get(wait_job))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WaitQuery {
    /// Seconds to wait before answering 408 (default 60)
    pub timeout_secs: Option<u64>,
}

#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job", body = ProvisionerJob),
        (status = 404, description = "Job not found", body = ErrorBody)
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProvisionerJob>> {
    let job = state.orchestrator.get_job(&actor, &id).await?;

    Ok(Json(job))
}

#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}/logs",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Progress logs in arrival order", body = Vec<JobLog>),
        (status = 404, description = "Job not found", body = ErrorBody)
    ),
    tag = "jobs"
)]
pub async fn job_logs(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<JobLog>>> {
    let logs = state.orchestrator.job_logs(&actor, &id).await?;

    Ok(Json(logs))
}

#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}/wait",
    params(("id" = String, Path, description = "Job ID"), WaitQuery),
    responses(
        (status = 200, description = "Job in a terminal status", body = ProvisionerJob),
        (status = 404, description = "Job not found", body = ErrorBody),
        (status = 408, description = "Job still active at the deadline", body = ErrorBody)
    ),
    tag = "jobs"
)]
pub async fn wait_job(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Query(query): Query<WaitQuery>,
) -> ApiResult<Json<ProvisionerJob>> {
    let job = state.orchestrator.get_job(&actor, &id).await?;
    let timeout = query
        .timeout_secs
        .unwrap_or(DEFAULT_WAIT_SECS)
        .min(MAX_WAIT_SECS);

    let job = state
        .orchestrator
        .waiter()
        .await_terminal(&job.id, Duration::from_secs(timeout))
        .await?;

    Ok(Json(job))
}
