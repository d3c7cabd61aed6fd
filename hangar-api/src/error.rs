use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hangar_orchestrator::OrchestratorError;
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

pub type ApiResult<T> = Result<T, ApiError>;

/// JSON body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    /// Stable error kind, e.g. `workspace_busy` or `no_state`.
    pub code: String,
}

#[derive(Debug)]
pub enum ApiError {
    Orchestrator(OrchestratorError),
    BadRequest(String),
    Forbidden(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Orchestrator(err) => status_for(err),
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Orchestrator(err) => err.kind(),
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Forbidden(_) => "permission_denied",
            ApiError::Internal(_) => "internal",
        }
    }
}

fn status_for(err: &OrchestratorError) -> StatusCode {
    match err {
        OrchestratorError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        OrchestratorError::NotFound(_) | OrchestratorError::NoState(_) => StatusCode::NOT_FOUND,
        OrchestratorError::WorkspaceBusy(_)
        | OrchestratorError::BuildNumberConflict { .. }
        | OrchestratorError::StaleTransition { .. }
        | OrchestratorError::StateAlreadyWritten(_)
        | OrchestratorError::InvalidState(_) => StatusCode::CONFLICT,
        OrchestratorError::DeadlineExceeded(_) => StatusCode::REQUEST_TIMEOUT,
        OrchestratorError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code().to_string();
        let message = match self {
            ApiError::Orchestrator(err) => err.to_string(),
            ApiError::BadRequest(msg) | ApiError::Forbidden(msg) | ApiError::Internal(msg) => msg,
        };

        if status.is_server_error() {
            error!(code = %code, "request failed: {}", message);
        }

        (
            status,
            Json(ErrorBody {
                error: message,
                code,
            }),
        )
            .into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError::Orchestrator(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hangar_orchestrator::JobStatus;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                OrchestratorError::PermissionDenied("x".into()),
                StatusCode::FORBIDDEN,
            ),
            (
                OrchestratorError::WorkspaceBusy("ws".into()),
                StatusCode::CONFLICT,
            ),
            (
                OrchestratorError::BuildNumberConflict {
                    expected: 1,
                    next: 2,
                },
                StatusCode::CONFLICT,
            ),
            (OrchestratorError::NoState("ws".into()), StatusCode::NOT_FOUND),
            (
                OrchestratorError::StaleTransition {
                    job_id: "j".into(),
                    expected: JobStatus::Running,
                    actual: JobStatus::Failed,
                },
                StatusCode::CONFLICT,
            ),
            (
                OrchestratorError::DeadlineExceeded("j".into()),
                StatusCode::REQUEST_TIMEOUT,
            ),
            (
                OrchestratorError::InvalidInput("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                OrchestratorError::WorkerLost("j".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_code_is_error_kind() {
        let err = ApiError::from(OrchestratorError::NoState("ws".into()));
        assert_eq!(err.code(), "no_state");
        assert_eq!(ApiError::BadRequest("x".into()).code(), "bad_request");
    }
}
