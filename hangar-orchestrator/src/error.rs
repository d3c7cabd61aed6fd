use crate::job::JobStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Workspace {0} already has an active build")]
    WorkspaceBusy(String),

    #[error("Build number conflict: expected {expected}, next build is {next}")]
    BuildNumberConflict { expected: i64, next: i64 },

    #[error("Workspace {0} has no state to pull")]
    NoState(String),

    #[error("Stale transition on job {job_id}: expected {expected}, found {actual}")]
    StaleTransition {
        job_id: String,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("Worker lost while running job {0}")]
    WorkerLost(String),

    #[error("Deadline exceeded waiting for job {0}")]
    DeadlineExceeded(String),

    #[error("State for build {0} was already written with different content")]
    StateAlreadyWritten(String),

    #[error("Provisioner error: {0}")]
    Provisioner(#[from] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Stable machine-readable code for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::Database(_) => "database",
            OrchestratorError::Migration(_) => "migration",
            OrchestratorError::NotFound(_) => "not_found",
            OrchestratorError::InvalidInput(_) => "invalid_input",
            OrchestratorError::InvalidState(_) => "invalid_state",
            OrchestratorError::PermissionDenied(_) => "permission_denied",
            OrchestratorError::WorkspaceBusy(_) => "workspace_busy",
            OrchestratorError::BuildNumberConflict { .. } => "build_number_conflict",
            OrchestratorError::NoState(_) => "no_state",
            OrchestratorError::StaleTransition { .. } => "stale_transition",
            OrchestratorError::WorkerLost(_) => "worker_lost",
            OrchestratorError::DeadlineExceeded(_) => "deadline_exceeded",
            OrchestratorError::StateAlreadyWritten(_) => "state_already_written",
            OrchestratorError::Provisioner(_) => "provisioner",
            OrchestratorError::Serialization(_) => "serialization",
            OrchestratorError::Io(_) => "io",
        }
    }
}

/// Returns true when `err` is a UNIQUE constraint failure touching `table`.
pub(crate) fn is_unique_violation_on(err: &sqlx::Error, table: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() && db_err.message().contains(table)
        }
        _ => false,
    }
}
