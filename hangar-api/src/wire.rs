//! JSON frames spoken on the provisioner websocket.
//!
//! State blobs travel base64-encoded since frames are text.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hangar_orchestrator::{AcquiredJob, JobStatus, ProvisionerJob, WorkerMessage, WorkspaceBuild};
use serde::{Deserialize, Serialize};

/// Engine to worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AcquiredJob {
        job: ProvisionerJob,
        build: Option<WorkspaceBuild>,
        prior_state: Option<String>,
    },
    CommitAccepted {
        job_id: String,
    },
    AlreadyCompleted {
        job_id: String,
        status: JobStatus,
    },
    Cancel {
        job_id: String,
    },
    Error {
        message: String,
    },
}

impl From<AcquiredJob> for ServerMessage {
    fn from(acquired: AcquiredJob) -> Self {
        ServerMessage::AcquiredJob {
            job: acquired.job,
            build: acquired.build,
            prior_state: acquired.prior_state.map(|state| STANDARD.encode(state)),
        }
    }
}

impl ServerMessage {
    /// Decoded prior state of an `acquired_job` frame.
    pub fn prior_state(&self) -> Result<Option<Vec<u8>>, base64::DecodeError> {
        match self {
            ServerMessage::AcquiredJob {
                prior_state: Some(encoded),
                ..
            } => STANDARD.decode(encoded).map(Some),
            _ => Ok(None),
        }
    }
}

/// Worker to engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerFrame {
    Progress { stage: String, output: String },
    Succeeded { state: String },
    Failed { error: String },
    Canceled,
}

impl WorkerFrame {
    pub fn into_message(self) -> Result<WorkerMessage, base64::DecodeError> {
        Ok(match self {
            WorkerFrame::Progress { stage, output } => WorkerMessage::Progress { stage, output },
            WorkerFrame::Succeeded { state } => WorkerMessage::Succeeded {
                state: STANDARD.decode(state)?,
            },
            WorkerFrame::Failed { error } => WorkerMessage::Failed { error },
            WorkerFrame::Canceled => WorkerMessage::Canceled,
        })
    }
}

impl From<WorkerMessage> for WorkerFrame {
    fn from(message: WorkerMessage) -> Self {
        match message {
            WorkerMessage::Progress { stage, output } => WorkerFrame::Progress { stage, output },
            WorkerMessage::Succeeded { state } => WorkerFrame::Succeeded {
                state: STANDARD.encode(state),
            },
            WorkerMessage::Failed { error } => WorkerFrame::Failed { error },
            WorkerMessage::Canceled => WorkerFrame::Canceled,
        }
    }
}
