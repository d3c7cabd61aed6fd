//! Messages exchanged between the engine and a provisioning worker.
//!
//! The engine hands a worker exactly one [`AcquiredJob`]; the worker answers
//! with any number of progress messages followed by exactly one terminal
//! message.

use crate::build::WorkspaceBuild;
use crate::job::{JobStatus, ProvisionerJob};
use serde::{Deserialize, Serialize};

/// Job descriptor sent to the worker that claimed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquiredJob {
    pub job: ProvisionerJob,
    /// The build this job executes, absent for template imports.
    pub build: Option<WorkspaceBuild>,
    /// State left by the workspace's most recent earlier build that stored one.
    pub prior_state: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Progress { stage: String, output: String },
    Succeeded { state: Vec<u8> },
    Failed { error: String },
    Canceled,
}

impl WorkerMessage {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerMessage::Progress { .. })
    }

    /// Job status a terminal message moves the job to.
    pub fn terminal_status(&self) -> Option<JobStatus> {
        match self {
            WorkerMessage::Progress { .. } => None,
            WorkerMessage::Succeeded { .. } => Some(JobStatus::Succeeded),
            WorkerMessage::Failed { .. } => Some(JobStatus::Failed),
            WorkerMessage::Canceled => Some(JobStatus::Canceled),
        }
    }
}

/// Engine reply to a worker report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "status", rename_all = "snake_case")]
pub enum ReportAck {
    /// Progress was recorded and forwarded.
    Progress,
    /// The terminal status, and for success the state artifact, are durable.
    CommitAccepted,
    /// The job had already reached this terminal status; nothing changed.
    AlreadyCompleted(JobStatus),
}
