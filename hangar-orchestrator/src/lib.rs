//! Build and job orchestration engine.
//!
//! This crate contains the core logic for running workspace builds: durable
//! stores for jobs, builds and state artifacts, the per-workspace scheduler,
//! worker sessions and the facade used by build-triggering operations. It is
//! consumed by the hangar-api HTTP service but can also be embedded directly,
//! together with an in-process provisioner daemon.

pub mod artifact;
pub mod build;
pub mod clock;
pub mod config;
pub mod daemon;
pub mod db;
pub mod echo;
pub mod error;
pub mod events;
pub mod job;
pub mod orchestrator;
pub mod permission;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod sessions;
pub mod waiter;
pub mod workspace;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use artifact::ArtifactStore;
pub use build::{BuildStore, BuildTransition, WorkspaceBuild};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::OrchestratorConfig;
pub use daemon::{DaemonHandle, ProgressSink, Provisioner, ProvisionerDaemon};
pub use echo::EchoProvisioner;
pub use error::{OrchestratorError, Result};
pub use events::{JobEvent, JobEvents};
pub use job::{JobInput, JobLog, JobStatus, JobStore, JobType, NewJob, ProvisionerJob, TransitionUpdate};
pub use orchestrator::{BuildOrchestrator, CreateBuildRequest, CreatedWorkspace};
pub use permission::{parse_roles, Action, Actor, PermissionGate, Resource, Role, RoleGate};
pub use protocol::{AcquiredJob, ReportAck, WorkerMessage};
pub use registry::{WorkerRegistry, WorkerSession};
pub use scheduler::{ReapReport, Scheduler};
pub use sessions::{LostJobOutcome, WorkerSessionManager};
pub use waiter::CompletionWaiter;
pub use workspace::{CreateWorkspaceRequest, Workspace, WorkspaceFilters, WorkspaceStore, DEFAULT_ORGANIZATION};
