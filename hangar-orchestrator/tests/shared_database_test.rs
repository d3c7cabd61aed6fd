//! Tests against a file-backed database with a multi-connection pool, the
//! way the API server runs, including two engines sharing one file.

use hangar_orchestrator::db::{create_pool, run_migrations};
use hangar_orchestrator::test_utils::{test_config, user};
use hangar_orchestrator::{
    BuildOrchestrator, BuildTransition, CreateBuildRequest, CreateWorkspaceRequest,
    EchoProvisioner, JobStatus, OrchestratorError, ProvisionerDaemon, RoleGate, SystemClock,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

const WAIT: Duration = Duration::from_secs(10);

async fn file_orchestrator(db_path: &Path) -> BuildOrchestrator {
    let pool = create_pool(db_path).await.expect("Failed to open database");
    run_migrations(&pool).await.expect("Failed to run migrations");
    BuildOrchestrator::with_config(pool, Arc::new(RoleGate), Arc::new(SystemClock), test_config())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_builds_are_busy_not_locked() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = file_orchestrator(&dir.path().join("hangar.db")).await;
    let alice = user("alice");

    let mut workspace_ids = Vec::new();
    for i in 0..10 {
        let ws = orchestrator
            .create_workspace(
                &alice,
                CreateWorkspaceRequest::new(format!("ws-{}", i), "tv-1").without_initial_build(),
            )
            .await
            .unwrap()
            .workspace;
        workspace_ids.push(ws.id);
    }

    let mut calls = JoinSet::new();
    for ws_id in &workspace_ids {
        for _ in 0..4 {
            let orchestrator = orchestrator.clone();
            let alice = alice.clone();
            let ws_id = ws_id.clone();
            calls.spawn(async move {
                let result = orchestrator
                    .create_build(&alice, &ws_id, CreateBuildRequest::new(BuildTransition::Start))
                    .await;
                (ws_id, result)
            });
        }
    }

    let mut queued = 0;
    let mut busy = 0;
    while let Some(joined) = calls.join_next().await {
        let (ws_id, result) = joined.unwrap();
        match result {
            Ok(build) => {
                assert_eq!(build.workspace_id, ws_id);
                assert_eq!(build.build_number, 1);
                queued += 1;
            }
            Err(OrchestratorError::WorkspaceBusy(id)) => {
                assert_eq!(id, ws_id);
                busy += 1;
            }
            Err(other) => panic!("unexpected error kind {}: {}", other.kind(), other),
        }
    }

    assert_eq!(queued, 10);
    assert_eq!(busy, 30);
    for ws_id in &workspace_ids {
        let builds = orchestrator.list_builds(&alice, ws_id).await.unwrap();
        assert_eq!(builds.len(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_from_other_engine_reaches_worker() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("hangar.db");
    let engine_a = file_orchestrator(&db_path).await;
    let engine_b = file_orchestrator(&db_path).await;
    let alice = user("alice");

    let daemon = ProvisionerDaemon::new(
        engine_a.scheduler().clone(),
        Arc::new(EchoProvisioner::new().hanging()),
        "echo",
        BTreeSet::new(),
    )
    .spawn();

    let build_id = engine_b
        .create_workspace(&alice, CreateWorkspaceRequest::new("dev", "tv-1"))
        .await
        .unwrap()
        .build
        .unwrap()
        .id;

    // Wait until the daemon on engine A holds the job.
    for _ in 0..500 {
        let holding = engine_a
            .sessions()
            .registry()
            .get(daemon.session_id())
            .and_then(|s| s.current_job_id)
            .is_some();
        if holding {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Engine B cannot reach the worker, so the job only carries the flag.
    let build = engine_b.cancel_build(&alice, &build_id).await.unwrap();
    assert_eq!(build.status, JobStatus::Running);
    let job = engine_b
        .get_job(&alice, build.job_id.as_deref().unwrap())
        .await
        .unwrap();
    assert!(job.cancel_requested);

    // Engine A picks the flag up on its next heartbeat.
    let report = engine_a.scheduler().reap().await.unwrap();
    assert_eq!(report.heartbeats, 1);

    let build = engine_b.await_build(&alice, &build_id, WAIT).await.unwrap();
    assert_eq!(build.status, JobStatus::Canceled);

    daemon.shutdown().await;
}
