//! State pull/push over HTTP, with builds executed by an in-process echo worker.

mod common;

use axum::http::StatusCode;
use common::TestClient;
use hangar_orchestrator::{
    BuildTransition, CreateWorkspaceRequest, CreatedWorkspace, EchoProvisioner, JobLog, JobStatus,
    ProvisionerDaemon, ProvisionerJob, WorkspaceBuild,
};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

async fn create_workspace(client: &TestClient, req: CreateWorkspaceRequest) -> CreatedWorkspace {
    let response = client.post("/api/v1/workspaces", &req).await;
    assert_eq!(response.status(), StatusCode::OK);
    common::extract_json_body(response).await
}

#[tokio::test]
async fn test_push_then_pull_round_trips_exact_bytes() {
    let (app, _, _) = common::create_test_app().await;
    let client = TestClient::new(app, "alice");
    let created = create_workspace(
        &client,
        CreateWorkspaceRequest::new("dev", "tv-1").without_initial_build(),
    )
    .await;
    let uri = format!("/api/v1/workspaces/{}/state", created.workspace.id);

    // Nothing to pull yet
    let response = client.get(&uri).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["code"], "no_state");

    let blob = b"{\"version\":4,\"resources\":[]}\n\x00\xff";
    let response = client.put_bytes(&format!("{}?build=1", uri), blob).await;
    assert_eq!(response.status(), StatusCode::OK);
    let build: WorkspaceBuild = common::extract_json_body(response).await;
    assert_eq!(build.build_number, 1);
    assert_eq!(build.transition, BuildTransition::Start);
    assert_eq!(build.status, JobStatus::Succeeded);
    assert!(build.job_id.is_none());

    let response = client.get(&uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/octet-stream"
    );
    assert_eq!(common::extract_bytes(response).await, blob.to_vec());

    let response = client.get(&format!("{}?build=1", uri)).await;
    assert_eq!(common::extract_bytes(response).await, blob.to_vec());
}

#[tokio::test]
async fn test_push_with_stale_build_number_conflicts() {
    let (app, _, _) = common::create_test_app().await;
    let client = TestClient::new(app, "alice");
    let created = create_workspace(
        &client,
        CreateWorkspaceRequest::new("dev", "tv-1").without_initial_build(),
    )
    .await;
    let uri = format!("/api/v1/workspaces/{}/state", created.workspace.id);

    client.put_bytes(&format!("{}?build=1", uri), b"first").await;
    let response = client.put_bytes(&format!("{}?build=1", uri), b"second").await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["code"], "build_number_conflict");

    // The rejected push left no trace
    let response = client.get(&uri).await;
    assert_eq!(common::extract_bytes(response).await, b"first".to_vec());
}

#[tokio::test]
async fn test_push_while_build_active_is_busy() {
    let (app, _, _) = common::create_test_app().await;
    let client = TestClient::new(app, "alice");
    let created = create_workspace(&client, CreateWorkspaceRequest::new("dev", "tv-1")).await;

    let response = client
        .put_bytes(
            &format!("/api/v1/workspaces/{}/state", created.workspace.id),
            b"state",
        )
        .await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["code"], "workspace_busy");
}

#[tokio::test]
async fn test_auditor_cannot_read_state() {
    let (app, _, _) = common::create_test_app().await;
    let alice = TestClient::new(app.clone(), "alice");
    let auditor = TestClient::new(app, "eve").with_roles("auditor");
    let created = create_workspace(
        &alice,
        CreateWorkspaceRequest::new("dev", "tv-1").without_initial_build(),
    )
    .await;
    let uri = format!("/api/v1/workspaces/{}/state", created.workspace.id);
    alice.put_bytes(&uri, b"secret").await;

    let response = auditor
        .get(&format!("/api/v1/workspaces/{}", created.workspace.id))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = auditor.get(&uri).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_executed_build_state_is_pullable() {
    let (app, orchestrator, _) = common::create_test_app().await;
    let client = TestClient::new(app, "alice");

    let daemon = ProvisionerDaemon::new(
        orchestrator.scheduler().clone(),
        Arc::new(
            EchoProvisioner::new()
                .with_log("apply", "1 added")
                .with_state(b"S1".to_vec()),
        ),
        "echo",
        BTreeSet::new(),
    )
    .spawn();

    let created = create_workspace(&client, CreateWorkspaceRequest::new("dev", "tv-1")).await;
    let job_id = created.build.unwrap().job_id.unwrap();

    let response = client
        .get(&format!("/api/v1/jobs/{}/wait?timeout_secs=10", job_id))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let job: ProvisionerJob = common::extract_json_body(response).await;
    assert_eq!(job.status, JobStatus::Succeeded);

    let response = client
        .get(&format!("/api/v1/workspaces/{}/state", created.workspace.id))
        .await;
    assert_eq!(common::extract_bytes(response).await, b"S1".to_vec());

    let logs: Vec<JobLog> = common::extract_json_body(
        client.get(&format!("/api/v1/jobs/{}/logs", job_id)).await,
    )
    .await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].stage, "apply");
    assert_eq!(logs[0].output, "1 added");

    daemon.shutdown().await;
}
