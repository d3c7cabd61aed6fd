//! Integration tests for REST API endpoints
//!
//! Drives the router with `oneshot` requests: workspace creation and lookup,
//! builds, job inspection and error mapping.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::TestClient;
use hangar_orchestrator::{
    BuildTransition, CreateBuildRequest, CreateWorkspaceRequest, CreatedWorkspace, JobStatus,
    ProvisionerJob, Workspace, WorkspaceBuild,
};
use serde_json::Value;
use tower::ServiceExt; // for `oneshot`

#[tokio::test]
async fn test_health_endpoints() {
    let (app, _, _) = common::create_test_app().await;

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["service"], "hangar-api");

    let response = app
        .oneshot(Request::get("/health/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["workers"], 0);
}

#[tokio::test]
async fn test_create_workspace_endpoint() {
    let (app, _, _) = common::create_test_app().await;
    let client = TestClient::new(app, "alice");

    let response = client
        .post(
            "/api/v1/workspaces",
            &CreateWorkspaceRequest::new("dev", "tv-1"),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let created: CreatedWorkspace = common::extract_json_body(response).await;
    assert_eq!(created.workspace.owner, "alice");
    assert_eq!(created.workspace.name, "dev");

    let build = created.build.expect("initial build");
    assert_eq!(build.build_number, 1);
    assert_eq!(build.transition, BuildTransition::Start);
    assert_eq!(build.status, JobStatus::Pending);
    assert_eq!(created.workspace.latest_build_id, Some(build.id));
}

#[tokio::test]
async fn test_request_without_user_is_unauthorized() {
    let (app, _, _) = common::create_test_app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/workspaces")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_string(&CreateWorkspaceRequest::new("dev", "tv-1")).unwrap(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_role_is_rejected() {
    let (app, _, _) = common::create_test_app().await;
    let client = TestClient::new(app, "alice").with_roles("root");

    let response = client.get("/api/v1/workspaces").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["code"], "invalid_input");
}

#[tokio::test]
async fn test_workspace_lookup_and_listing() {
    let (app, _, _) = common::create_test_app().await;
    let alice = TestClient::new(app.clone(), "alice");
    let bob = TestClient::new(app.clone(), "bob");

    let created: CreatedWorkspace = common::extract_json_body(
        alice
            .post(
                "/api/v1/workspaces",
                &CreateWorkspaceRequest::new("dev", "tv-1").without_initial_build(),
            )
            .await,
    )
    .await;
    bob.post(
        "/api/v1/workspaces",
        &CreateWorkspaceRequest::new("dev", "tv-1").without_initial_build(),
    )
    .await;

    let response = alice.get("/api/v1/users/alice/workspaces/dev").await;
    assert_eq!(response.status(), StatusCode::OK);
    let workspace: Workspace = common::extract_json_body(response).await;
    assert_eq!(workspace.id, created.workspace.id);

    // Each user only sees their own workspaces
    let listed: Vec<Workspace> =
        common::extract_json_body(alice.get("/api/v1/workspaces").await).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].owner, "alice");

    // Admins see everything
    let admin = TestClient::new(app, "root").with_roles("owner");
    let listed: Vec<Workspace> =
        common::extract_json_body(admin.get("/api/v1/workspaces?owner=bob").await).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].owner, "bob");
}

#[tokio::test]
async fn test_foreign_workspace_is_forbidden() {
    let (app, _, _) = common::create_test_app().await;
    let alice = TestClient::new(app.clone(), "alice");
    let mallory = TestClient::new(app, "mallory");

    let created: CreatedWorkspace = common::extract_json_body(
        alice
            .post("/api/v1/workspaces", &CreateWorkspaceRequest::new("dev", "tv-1"))
            .await,
    )
    .await;
    let uri = format!("/api/v1/workspaces/{}", created.workspace.id);

    let response = mallory.get(&uri).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["code"], "permission_denied");
}

#[tokio::test]
async fn test_missing_workspace_is_not_found() {
    let (app, _, _) = common::create_test_app().await;
    let client = TestClient::new(app, "alice");

    let response = client.get("/api/v1/workspaces/does-not-exist").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_second_build_while_active_is_conflict() {
    let (app, _, _) = common::create_test_app().await;
    let client = TestClient::new(app, "alice");

    let created: CreatedWorkspace = common::extract_json_body(
        client
            .post("/api/v1/workspaces", &CreateWorkspaceRequest::new("dev", "tv-1"))
            .await,
    )
    .await;
    let uri = format!("/api/v1/workspaces/{}/builds", created.workspace.id);

    let response = client
        .post(&uri, &CreateBuildRequest::new(BuildTransition::Stop))
        .await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["code"], "workspace_busy");

    let builds: Vec<WorkspaceBuild> = common::extract_json_body(client.get(&uri).await).await;
    assert_eq!(builds.len(), 1);
}

#[tokio::test]
async fn test_cancel_pending_build() {
    let (app, _, _) = common::create_test_app().await;
    let client = TestClient::new(app, "alice");

    let created: CreatedWorkspace = common::extract_json_body(
        client
            .post("/api/v1/workspaces", &CreateWorkspaceRequest::new("dev", "tv-1"))
            .await,
    )
    .await;
    let build = created.build.unwrap();

    let response = client
        .post_empty(&format!("/api/v1/builds/{}/cancel", build.id))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let canceled: WorkspaceBuild = common::extract_json_body(response).await;
    assert_eq!(canceled.status, JobStatus::Canceled);

    // The workspace is free again
    let response = client
        .post(
            &format!("/api/v1/workspaces/{}/builds", created.workspace.id),
            &CreateBuildRequest::new(BuildTransition::Start),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let next: WorkspaceBuild = common::extract_json_body(response).await;
    assert_eq!(next.build_number, 2);
}

#[tokio::test]
async fn test_job_wait_times_out_with_408() {
    let (app, _, _) = common::create_test_app().await;
    let client = TestClient::new(app, "alice");

    let created: CreatedWorkspace = common::extract_json_body(
        client
            .post("/api/v1/workspaces", &CreateWorkspaceRequest::new("dev", "tv-1"))
            .await,
    )
    .await;
    let job_id = created.build.unwrap().job_id.unwrap();

    let response = client
        .get(&format!("/api/v1/jobs/{}/wait?timeout_secs=0", job_id))
        .await;
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["code"], "deadline_exceeded");

    // Waiting did not touch the job
    let job: ProvisionerJob =
        common::extract_json_body(client.get(&format!("/api/v1/jobs/{}", job_id)).await).await;
    assert_eq!(job.status, JobStatus::Pending);
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let (app, _, _) = common::create_test_app().await;

    let response = app
        .oneshot(
            Request::get("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let doc: Value = common::extract_json_body(response).await;
    assert!(doc["paths"]["/api/v1/workspaces/{id}/state"].is_object());
}
