//! Worker sessions over the provisioner websocket.

mod common;

use futures_util::{SinkExt, StreamExt};
use hangar_api::wire::{ServerMessage, WorkerFrame};
use hangar_orchestrator::test_utils::user;
use hangar_orchestrator::{
    BuildTransition, CreateBuildRequest, CreateWorkspaceRequest, JobStatus, WorkerMessage,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest, http::HeaderValue, Error as WsError, Message,
};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(addr: SocketAddr, roles: &str) -> Result<Socket, WsError> {
    let mut request = format!("ws://{}/api/v1/provisioner/serve?name=ws-worker", addr)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("x-user", HeaderValue::from_static("ci"));
    request
        .headers_mut()
        .insert("x-user-roles", HeaderValue::from_str(roles).unwrap());

    connect_async(request).await.map(|(socket, _)| socket)
}

async fn recv(socket: &mut Socket) -> ServerMessage {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), socket.next())
            .await
            .expect("timed out waiting for a server frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("invalid server frame");
        }
    }
}

async fn send(socket: &mut Socket, message: WorkerMessage) {
    let text = serde_json::to_string(&WorkerFrame::from(message)).unwrap();
    socket.send(Message::text(text)).await.unwrap();
}

#[tokio::test]
async fn test_worker_runs_build_and_commits_state() {
    let (app, orchestrator, _) = common::create_test_app().await;
    let addr = common::spawn_server(app).await;
    let alice = user("alice");

    let created = orchestrator
        .create_workspace(&alice, CreateWorkspaceRequest::new("dev", "tv-1"))
        .await
        .unwrap();
    let build = created.build.unwrap();
    let mut socket = connect(addr, "template-admin").await.unwrap();

    let acquired = recv(&mut socket).await;
    let ServerMessage::AcquiredJob { job, build: job_build, .. } = &acquired else {
        panic!("expected acquired_job, got {:?}", acquired);
    };
    assert_eq!(Some(&job.id), build.job_id.as_ref());
    assert_eq!(job_build.as_ref().map(|b| b.build_number), Some(1));
    assert_eq!(acquired.prior_state().unwrap(), None);

    send(
        &mut socket,
        WorkerMessage::Progress {
            stage: "apply".to_string(),
            output: "creating instance".to_string(),
        },
    )
    .await;
    send(
        &mut socket,
        WorkerMessage::Succeeded {
            state: b"S1".to_vec(),
        },
    )
    .await;

    match recv(&mut socket).await {
        ServerMessage::CommitAccepted { job_id } => assert_eq!(Some(job_id), build.job_id),
        other => panic!("expected commit_accepted, got {:?}", other),
    }

    let state = orchestrator
        .read_latest_state(&alice, &created.workspace.id)
        .await
        .unwrap();
    assert_eq!(state, b"S1");

    let logs = orchestrator
        .job_logs(&alice, build.job_id.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].output, "creating instance");
}

#[tokio::test]
async fn test_worker_receives_prior_state_and_cancel() {
    let (app, orchestrator, _) = common::create_test_app().await;
    let addr = common::spawn_server(app).await;
    let alice = user("alice");

    let created = orchestrator
        .create_workspace(
            &alice,
            CreateWorkspaceRequest::new("dev", "tv-1").without_initial_build(),
        )
        .await
        .unwrap();
    orchestrator
        .create_build_with_state(&alice, &created.workspace.id, b"S1", None)
        .await
        .unwrap();
    let stop = orchestrator
        .create_build(
            &alice,
            &created.workspace.id,
            CreateBuildRequest::new(BuildTransition::Stop),
        )
        .await
        .unwrap();

    let mut socket = connect(addr, "owner").await.unwrap();
    let acquired = recv(&mut socket).await;
    assert_eq!(acquired.prior_state().unwrap(), Some(b"S1".to_vec()));

    let build = orchestrator.cancel_build(&alice, &stop.id).await.unwrap();
    assert_eq!(build.status, JobStatus::Running);

    match recv(&mut socket).await {
        ServerMessage::Cancel { job_id } => assert_eq!(Some(job_id), stop.job_id),
        other => panic!("expected cancel, got {:?}", other),
    }
    send(&mut socket, WorkerMessage::Canceled).await;
    assert!(matches!(
        recv(&mut socket).await,
        ServerMessage::CommitAccepted { .. }
    ));

    let build = orchestrator.get_build(&alice, &stop.id).await.unwrap();
    assert_eq!(build.status, JobStatus::Canceled);
}

#[tokio::test]
async fn test_disconnect_requeues_running_job() {
    let (app, orchestrator, _) = common::create_test_app().await;
    let addr = common::spawn_server(app).await;
    let alice = user("alice");

    let created = orchestrator
        .create_workspace(&alice, CreateWorkspaceRequest::new("dev", "tv-1"))
        .await
        .unwrap();
    let job_id = created.build.unwrap().job_id.unwrap();

    let mut socket = connect(addr, "owner").await.unwrap();
    assert!(matches!(
        recv(&mut socket).await,
        ServerMessage::AcquiredJob { .. }
    ));
    assert_eq!(
        orchestrator.get_job(&alice, &job_id).await.unwrap().status,
        JobStatus::Running
    );

    socket.close(None).await.unwrap();
    drop(socket);

    let mut job = orchestrator.get_job(&alice, &job_id).await.unwrap();
    for _ in 0..200 {
        if job.status == JobStatus::Pending {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
        job = orchestrator.get_job(&alice, &job_id).await.unwrap();
    }

    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 1);
    assert!(job.worker_id.is_none());
    assert!(orchestrator.sessions().registry().list().is_empty());
}

#[tokio::test]
async fn test_member_cannot_serve_jobs() {
    let (app, _, _) = common::create_test_app().await;
    let addr = common::spawn_server(app).await;

    match connect(addr, "member").await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 403),
        Ok(_) => panic!("member was allowed to serve jobs"),
        Err(other) => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_invalid_frame_is_reported_without_ending_job() {
    let (app, orchestrator, _) = common::create_test_app().await;
    let addr = common::spawn_server(app).await;
    let alice = user("alice");

    let created = orchestrator
        .create_workspace(&alice, CreateWorkspaceRequest::new("dev", "tv-1"))
        .await
        .unwrap();
    let job_id = created.build.unwrap().job_id.unwrap();

    let mut socket = connect(addr, "owner").await.unwrap();
    recv(&mut socket).await;

    socket
        .send(Message::text(r#"{"type":"succeeded","state":"***"}"#))
        .await
        .unwrap();
    assert!(matches!(
        recv(&mut socket).await,
        ServerMessage::Error { .. }
    ));

    send(
        &mut socket,
        WorkerMessage::Failed {
            error: "plan failed".to_string(),
        },
    )
    .await;
    assert!(matches!(
        recv(&mut socket).await,
        ServerMessage::CommitAccepted { .. }
    ));

    let job = orchestrator.get_job(&alice, &job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("plan failed"));
}

#[tokio::test]
async fn test_session_survives_job_taken_back() {
    let (app, orchestrator, _) = common::create_test_app().await;
    let addr = common::spawn_server(app).await;
    let alice = user("alice");

    let created = orchestrator
        .create_workspace(&alice, CreateWorkspaceRequest::new("dev", "tv-1"))
        .await
        .unwrap();
    let job_id = created.build.unwrap().job_id.unwrap();

    let mut socket = connect(addr, "owner").await.unwrap();
    recv(&mut socket).await;

    // The engine hands the job back to the queue behind the worker's back.
    let job = orchestrator.get_job(&alice, &job_id).await.unwrap();
    orchestrator
        .sessions()
        .recover_lost_job(&job, "taken back")
        .await
        .unwrap();

    send(
        &mut socket,
        WorkerMessage::Succeeded {
            state: b"late".to_vec(),
        },
    )
    .await;
    assert!(matches!(
        recv(&mut socket).await,
        ServerMessage::Error { .. }
    ));

    // Same session, same job, second attempt.
    match recv(&mut socket).await {
        ServerMessage::AcquiredJob { job, .. } => {
            assert_eq!(job.id, job_id);
            assert_eq!(job.attempts, 2);
        }
        other => panic!("expected acquired_job, got {:?}", other),
    }
}
