use crate::{
    error::{ApiError, ApiResult, ErrorBody},
    state::AppState,
    wire::{ServerMessage, WorkerFrame},
};
use anyhow::Context;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    routing::get,
    Extension, Json, Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use hangar_orchestrator::{Actor, OrchestratorError, ReportAck, Role, Scheduler, WorkerSession};
use serde::Deserialize;
use std::collections::BTreeSet;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use utoipa::IntoParams;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/provisioner/serve", get(serve_provisioner))
        .route("/api/v1/provisioner/sessions", get(list_sessions))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ServeQuery {
    /// Comma-separated capability tags the worker advertises
    pub tags: Option<String>,
    /// Display name, defaults to the authenticated user
    pub name: Option<String>,
}

fn require_provisioner(actor: &Actor) -> ApiResult<()> {
    if actor.has_role(Role::Owner) || actor.has_role(Role::TemplateAdmin) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "{} may not act as a provisioner",
            actor.id
        )))
    }
}

fn parse_tags(value: Option<&str>) -> BTreeSet<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[utoipa::path(
    get,
    path = "/api/v1/provisioner/serve",
    params(ServeQuery),
    responses(
        (status = 101, description = "Switching to the worker websocket protocol"),
        (status = 403, description = "Caller may not act as a provisioner", body = ErrorBody)
    ),
    tag = "provisioner"
)]
pub async fn serve_provisioner(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<ServeQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    require_provisioner(&actor)?;

    let tags = parse_tags(query.tags.as_deref());
    let name = query.name.unwrap_or_else(|| actor.id.clone());
    let scheduler = state.orchestrator.scheduler().clone();

    Ok(ws.on_upgrade(move |socket| run_session(socket, scheduler, name, tags)))
}

#[utoipa::path(
    get,
    path = "/api/v1/provisioner/sessions",
    responses(
        (status = 200, description = "Worker sessions connected to this process", body = Vec<WorkerSession>),
        (status = 403, description = "Permission denied", body = ErrorBody)
    ),
    tag = "provisioner"
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<Vec<WorkerSession>>> {
    require_provisioner(&actor)?;

    let mut sessions = state.orchestrator.sessions().registry().list();
    sessions.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));

    Ok(Json(sessions))
}

type Sender = SplitSink<WebSocket, Message>;

async fn run_session(socket: WebSocket, scheduler: Scheduler, name: String, tags: BTreeSet<String>) {
    let sessions = scheduler.sessions().clone();
    let session = sessions.register(&name, tags);
    let (mut sender, mut receiver) = socket.split();
    let (frames_tx, mut frames) = mpsc::channel::<String>(32);

    // Forward text frames; a closed socket closes the session so a blocked
    // acquisition returns.
    let registry = sessions.registry().clone();
    let session_id = session.id.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => {
                    if frames_tx.send(text.to_string()).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        registry.close(&session_id);
    });

    if let Err(e) = serve_jobs(&scheduler, &session.id, &mut sender, &mut frames).await {
        warn!(session_id = %session.id, "Worker session ended: {:#}", e);
    }

    reader.abort();
    match sessions.unregister(&session.id).await {
        Ok(Some(outcome)) => info!(session_id = %session.id, ?outcome, "Recovered job of disconnected worker"),
        Ok(None) => {}
        Err(e) => error!(session_id = %session.id, "Failed to unregister worker session: {}", e),
    }
}

async fn serve_jobs(
    scheduler: &Scheduler,
    session_id: &str,
    sender: &mut Sender,
    frames: &mut mpsc::Receiver<String>,
) -> anyhow::Result<()> {
    let sessions = scheduler.sessions();
    let mut cancel = sessions
        .registry()
        .cancel_signal(session_id)
        .context("worker session vanished")?;

    while let Some(acquired) = sessions.next_job(session_id).await? {
        while frames.try_recv().is_ok() {
            debug!("Dropping worker frame received between jobs");
        }

        let job_id = acquired.job.id.clone();
        send(sender, &ServerMessage::from(acquired)).await?;

        let mut cancel_sent = false;
        loop {
            tokio::select! {
                frame = frames.recv() => {
                    let Some(text) = frame else {
                        return Ok(());
                    };
                    let message = match serde_json::from_str::<WorkerFrame>(&text)
                        .map_err(anyhow::Error::from)
                        .and_then(|f| f.into_message().map_err(anyhow::Error::from))
                    {
                        Ok(message) => message,
                        Err(e) => {
                            send(sender, &ServerMessage::Error { message: format!("invalid frame: {}", e) }).await?;
                            continue;
                        }
                    };

                    let terminal = message.is_terminal();
                    let done = match scheduler.report(session_id, &job_id, message).await {
                        Ok(ReportAck::Progress) => false,
                        Ok(ReportAck::CommitAccepted) => {
                            send(sender, &ServerMessage::CommitAccepted { job_id: job_id.clone() }).await?;
                            terminal
                        }
                        Ok(ReportAck::AlreadyCompleted(status)) => {
                            send(sender, &ServerMessage::AlreadyCompleted { job_id: job_id.clone(), status }).await?;
                            true
                        }
                        Err(e) => {
                            // The job moved on without this worker, e.g. the reaper took it back.
                            let lost = matches!(
                                e,
                                OrchestratorError::InvalidState(_) | OrchestratorError::NotFound(_)
                            );
                            send(sender, &ServerMessage::Error { message: e.to_string() }).await?;
                            if lost {
                                sessions.registry().finish_job(session_id, &job_id);
                            }
                            lost
                        }
                    };
                    if done {
                        break;
                    }
                }
                requested = cancel_requested(&mut cancel, &job_id), if !cancel_sent => {
                    cancel_sent = true;
                    if requested {
                        send(sender, &ServerMessage::Cancel { job_id: job_id.clone() }).await?;
                    }
                }
            }
        }
    }

    Ok(())
}

async fn cancel_requested(cancel: &mut watch::Receiver<Option<String>>, job_id: &str) -> bool {
    cancel
        .wait_for(|c| c.as_deref() == Some(job_id))
        .await
        .is_ok()
}

async fn send(sender: &mut Sender, message: &ServerMessage) -> anyhow::Result<()> {
    let text = serde_json::to_string(message)?;
    sender.send(Message::Text(text.into())).await?;
    Ok(())
}
