//! Registry of worker sessions connected to this engine process.
//!
//! Sessions are ephemeral: they live exactly as long as the worker's
//! connection. Each session carries two signals, one telling the worker to
//! cancel a job and one telling blocked callers the session has closed.

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WorkerSession {
    pub id: String,
    pub name: String,
    pub tags: BTreeSet<String>,
    pub current_job_id: Option<String>,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug)]
struct SessionEntry {
    session: WorkerSession,
    cancel_tx: watch::Sender<Option<String>>,
    closed_tx: watch::Sender<bool>,
}

#[derive(Clone, Debug)]
pub struct WorkerRegistry {
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
    clock: Arc<dyn Clock>,
}

impl WorkerRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, name: &str, tags: BTreeSet<String>) -> WorkerSession {
        let session = WorkerSession {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            tags,
            current_job_id: None,
            connected_at: self.clock.now(),
        };

        let (cancel_tx, _) = watch::channel(None);
        let (closed_tx, _) = watch::channel(false);

        self.lock().insert(
            session.id.clone(),
            SessionEntry {
                session: session.clone(),
                cancel_tx,
                closed_tx,
            },
        );

        session
    }

    /// Remove a session and wake anything waiting on it.
    pub fn remove(&self, session_id: &str) -> Option<WorkerSession> {
        let entry = self.lock().remove(session_id)?;
        let _ = entry.closed_tx.send(true);
        Some(entry.session)
    }

    /// Mark a session closed without removing it, so blocked acquisitions
    /// return and the owner can still unregister it.
    pub fn close(&self, session_id: &str) {
        if let Some(entry) = self.lock().get(session_id) {
            entry.closed_tx.send_replace(true);
        }
    }

    pub fn get(&self, session_id: &str) -> Option<WorkerSession> {
        self.lock().get(session_id).map(|e| e.session.clone())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    /// True if the session is registered here and currently holds `job_id`.
    pub fn holds(&self, session_id: &str, job_id: &str) -> bool {
        self.lock()
            .get(session_id)
            .is_some_and(|e| e.session.current_job_id.as_deref() == Some(job_id))
    }

    pub fn list(&self) -> Vec<WorkerSession> {
        self.lock().values().map(|e| e.session.clone()).collect()
    }

    /// Returns false if the session is gone.
    pub fn set_current_job(&self, session_id: &str, job_id: Option<String>) -> bool {
        match self.lock().get_mut(session_id) {
            Some(entry) => {
                entry.session.current_job_id = job_id;
                true
            }
            None => false,
        }
    }

    /// Clear the session's job only if it is still `job_id`.
    pub fn finish_job(&self, session_id: &str, job_id: &str) {
        if let Some(entry) = self.lock().get_mut(session_id) {
            if entry.session.current_job_id.as_deref() == Some(job_id) {
                entry.session.current_job_id = None;
            }
        }
    }

    /// Ask the worker holding `job_id` to stop. Returns false if the session is gone.
    pub fn signal_cancel(&self, session_id: &str, job_id: &str) -> bool {
        match self.lock().get(session_id) {
            Some(entry) => {
                entry.cancel_tx.send_replace(Some(job_id.to_string()));
                true
            }
            None => false,
        }
    }

    pub fn cancel_signal(&self, session_id: &str) -> Option<watch::Receiver<Option<String>>> {
        self.lock().get(session_id).map(|e| e.cancel_tx.subscribe())
    }

    pub fn closed_signal(&self, session_id: &str) -> Option<watch::Receiver<bool>> {
        self.lock().get(session_id).map(|e| e.closed_tx.subscribe())
    }
}
