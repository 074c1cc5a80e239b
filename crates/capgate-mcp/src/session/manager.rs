//! Session bookkeeping: spawning dispatchers and waiting for them to end.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::access::AccessControl;
use crate::registry::ProtocolRegistry;
use crate::transport::Transport;

use super::dispatcher::{DispatchOptions, Dispatcher};
use super::state::SessionState;

/// A live session as seen from outside its dispatcher.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub transport: &'static str,
    pub opened_at: DateTime<Utc>,
    state: watch::Receiver<SessionState>,
}

impl SessionInfo {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait until the session reaches `Closed`.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        // a dropped sender means the dispatcher is gone
        let _ = state.wait_for(|s| s.is_terminal()).await;
    }
}

/// Owns every session of one server.
pub struct SessionManager {
    registry: Arc<ProtocolRegistry>,
    access: Arc<AccessControl>,
    options: Arc<DispatchOptions>,
    sessions: Arc<RwLock<HashMap<String, SessionInfo>>>,
    stop: CancellationToken,
}

impl SessionManager {
    pub fn new(registry: Arc<ProtocolRegistry>, access: Arc<AccessControl>, options: DispatchOptions) -> Self {
        Self {
            registry,
            access,
            options: Arc::new(options),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            stop: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ProtocolRegistry> {
        &self.registry
    }

    pub fn access(&self) -> &Arc<AccessControl> {
        &self.access
    }

    /// Start a session on `transport` and return its id.
    pub async fn spawn(&self, transport: Arc<dyn Transport>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let (state_tx, state_rx) = watch::channel(SessionState::Initializing);

        let info = SessionInfo {
            id: id.clone(),
            transport: transport.kind(),
            opened_at: Utc::now(),
            state: state_rx,
        };
        self.sessions.write().await.insert(id.clone(), info);

        let dispatcher = Dispatcher::new(
            id.clone(),
            transport,
            Arc::clone(&self.registry),
            Arc::clone(&self.access),
            Arc::clone(&self.options),
            state_tx,
        );
        let sessions = Arc::clone(&self.sessions);
        let stop = self.stop.clone();
        let session_id = id.clone();
        tokio::spawn(async move {
            dispatcher.run(stop).await;
            sessions.write().await.remove(&session_id);
        });

        id
    }

    pub async fn get(&self, id: &str) -> Option<SessionInfo> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Number of sessions that have not reached `Closed`.
    pub async fn live(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| !s.state().is_terminal())
            .count()
    }

    /// Ask every session to close. In-flight requests get the drain period.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Wait for every current session to close. Returns false on timeout.
    pub async fn wait_all(&self, timeout: Duration) -> bool {
        let sessions = self.list().await;
        let all_closed = async {
            for session in &sessions {
                session.closed().await;
            }
        };
        tokio::time::timeout(timeout, all_closed).await.is_ok()
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("protocols", &self.registry.len())
            .field("stopping", &self.stop.is_cancelled())
            .finish()
    }
}
