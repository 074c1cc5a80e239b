//! In-flight request tracking: cancellation handles and progress tokens.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::types::{Message, ProgressParams, ProgressToken, RequestId};

/// State of one outstanding request.
#[derive(Debug)]
struct InFlightEntry {
    cancel: CancellationToken,
    progress: Option<ProgressToken>,
    started: Instant,
}

/// Outstanding requests of one session, keyed by request id.
#[derive(Clone)]
pub struct InFlightTable {
    active: Arc<RwLock<HashMap<RequestId, InFlightEntry>>>,
    notification_tx: mpsc::Sender<Message>,
}

impl InFlightTable {
    /// Create a table that reports progress on `notification_tx`.
    pub fn new(notification_tx: mpsc::Sender<Message>) -> Self {
        Self {
            active: Arc::new(RwLock::new(HashMap::new())),
            notification_tx,
        }
    }

    /// Track a new request. Returns its cancellation token, or `None` if the
    /// id is already in flight.
    pub async fn start(
        &self,
        id: RequestId,
        parent: &CancellationToken,
        progress: Option<ProgressToken>,
    ) -> Option<CancellationToken> {
        let mut active = self.active.write().await;
        if active.contains_key(&id) {
            return None;
        }
        let cancel = parent.child_token();
        active.insert(
            id,
            InFlightEntry {
                cancel: cancel.clone(),
                progress,
                started: Instant::now(),
            },
        );
        Some(cancel)
    }

    /// Report progress for a request that asked for it.
    pub async fn update(&self, id: &RequestId, progress: f64, total: Option<f64>) {
        let token = {
            let active = self.active.read().await;
            match active.get(id).and_then(|entry| entry.progress.clone()) {
                Some(token) => token,
                None => return,
            }
        };

        let params = ProgressParams {
            progress_token: token,
            progress,
            total,
        };
        let _ = self
            .notification_tx
            .send(Message::Notification(params.into_notification()))
            .await;
    }

    /// Cancel one request. Returns false if it is not in flight.
    pub async fn cancel(&self, id: &RequestId) -> bool {
        match self.active.read().await.get(id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop tracking a finished request.
    pub async fn complete(&self, id: &RequestId) {
        if let Some(entry) = self.active.write().await.remove(id) {
            tracing::trace!("Request {id} finished in {:?}", entry.started.elapsed());
        }
    }

    pub async fn len(&self) -> usize {
        self.active.read().await.len()
    }
}
