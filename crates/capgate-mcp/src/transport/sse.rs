//! Event-stream transport: responses and notifications are pushed to the
//! client as server-sent events, requests arrive on a companion HTTP POST
//! channel.
//!
//! [`EventStreamTransport`] is the session-facing half and works over plain
//! channels; the HTTP binding (behind the `sse` feature) feeds those channels.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::codec::Inbound;
use super::Transport;
use crate::types::{McpError, McpResult, Message};

/// Default depth of the per-session request and event queues.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// The connection-facing half of an event-stream session.
pub struct EventChannel {
    /// Submit decoded requests to the session.
    pub submit: mpsc::Sender<Inbound>,
    /// Events to push to the client, in order.
    pub events: mpsc::Receiver<Message>,
}

/// Session-facing half of an event-stream connection.
pub struct EventStreamTransport {
    inbound: Mutex<mpsc::Receiver<Inbound>>,
    outbound: mpsc::Sender<Message>,
    credential: Option<String>,
    closed: CancellationToken,
}

impl EventStreamTransport {
    /// Create a connected transport/channel pair.
    pub fn pair(capacity: usize, credential: Option<String>) -> (Self, EventChannel) {
        let (submit, inbound) = mpsc::channel(capacity);
        let (outbound, events) = mpsc::channel(capacity);
        let transport = Self {
            inbound: Mutex::new(inbound),
            outbound,
            credential,
            closed: CancellationToken::new(),
        };
        (transport, EventChannel { submit, events })
    }
}

#[async_trait]
impl Transport for EventStreamTransport {
    async fn send(&self, message: &Message) -> McpResult<()> {
        if self.closed.is_cancelled() {
            return Err(McpError::Transport("event stream is closed".into()));
        }
        self.outbound
            .send(message.clone())
            .await
            .map_err(|_| McpError::Transport("event stream disconnected".into()))
    }

    async fn receive(&self) -> McpResult<Option<Inbound>> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Ok(None),
            // the client dropped the event stream
            _ = self.outbound.closed() => Ok(None),
            next = inbound.recv() => Ok(next),
        }
    }

    async fn close(&self) -> McpResult<()> {
        self.closed.cancel();
        Ok(())
    }

    fn credential(&self) -> Option<String> {
        self.credential.clone()
    }

    fn kind(&self) -> &'static str {
        "sse"
    }
}

#[cfg(feature = "sse")]
pub use http::{router, SseServer, SseState};

#[cfg(feature = "sse")]
mod http {
    use std::collections::HashMap;
    use std::convert::Infallible;
    use std::sync::{Arc, RwLock};

    use axum::{
        body::Bytes,
        extract::{Query, State},
        http::{header::AUTHORIZATION, HeaderMap, StatusCode},
        response::sse::{Event, KeepAlive, Sse},
        routing::{get, post},
        Router,
    };
    use serde::Deserialize;
    use tokio::net::TcpListener;
    use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceBuilder;
    use tower_http::cors::CorsLayer;

    use super::{EventStreamTransport, DEFAULT_CHANNEL_CAPACITY};
    use crate::session::SessionManager;
    use crate::transport::codec::{self, Inbound};
    use crate::types::{McpError, McpResult};

    type Submitters = Arc<RwLock<HashMap<String, tokio::sync::mpsc::Sender<Inbound>>>>;

    /// Shared state of the HTTP binding.
    #[derive(Clone)]
    pub struct SseState {
        sessions: Arc<SessionManager>,
        submitters: Submitters,
        capacity: usize,
        max_message_bytes: usize,
    }

    impl SseState {
        pub fn new(sessions: Arc<SessionManager>, max_message_bytes: usize) -> Self {
            Self {
                sessions,
                submitters: Arc::new(RwLock::new(HashMap::new())),
                capacity: DEFAULT_CHANNEL_CAPACITY,
                max_message_bytes,
            }
        }

        /// Number of connected event streams.
        pub fn connections(&self) -> usize {
            self.submitters.read().map(|s| s.len()).unwrap_or_default()
        }
    }

    /// Removes a session's submit channel when its event stream is dropped.
    struct Disconnect {
        session_id: String,
        submitters: Submitters,
    }

    impl Drop for Disconnect {
        fn drop(&mut self) {
            if let Ok(mut submitters) = self.submitters.write() {
                submitters.remove(&self.session_id);
            }
            tracing::debug!("Event stream for session {} disconnected", self.session_id);
        }
    }

    #[derive(Deserialize)]
    struct MessageQuery {
        session_id: String,
    }

    fn bearer_token(headers: &HeaderMap) -> Option<String> {
        headers
            .get(AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
            .map(|token| token.trim().to_string())
    }

    /// Routes: `GET /sse`, `POST /message?session_id=`, `GET /health`.
    pub fn router(state: SseState) -> Router {
        Router::new()
            .route("/sse", get(open_stream))
            .route("/message", post(submit_message))
            .route("/health", get(|| async { "ok" }))
            .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
            .with_state(state)
    }

    async fn open_stream(
        State(state): State<SseState>,
        headers: HeaderMap,
    ) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        let (transport, channel) = EventStreamTransport::pair(state.capacity, bearer_token(&headers));
        let session_id = state.sessions.spawn(Arc::new(transport)).await;

        if let Ok(mut submitters) = state.submitters.write() {
            submitters.insert(session_id.clone(), channel.submit);
        }
        tracing::info!("Event stream opened for session {session_id}");

        let guard = Disconnect {
            session_id: session_id.clone(),
            submitters: state.submitters.clone(),
        };
        let endpoint = Event::default()
            .event("endpoint")
            .data(format!("/message?session_id={session_id}"));

        let events = ReceiverStream::new(channel.events).map(move |message| {
            let _connected = &guard;
            Ok(match codec::encode(&message) {
                Ok(json) => Event::default().event("message").data(json),
                Err(e) => Event::default().event("error").data(e.to_string()),
            })
        });

        Sse::new(tokio_stream::once(Ok(endpoint)).chain(events)).keep_alive(KeepAlive::default())
    }

    async fn submit_message(
        State(state): State<SseState>,
        Query(query): Query<MessageQuery>,
        body: Bytes,
    ) -> (StatusCode, String) {
        if body.len() > state.max_message_bytes {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("message exceeds {} bytes", state.max_message_bytes),
            );
        }

        let inbound = match codec::decode(&body) {
            Ok(inbound) => inbound,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()),
        };

        let submit = state
            .submitters
            .read()
            .ok()
            .and_then(|s| s.get(&query.session_id).cloned());
        let Some(submit) = submit else {
            return (StatusCode::NOT_FOUND, format!("unknown session {}", query.session_id));
        };

        match submit.send(inbound).await {
            Ok(()) => (StatusCode::ACCEPTED, "accepted".to_string()),
            Err(_) => (StatusCode::GONE, "session closed".to_string()),
        }
    }

    /// HTTP listener for event-stream sessions.
    pub struct SseServer {
        state: SseState,
    }

    impl SseServer {
        pub fn new(state: SseState) -> Self {
            Self { state }
        }

        /// Serve until `shutdown` fires.
        pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> McpResult<()> {
            if let Ok(addr) = listener.local_addr() {
                tracing::info!("SSE transport listening on {addr}");
            }
            axum::serve(listener, router(self.state))
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .map_err(|e| McpError::Transport(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Notification, Request};

    #[tokio::test]
    async fn directions_are_independent() {
        let (transport, mut channel) = EventStreamTransport::pair(4, Some("token".into()));
        assert_eq!(transport.credential().as_deref(), Some("token"));

        // a push may go out before any request arrives
        let note = Message::Notification(Notification::new("notifications/message", None));
        transport.send(&note).await.unwrap();
        assert_eq!(channel.events.recv().await, Some(note));

        let req = Message::Request(Request::new("r1", "ping", None));
        channel.submit.send(Inbound::Message(req.clone())).await.unwrap();
        assert_eq!(transport.receive().await.unwrap(), Some(Inbound::Message(req)));
    }

    #[tokio::test]
    async fn dropping_the_stream_ends_the_session() {
        let (transport, channel) = EventStreamTransport::pair(4, None);
        drop(channel.events);
        assert!(transport.receive().await.unwrap().is_none());

        let msg = Message::Request(Request::new("r2", "ping", None));
        assert!(transport.send(&msg).await.is_err());
    }

    #[tokio::test]
    async fn close_wakes_receive() {
        let (transport, _channel) = EventStreamTransport::pair(4, None);
        transport.close().await.unwrap();
        assert!(transport.receive().await.unwrap().is_none());
    }
}
