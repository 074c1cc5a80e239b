//! The per-session dispatch loop.
//!
//! One dispatcher owns one transport. A reader task feeds inbound messages
//! into the loop, a writer task drains the outbound queue onto the
//! transport, and every accepted request runs on its own task so responses
//! can complete out of order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::access::AccessControl;
use crate::protocol::error_mapper::ErrorMapper;
use crate::protocol::handler::ProtocolHandler;
use crate::protocol::negotiation::{ensure_same_protocol, negotiate};
use crate::protocol::validator::{parse_params, validate_method_name};
use crate::registry::{ProtocolRegistry, RegistryError};
use crate::transport::{Inbound, Transport};
use crate::types::{
    CancelRequestParams, InitializeParams, InitializeResult, LogLevel, LogMessageParams, MalformedEnvelope,
    McpError, McpResult, Message, Notification, Request, RequestId, RequestMeta, Response,
};

use super::inflight::InFlightTable;
use super::state::SessionState;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default grace period for in-flight requests when a session closes.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default depth of a session's inbound and outbound queues.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Tunables shared by every session of a server.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub default_timeout: Duration,
    /// Per-protocol overrides of `default_timeout`.
    pub protocol_timeouts: HashMap<String, Duration>,
    pub drain_timeout: Duration,
    pub queue_depth: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            protocol_timeouts: HashMap::new(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl DispatchOptions {
    /// Timeout applied to one request against `protocol`.
    pub fn timeout_for(&self, protocol: &str) -> Duration {
        self.protocol_timeouts
            .get(protocol)
            .copied()
            .unwrap_or(self.default_timeout)
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    /// Client sent `close`.
    Requested,
    /// Server is shutting down.
    Stopping,
    /// Negotiation found no compatible protocol.
    Rejected,
    Disconnected,
    TransportFailed,
}

impl CloseReason {
    /// Whether in-flight requests get a chance to finish.
    fn drains(self) -> bool {
        matches!(self, CloseReason::Requested | CloseReason::Stopping)
    }
}

/// Drives one session through `Initializing → … → Closed`.
pub struct Dispatcher {
    session_id: String,
    transport: Arc<dyn Transport>,
    registry: Arc<ProtocolRegistry>,
    access: Arc<AccessControl>,
    options: Arc<DispatchOptions>,
    state: watch::Sender<SessionState>,
    handler: Option<ProtocolHandler>,
    initialized: Option<InitializeResult>,
    opened_at: DateTime<Utc>,
}

/// Per-run plumbing handed to the message handlers.
struct Plumbing {
    out: mpsc::Sender<Message>,
    inflight: InFlightTable,
    session_token: CancellationToken,
    tasks: JoinSet<()>,
}

impl Dispatcher {
    pub fn new(
        session_id: String,
        transport: Arc<dyn Transport>,
        registry: Arc<ProtocolRegistry>,
        access: Arc<AccessControl>,
        options: Arc<DispatchOptions>,
        state: watch::Sender<SessionState>,
    ) -> Self {
        Self {
            session_id,
            transport,
            registry,
            access,
            options,
            state,
            handler: None,
            initialized: None,
            opened_at: Utc::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn transition(&self, next: SessionState) {
        let current = self.state();
        if current.can_transition_to(next) {
            tracing::debug!("Session {}: {current} -> {next}", self.session_id);
            self.state.send_replace(next);
        } else if current != next {
            tracing::warn!("Session {}: ignoring transition {current} -> {next}", self.session_id);
        }
    }

    /// Run until the peer disconnects, the client closes, or `stop` fires.
    pub async fn run(mut self, stop: CancellationToken) {
        tracing::info!("Session {} opened on {}", self.session_id, self.transport.kind());

        let (out_tx, out_rx) = mpsc::channel(self.options.queue_depth);
        let mut writer = tokio::spawn(write_loop(Arc::clone(&self.transport), out_rx));
        let (in_tx, mut in_rx) = mpsc::channel(self.options.queue_depth);
        let reader = tokio::spawn(read_loop(Arc::clone(&self.transport), in_tx));

        let mut io = Plumbing {
            inflight: InFlightTable::new(out_tx.clone()),
            out: out_tx,
            session_token: CancellationToken::new(),
            tasks: JoinSet::new(),
        };
        let mut writer_done = false;

        let reason = loop {
            tokio::select! {
                _ = stop.cancelled() => break CloseReason::Stopping,
                written = &mut writer, if !writer_done => {
                    writer_done = true;
                    match written {
                        Ok(Ok(())) => tracing::debug!("Session {}: writer finished", self.session_id),
                        Ok(Err(e)) => tracing::warn!("Session {}: send failed: {e}", self.session_id),
                        Err(e) => tracing::error!("Session {}: writer task failed: {e}", self.session_id),
                    }
                    break CloseReason::TransportFailed;
                }
                Some(joined) = io.tasks.join_next(), if !io.tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Session {}: request task failed: {e}", self.session_id);
                    }
                }
                inbound = in_rx.recv() => match inbound {
                    None | Some(Ok(None)) => break CloseReason::Disconnected,
                    Some(Err(e)) => {
                        tracing::warn!("Session {}: transport failure: {e}", self.session_id);
                        let record = ErrorMapper::map(&e);
                        emit(&io.out, log_entry(LogLevel::Error, json!({ "error": record }))).await;
                        break CloseReason::TransportFailed;
                    }
                    Some(Ok(Some(Inbound::Malformed(malformed)))) => self.on_malformed(&io, malformed).await,
                    Some(Ok(Some(Inbound::Message(message)))) => {
                        if let Some(reason) = self.on_message(&mut io, message).await {
                            break reason;
                        }
                    }
                },
            }
        };

        self.close(io, reason, writer, writer_done, reader).await;
    }

    async fn on_malformed(&self, io: &Plumbing, malformed: MalformedEnvelope) {
        tracing::debug!("Session {}: {}", self.session_id, malformed.reason);
        let error = McpError::invalid(malformed.reason);
        match malformed.id {
            Some(id) => emit(&io.out, Response::error(id, ErrorMapper::map(&error)).into()).await,
            // nothing to correlate a response with
            None => {
                let record = ErrorMapper::map(&error);
                emit(&io.out, log_entry(LogLevel::Warning, json!({ "error": record }))).await;
            }
        }
    }

    async fn on_message(&mut self, io: &mut Plumbing, message: Message) -> Option<CloseReason> {
        match message {
            Message::Request(request) => self.on_request(io, request).await,
            Message::Notification(notification) => {
                self.on_notification(io, notification).await;
                None
            }
            Message::Response(response) => {
                tracing::debug!(
                    "Session {}: ignoring unsolicited response for {}",
                    self.session_id,
                    response.id
                );
                None
            }
        }
    }

    async fn on_request(&mut self, io: &mut Plumbing, request: Request) -> Option<CloseReason> {
        if let Err(e) = validate_method_name(&request.method) {
            reply(&io.out, request.id, Err(e)).await;
            return None;
        }

        match request.method.as_str() {
            "ping" => {
                reply(&io.out, request.id, Ok(json!({}))).await;
                None
            }
            "initialize" => self.on_initialize(io, request).await,
            "close" => {
                reply(&io.out, request.id, Ok(json!({}))).await;
                Some(CloseReason::Requested)
            }
            _ => {
                match self.handler.clone() {
                    Some(handler) => self.spawn_request(io, handler, request).await,
                    None => {
                        let err = McpError::invalid(format!(
                            "session not initialized: '{}' requires a prior initialize",
                            request.method
                        ));
                        reply(&io.out, request.id, Err(err)).await;
                    }
                }
                None
            }
        }
    }

    async fn on_initialize(&mut self, io: &Plumbing, request: Request) -> Option<CloseReason> {
        let params: InitializeParams = match parse_params("initialize", request.params) {
            Ok(params) => params,
            Err(e) => {
                reply(&io.out, request.id, Err(e)).await;
                return None;
            }
        };

        // already negotiated: only the same protocol may be asked for again
        if let (Some(handler), Some(result)) = (&self.handler, &self.initialized) {
            let outcome = ensure_same_protocol(handler.binding(), &params)
                .and_then(|()| Ok(serde_json::to_value(result)?));
            reply(&io.out, request.id, outcome).await;
            return None;
        }

        let negotiated = negotiate(
            &self.registry,
            &self.access,
            params,
            self.transport.credential(),
            &self.session_id,
        )
        .await;

        match negotiated {
            Ok(negotiated) => {
                self.handler = Some(ProtocolHandler::new(
                    negotiated.binding,
                    negotiated.identity,
                    Arc::clone(&self.access),
                ));
                self.transition(SessionState::Negotiated);
                let outcome = serde_json::to_value(&negotiated.result).map_err(McpError::from);
                self.initialized = Some(negotiated.result);
                reply(&io.out, request.id, outcome).await;
                self.transition(SessionState::Active);
                None
            }
            Err(e) => {
                let rejected = matches!(
                    e,
                    McpError::NoCompatibleProtocol(_)
                        | McpError::Registry(RegistryError::NoCompatibleProtocol { .. })
                );
                reply(&io.out, request.id, Err(e)).await;
                rejected.then_some(CloseReason::Rejected)
            }
        }
    }

    async fn spawn_request(&self, io: &mut Plumbing, handler: ProtocolHandler, request: Request) {
        let Request { id, method, params } = request;
        let meta = RequestMeta::from_params(params.as_ref());

        let Some(cancel) = io
            .inflight
            .start(id.clone(), &io.session_token, meta.progress_token)
            .await
        else {
            tracing::warn!("Session {}: duplicate in-flight id {id}", self.session_id);
            let data = json!({ "message": "duplicate request id ignored", "requestId": id });
            emit(&io.out, log_entry(LogLevel::Warning, data)).await;
            return;
        };

        let timeout = self.options.timeout_for(&handler.binding().descriptor.name);
        let inflight = io.inflight.clone();
        let out = io.out.clone();
        let session_token = io.session_token.clone();

        io.tasks.spawn(async move {
            inflight.update(&id, 0.0, None).await;

            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(if session_token.is_cancelled() {
                    McpError::SessionClosed
                } else {
                    McpError::Cancelled
                }),
                result = tokio::time::timeout(timeout, handler.handle(&method, params)) => {
                    result.unwrap_or(Err(McpError::Timeout(timeout)))
                }
            };

            if outcome.is_ok() {
                inflight.update(&id, 1.0, Some(1.0)).await;
            }
            inflight.complete(&id).await;
            reply(&out, id, outcome).await;
        });
    }

    async fn on_notification(&self, io: &mut Plumbing, notification: Notification) {
        let Notification { method, params } = notification;
        match method.as_str() {
            "notifications/initialized" => {}
            "notifications/cancelled" | "$/cancelRequest" => {
                match parse_params::<CancelRequestParams>(&method, params) {
                    Ok(cancel) => {
                        if io.inflight.cancel(&cancel.request_id).await {
                            tracing::debug!(
                                "Session {}: cancelled {} ({})",
                                self.session_id,
                                cancel.request_id,
                                cancel.reason.as_deref().unwrap_or("no reason")
                            );
                        }
                    }
                    Err(e) => report(&io.out, &method, &e).await,
                }
            }
            _ => {
                let Some(handler) = self.handler.clone() else {
                    let err = McpError::invalid(format!("session not initialized: '{method}' ignored"));
                    report(&io.out, &method, &err).await;
                    return;
                };

                let timeout = self.options.timeout_for(&handler.binding().descriptor.name);
                let out = io.out.clone();
                let session_token = io.session_token.clone();

                io.tasks.spawn(async move {
                    let outcome = tokio::select! {
                        _ = session_token.cancelled() => Err(McpError::SessionClosed),
                        result = tokio::time::timeout(timeout, handler.handle(&method, params)) => {
                            result.unwrap_or(Err(McpError::Timeout(timeout)))
                        }
                    };
                    if let Err(e) = outcome {
                        report(&out, &method, &e).await;
                    }
                });
            }
        }
    }

    async fn close(
        self,
        mut io: Plumbing,
        reason: CloseReason,
        writer: JoinHandle<McpResult<()>>,
        writer_done: bool,
        reader: JoinHandle<()>,
    ) {
        self.transition(SessionState::Closing);
        tracing::debug!("Session {} closing ({reason:?})", self.session_id);

        if reason.drains() && !io.tasks.is_empty() {
            let drain = async {
                while io.tasks.join_next().await.is_some() {}
            };
            if tokio::time::timeout(self.options.drain_timeout, drain).await.is_err() {
                tracing::info!(
                    "Session {}: {} requests still running after drain",
                    self.session_id,
                    io.inflight.len().await
                );
            }
        }

        // whatever is still outstanding is answered with SessionClosed
        io.session_token.cancel();
        while io.tasks.join_next().await.is_some() {}

        let Plumbing { out, inflight, .. } = io;
        drop(inflight);
        drop(out);

        if !writer_done {
            let mut writer = writer;
            match tokio::time::timeout(self.options.drain_timeout, &mut writer).await {
                Ok(Ok(Err(e))) => tracing::debug!("Session {}: final flush failed: {e}", self.session_id),
                Ok(_) => {}
                Err(_) => writer.abort(),
            }
        }

        if let Err(e) = self.transport.close().await {
            tracing::debug!("Session {}: close failed: {e}", self.session_id);
        }
        reader.abort();

        self.transition(SessionState::Closed);
        let lifetime = Utc::now().signed_duration_since(self.opened_at);
        tracing::info!(
            "Session {} closed after {}s ({reason:?})",
            self.session_id,
            lifetime.num_seconds()
        );
    }
}

async fn read_loop(transport: Arc<dyn Transport>, tx: mpsc::Sender<McpResult<Option<Inbound>>>) {
    loop {
        let next = transport.receive().await;
        let last = !matches!(next, Ok(Some(_)));
        if tx.send(next).await.is_err() || last {
            break;
        }
    }
}

async fn write_loop(transport: Arc<dyn Transport>, mut rx: mpsc::Receiver<Message>) -> McpResult<()> {
    while let Some(message) = rx.recv().await {
        transport.send(&message).await?;
    }
    Ok(())
}

async fn emit(out: &mpsc::Sender<Message>, message: Message) {
    if out.send(message).await.is_err() {
        tracing::debug!("Outbound queue closed, message dropped");
    }
}

async fn reply(out: &mpsc::Sender<Message>, id: RequestId, outcome: McpResult<Value>) {
    let response = match outcome {
        Ok(result) => Response::success(id, result),
        Err(e) => {
            tracing::debug!("Request {id} failed: {e}");
            Response::error(id, ErrorMapper::map(&e))
        }
    };
    emit(out, response.into()).await;
}

/// Failures without a request id go to the client as log entries.
async fn report(out: &mpsc::Sender<Message>, method: &str, error: &McpError) {
    tracing::warn!("Notification {method} failed: {error}");
    let data = json!({ "method": method, "error": ErrorMapper::map(error) });
    emit(out, log_entry(LogLevel::Warning, data)).await;
}

fn log_entry(level: LogLevel, data: Value) -> Message {
    let mut data = data;
    if let Value::Object(map) = &mut data {
        map.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
    }
    Message::Notification(LogMessageParams::new(level, "capgate", data).into_notification())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_protocol_timeouts_override_the_default() {
        let mut options = DispatchOptions::default();
        options
            .protocol_timeouts
            .insert("file".to_string(), Duration::from_millis(250));
        assert_eq!(options.timeout_for("file"), Duration::from_millis(250));
        assert_eq!(options.timeout_for("data"), DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn only_graceful_closes_drain() {
        assert!(CloseReason::Requested.drains());
        assert!(CloseReason::Stopping.drains());
        assert!(!CloseReason::Disconnected.drains());
        assert!(!CloseReason::TransportFailed.drains());
    }

    #[test]
    fn log_entries_are_stamped() {
        let Message::Notification(note) = log_entry(LogLevel::Warning, json!({"message": "x"})) else {
            panic!("expected a notification");
        };
        let params = note.params.unwrap();
        assert_eq!(params["level"], "warning");
        assert!(params["data"]["timestamp"].is_string());
    }
}
