//! Server entry point: `Server::start` wires a registry, an access policy
//! and a transport together and returns a handle for graceful shutdown.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::access::{spawn_sweeper, AccessControl};
use crate::config::{ServerConfig, TransportKind};
use crate::registry::ProtocolRegistry;
use crate::session::{DispatchOptions, SessionManager};
use crate::transport::{StdioTransport, Transport, DEFAULT_MAX_MESSAGE_BYTES};
use crate::types::{McpError, McpResult};

/// Which transport to listen on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    /// One session over the process's stdin/stdout.
    Stdio,
    /// Event-stream sessions over HTTP.
    #[cfg(feature = "sse")]
    Http { bind: String },
    /// No listener; sessions are attached with [`ServerHandle::connect`].
    Manual,
}

impl TransportConfig {
    pub fn from_config(config: &ServerConfig) -> McpResult<Self> {
        match config.transport {
            TransportKind::Stdio => Ok(TransportConfig::Stdio),
            #[cfg(feature = "sse")]
            TransportKind::Http => Ok(TransportConfig::Http {
                bind: config.bind.clone(),
            }),
            #[cfg(not(feature = "sse"))]
            TransportKind::Http => Err(McpError::Transport(
                "http transport requires the `sse` feature".into(),
            )),
        }
    }
}

/// Server-wide tunables.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub dispatch: DispatchOptions,
    pub max_message_bytes: usize,
    pub sweep_interval: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            dispatch: DispatchOptions::default(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl ServerOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            dispatch: config.dispatch_options(),
            max_message_bytes: config.max_message_bytes,
            sweep_interval: config.sweep_interval(),
        }
    }
}

pub struct Server;

impl Server {
    /// Start with default options.
    pub async fn start(
        transport: TransportConfig,
        registry: Arc<ProtocolRegistry>,
        access: Arc<AccessControl>,
    ) -> McpResult<ServerHandle> {
        Self::start_with(transport, registry, access, ServerOptions::default()).await
    }

    pub async fn start_with(
        transport: TransportConfig,
        registry: Arc<ProtocolRegistry>,
        access: Arc<AccessControl>,
        options: ServerOptions,
    ) -> McpResult<ServerHandle> {
        tracing::info!("Starting server with {} protocol(s)", registry.len());

        let sessions = Arc::new(SessionManager::new(
            registry,
            Arc::clone(&access),
            options.dispatch.clone(),
        ));
        let shutdown = CancellationToken::new();
        let finished = CancellationToken::new();
        let mut tasks = vec![spawn_sweeper(access, options.sweep_interval, shutdown.clone())];
        let mut local_addr = None;

        match transport {
            TransportConfig::Stdio => {
                let stdio = StdioTransport::stdio().with_max_message_bytes(options.max_message_bytes);
                let id = sessions.spawn(Arc::new(stdio)).await;
                // the process lives as long as its one session
                if let Some(session) = sessions.get(&id).await {
                    let finished = finished.clone();
                    let shutdown = shutdown.clone();
                    tasks.push(tokio::spawn(async move {
                        tokio::select! {
                            _ = session.closed() => finished.cancel(),
                            _ = shutdown.cancelled() => {}
                        }
                    }));
                }
            }
            #[cfg(feature = "sse")]
            TransportConfig::Http { bind } => {
                use crate::transport::sse::{SseServer, SseState};

                let listener = tokio::net::TcpListener::bind(&bind)
                    .await
                    .map_err(|e| McpError::Transport(format!("cannot bind {bind}: {e}")))?;
                local_addr = listener.local_addr().ok();

                let state = SseState::new(Arc::clone(&sessions), options.max_message_bytes);
                let listener_shutdown = shutdown.clone();
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = SseServer::new(state).run(listener, listener_shutdown).await {
                        tracing::error!("HTTP listener failed: {e}");
                    }
                }));
            }
            TransportConfig::Manual => {}
        }

        Ok(ServerHandle {
            sessions,
            shutdown,
            finished,
            drain_timeout: options.dispatch.drain_timeout,
            local_addr,
            tasks: Mutex::new(tasks),
        })
    }
}

/// Control handle for a running server.
pub struct ServerHandle {
    sessions: Arc<SessionManager>,
    shutdown: CancellationToken,
    finished: CancellationToken,
    drain_timeout: Duration,
    local_addr: Option<SocketAddr>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ServerHandle {
    /// Attach a session to an already-connected transport.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> String {
        self.sessions.spawn(transport).await
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Bound address of the HTTP listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop accepting sessions, let in-flight requests drain, then close
    /// everything that is left with `SessionClosed`.
    pub async fn stop(&self) {
        tracing::info!("Stopping server");
        self.sessions.stop();

        // each session drains on its own; allow for the final flush too
        let grace = self.drain_timeout * 2 + Duration::from_secs(1);
        if !self.sessions.wait_all(grace).await {
            tracing::warn!("{} session(s) did not close in time", self.sessions.live().await);
        }

        self.shutdown.cancel();
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for task in tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!("Background task panicked: {e}");
                }
            }
        }
        self.finished.cancel();
    }

    /// Resolve when the server has stopped, or, on stdio, when its session
    /// has ended.
    pub async fn wait(&self) {
        self.finished.cancelled().await;
    }
}
