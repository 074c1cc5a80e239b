//! Transports: a newline-delimited duplex stream and a server-push event
//! stream. The dispatcher only sees the [`Transport`] trait.

pub mod codec;
pub mod sse;
pub mod stdio;

use async_trait::async_trait;

use crate::types::{McpResult, Message};

pub use codec::{Inbound, DEFAULT_MAX_MESSAGE_BYTES};
pub use sse::{EventChannel, EventStreamTransport};
pub use stdio::{LineTransport, StdioTransport};

/// A bidirectional message channel owned by one session.
///
/// `send` and `receive` may run concurrently from different tasks. A failed
/// `send` means the message was not delivered; it is never half-written.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one message.
    async fn send(&self, message: &Message) -> McpResult<()>;

    /// Wait for the next inbound message. `Ok(None)` means the peer closed
    /// the connection; `Err` is an unrecoverable transport fault.
    async fn receive(&self) -> McpResult<Option<Inbound>>;

    /// Stop accepting traffic and release the connection.
    async fn close(&self) -> McpResult<()>;

    /// Credential supplied by the connection itself (e.g. an HTTP bearer
    /// token), used when `initialize` carries none.
    fn credential(&self) -> Option<String> {
        None
    }

    /// Short name for logs.
    fn kind(&self) -> &'static str;
}
