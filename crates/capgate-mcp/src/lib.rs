//! capgate MCP server: versioned Resources, Tools, Prompts and Roots from
//! pluggable capability adapters, served over stdio or server-sent events.
//!
//! Adapters are registered once in a [`ProtocolRegistry`]. Each connection
//! gets its own session that negotiates one protocol version, authenticates
//! once, and then routes requests through [`AccessControl`] to the adapter.

pub mod access;
pub mod config;
pub mod prompts;
pub mod protocol;
pub mod registry;
pub mod resources;
pub mod server;
pub mod session;
pub mod transport;
pub mod types;

pub use access::{AccessControl, Policy};
pub use config::ServerConfig;
pub use protocol::{ErrorMapper, ProtocolHandler};
pub use registry::{ProtocolRegistry, RegistryBuilder};
pub use server::{Server, ServerHandle, ServerOptions, TransportConfig};
pub use session::{SessionManager, SessionState};
pub use transport::{StdioTransport, Transport};
