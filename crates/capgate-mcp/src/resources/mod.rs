//! Read-only resources exposed by the negotiated protocol.

pub mod registry;

pub use registry::ResourceRegistry;
