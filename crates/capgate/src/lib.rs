//! capgate: capability adapter contract for the capgate protocol server.
//!
//! A backend capability (file access, data transforms, web access, image
//! processing, ...) plugs into the server by implementing
//! [`CapabilityAdapter`]: a static [`ProtocolDescriptor`] plus a uniform
//! `invoke(method, args)` call that returns a value or an [`AdapterError`].

pub mod adapter;
pub mod builtin;
pub mod descriptor;
pub mod error;
pub mod schema;
pub mod version;

pub use adapter::{validate_args, CapabilityAdapter};
pub use descriptor::{
    Capabilities, Concurrency, Prompt, PromptVariable, ProtocolDescriptor, Resource,
    ResourceContents, Root, SamplingPolicy, ToolDefinition,
};
pub use error::{AdapterError, AdapterResult};
pub use version::{CompatibilityRange, Version, VersionError};
