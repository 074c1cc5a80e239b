//! Prompt templates exposed by the negotiated protocol. Templates are
//! declarative: the server substitutes variables and never executes them.

pub mod expand;
pub mod registry;

pub use registry::PromptRegistry;
