//! Errors raised by capability adapters.
//!
//! Adapters report failures through [`AdapterError`]; they never build wire
//! error objects themselves. The server classifies these into its stable
//! error vocabulary.

use thiserror::Error;

/// A failure reported by a capability adapter.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Arguments did not match the declared parameter schema.
    #[error("schema validation failed at {path}: {message}")]
    SchemaValidation {
        /// JSON pointer to the offending value (`""` for the root).
        path: String,
        /// What was wrong.
        message: String,
    },

    /// The adapter does not implement the requested method.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// The requested resource does not exist.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// A backend-specific fault (network, codec, transform, ...).
    #[error("{kind} backend failure: {message}")]
    Backend {
        /// Short backend label, e.g. `"io"` or `"toml"`.
        kind: String,
        /// The original fault description.
        message: String,
    },

    /// Filesystem or stream failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The operation is declared but not available in this build.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl AdapterError {
    /// Shorthand for a backend fault.
    pub fn backend(kind: impl Into<String>, message: impl ToString) -> Self {
        Self::Backend {
            kind: kind.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a schema violation.
    pub fn schema(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaValidation {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result alias for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;
