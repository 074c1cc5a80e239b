//! The closed error vocabulary surfaced to clients, and the server's internal
//! error type.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use capgate::AdapterError;

/// Stable error codes. The set is closed: every failure a client can observe
/// is exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ProtocolVersionMismatch,
    NoCompatibleProtocol,
    SchemaValidationError,
    AuthenticationError,
    AuthorizationDenied,
    QuotaExceeded,
    ToolInvocationError,
    Timeout,
    TransportError,
    SessionClosed,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 10] = [
        ErrorCode::ProtocolVersionMismatch,
        ErrorCode::NoCompatibleProtocol,
        ErrorCode::SchemaValidationError,
        ErrorCode::AuthenticationError,
        ErrorCode::AuthorizationDenied,
        ErrorCode::QuotaExceeded,
        ErrorCode::ToolInvocationError,
        ErrorCode::Timeout,
        ErrorCode::TransportError,
        ErrorCode::SessionClosed,
    ];

    /// Numeric code as it appears on the wire.
    pub fn code(&self) -> i32 {
        match self {
            ErrorCode::ProtocolVersionMismatch => -32001,
            ErrorCode::NoCompatibleProtocol => -32002,
            ErrorCode::SchemaValidationError => -32602,
            ErrorCode::AuthenticationError => -32003,
            ErrorCode::AuthorizationDenied => -32004,
            ErrorCode::QuotaExceeded => -32005,
            ErrorCode::ToolInvocationError => -32006,
            ErrorCode::Timeout => -32007,
            ErrorCode::TransportError => -32008,
            ErrorCode::SessionClosed => -32009,
        }
    }

    /// Taxonomy name, used as `detail.kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            ErrorCode::ProtocolVersionMismatch => "ProtocolVersionMismatch",
            ErrorCode::NoCompatibleProtocol => "NoCompatibleProtocol",
            ErrorCode::SchemaValidationError => "SchemaValidationError",
            ErrorCode::AuthenticationError => "AuthenticationError",
            ErrorCode::AuthorizationDenied => "AuthorizationDenied",
            ErrorCode::QuotaExceeded => "QuotaExceeded",
            ErrorCode::ToolInvocationError => "ToolInvocationError",
            ErrorCode::Timeout => "Timeout",
            ErrorCode::TransportError => "TransportError",
            ErrorCode::SessionClosed => "SessionClosed",
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

/// Error object inside an error response: `{code, message, detail?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl ErrorRecord {
    /// A record whose detail names only its kind.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            detail: Some(json!({ "kind": code.kind() })),
        }
    }

    /// Merge extra fields into `detail`. Non-object extras land under `"data"`.
    pub fn with_detail(mut self, extra: Value) -> Self {
        let mut detail = match self.detail.take() {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        match extra {
            Value::Object(map) => detail.extend(map),
            other => {
                detail.insert("data".to_string(), other);
            }
        }
        self.detail = Some(Value::Object(detail));
        self
    }

    /// The taxonomy entry for `code`, if it is one of ours.
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }

    /// A string field of `detail`.
    pub fn detail_str(&self, field: &str) -> Option<&str> {
        self.detail.as_ref()?.get(field)?.as_str()
    }
}

/// Internal server error. Converted to an [`ErrorRecord`] by the error mapper
/// before anything reaches a client.
#[derive(thiserror::Error, Debug)]
pub enum McpError {
    #[error("protocol version mismatch: {0}")]
    ProtocolVersionMismatch(String),

    #[error("no compatible protocol: {0}")]
    NoCompatibleProtocol(String),

    #[error("invalid request: {message}")]
    SchemaValidation {
        path: Option<String>,
        message: String,
    },

    #[error("unknown method: {0}")]
    MethodNotFound(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("tool invocation failed: {0}")]
    ToolInvocation(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("session closed")]
    SessionClosed,

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Registry(#[from] crate::registry::RegistryError),

    #[error(transparent)]
    Access(#[from] crate::access::AccessError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    pub fn invalid(message: impl Into<String>) -> Self {
        McpError::SchemaValidation {
            path: None,
            message: message.into(),
        }
    }

    /// Whether the error ends the session rather than just one request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, McpError::Transport(_) | McpError::SessionClosed)
    }
}

pub type McpResult<T> = Result<T, McpError>;
