//! Classification of every failure into the closed error vocabulary.
//!
//! [`ErrorMapper::map`] is total: each [`McpError`] yields exactly one
//! [`ErrorRecord`], and adapter faults are never passed through raw.

use serde_json::json;

use capgate::AdapterError;

use crate::access::AccessError;
use crate::registry::RegistryError;
use crate::types::{ErrorCode, ErrorRecord, McpError};

/// Maps internal and adapter failures to wire error records.
pub struct ErrorMapper;

impl ErrorMapper {
    pub fn map(error: &McpError) -> ErrorRecord {
        match error {
            McpError::ProtocolVersionMismatch(message) => {
                ErrorRecord::new(ErrorCode::ProtocolVersionMismatch, message.clone())
            }
            McpError::NoCompatibleProtocol(message) => {
                ErrorRecord::new(ErrorCode::NoCompatibleProtocol, message.clone())
            }
            McpError::SchemaValidation { path, message } => {
                let record = ErrorRecord::new(ErrorCode::SchemaValidationError, message.clone());
                match path {
                    Some(path) => record.with_detail(json!({ "path": path })),
                    None => record,
                }
            }
            McpError::MethodNotFound(method) => {
                ErrorRecord::new(ErrorCode::SchemaValidationError, error.to_string())
                    .with_detail(json!({ "method": method }))
            }
            McpError::Authentication(reason) => {
                ErrorRecord::new(ErrorCode::AuthenticationError, error.to_string())
                    .with_detail(json!({ "reason": reason }))
            }
            McpError::AuthorizationDenied(reason) => {
                ErrorRecord::new(ErrorCode::AuthorizationDenied, error.to_string())
                    .with_detail(json!({ "reason": reason }))
            }
            McpError::QuotaExceeded(reason) => {
                ErrorRecord::new(ErrorCode::QuotaExceeded, error.to_string())
                    .with_detail(json!({ "reason": reason }))
            }
            McpError::ToolInvocation(cause) => {
                ErrorRecord::new(ErrorCode::ToolInvocationError, error.to_string())
                    .with_detail(json!({ "cause": cause }))
            }
            McpError::Cancelled => ErrorRecord::new(ErrorCode::ToolInvocationError, "request cancelled")
                .with_detail(json!({ "cause": "request cancelled" })),
            McpError::Timeout(limit) => ErrorRecord::new(ErrorCode::Timeout, error.to_string())
                .with_detail(json!({ "timeout_ms": limit.as_millis() as u64 })),
            McpError::Transport(_) | McpError::Io(_) => {
                ErrorRecord::new(ErrorCode::TransportError, error.to_string())
            }
            McpError::SessionClosed => ErrorRecord::new(ErrorCode::SessionClosed, "session closed"),
            McpError::Json(e) => ErrorRecord::new(ErrorCode::ToolInvocationError, error.to_string())
                .with_detail(json!({ "cause": e.to_string() })),
            McpError::Adapter(e) => Self::map_adapter(e),
            McpError::Registry(e) => Self::map_registry(e),
            McpError::Access(e) => Self::map_access(e),
        }
    }

    fn map_adapter(error: &AdapterError) -> ErrorRecord {
        match error {
            AdapterError::SchemaValidation { path, message } => {
                ErrorRecord::new(ErrorCode::SchemaValidationError, error.to_string())
                    .with_detail(json!({ "path": path, "cause": message }))
            }
            AdapterError::UnknownMethod(method) => {
                ErrorRecord::new(ErrorCode::SchemaValidationError, error.to_string())
                    .with_detail(json!({ "method": method }))
            }
            AdapterError::Backend { kind, message } => {
                ErrorRecord::new(ErrorCode::ToolInvocationError, error.to_string())
                    .with_detail(json!({ "backend": kind, "cause": message }))
            }
            AdapterError::ResourceNotFound(uri) => {
                ErrorRecord::new(ErrorCode::ToolInvocationError, error.to_string())
                    .with_detail(json!({ "backend": "resource", "cause": error.to_string(), "uri": uri }))
            }
            AdapterError::Io(e) => ErrorRecord::new(ErrorCode::ToolInvocationError, error.to_string())
                .with_detail(json!({ "backend": "io", "cause": e.to_string() })),
            AdapterError::Json(e) => ErrorRecord::new(ErrorCode::ToolInvocationError, error.to_string())
                .with_detail(json!({ "backend": "json", "cause": e.to_string() })),
            AdapterError::Unsupported(what) => {
                ErrorRecord::new(ErrorCode::ToolInvocationError, error.to_string())
                    .with_detail(json!({ "cause": what }))
            }
        }
    }

    fn map_registry(error: &RegistryError) -> ErrorRecord {
        match error {
            RegistryError::NoCompatibleProtocol { name, version } => {
                ErrorRecord::new(ErrorCode::NoCompatibleProtocol, error.to_string())
                    .with_detail(json!({ "protocol": name, "version": version.to_string() }))
            }
            // only reachable during startup
            RegistryError::DuplicateProtocol { .. } => {
                ErrorRecord::new(ErrorCode::ToolInvocationError, error.to_string())
                    .with_detail(json!({ "cause": error.to_string() }))
            }
        }
    }

    fn map_access(error: &AccessError) -> ErrorRecord {
        match error {
            AccessError::Authentication(reason) => {
                ErrorRecord::new(ErrorCode::AuthenticationError, error.to_string())
                    .with_detail(json!({ "reason": reason }))
            }
            AccessError::AuthenticationTimeout(limit) => {
                ErrorRecord::new(ErrorCode::Timeout, error.to_string()).with_detail(json!({
                    "stage": "authenticate",
                    "timeout_ms": limit.as_millis() as u64,
                }))
            }
            AccessError::Denied(reason) => ErrorRecord::new(ErrorCode::AuthorizationDenied, error.to_string())
                .with_detail(json!({ "reason": reason })),
            AccessError::QuotaExceeded {
                protocol,
                used,
                limit,
                retry_after,
                ..
            } => ErrorRecord::new(ErrorCode::QuotaExceeded, error.to_string()).with_detail(json!({
                "protocol": protocol,
                "used": used,
                "limit": limit,
                "retry_after_ms": retry_after.as_millis() as u64,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn backend_faults_keep_their_description() {
        let err = McpError::Adapter(AdapterError::backend("toml", "expected `=` at line 1"));
        let record = ErrorMapper::map(&err);
        assert_eq!(record.error_code(), Some(ErrorCode::ToolInvocationError));
        assert_eq!(record.detail_str("cause"), Some("expected `=` at line 1"));
        assert_eq!(record.detail_str("backend"), Some("toml"));
        assert_eq!(record.detail_str("kind"), Some("ToolInvocationError"));
    }

    #[test]
    fn adapter_validation_is_schema_error() {
        let err = McpError::Adapter(AdapterError::schema("/path", "expected string"));
        let record = ErrorMapper::map(&err);
        assert_eq!(record.error_code(), Some(ErrorCode::SchemaValidationError));
        assert_eq!(record.detail_str("path"), Some("/path"));
    }

    #[test]
    fn every_error_maps_into_the_taxonomy() {
        let samples = vec![
            McpError::ProtocolVersionMismatch("x".into()),
            McpError::NoCompatibleProtocol("x".into()),
            McpError::invalid("x"),
            McpError::MethodNotFound("x".into()),
            McpError::Authentication("x".into()),
            McpError::AuthorizationDenied("x".into()),
            McpError::QuotaExceeded("x".into()),
            McpError::ToolInvocation("x".into()),
            McpError::Cancelled,
            McpError::Timeout(Duration::from_millis(5)),
            McpError::Transport("x".into()),
            McpError::SessionClosed,
            McpError::Io(std::io::Error::other("x")),
            McpError::Adapter(AdapterError::Unsupported("x".into())),
            McpError::Adapter(AdapterError::ResourceNotFound("file:///x".into())),
            McpError::Access(AccessError::Denied("x".into())),
            McpError::Access(AccessError::AuthenticationTimeout(Duration::from_secs(1))),
        ];
        for err in samples {
            let record = ErrorMapper::map(&err);
            let code = record.error_code().expect("closed taxonomy");
            assert_eq!(record.detail_str("kind"), Some(code.kind()), "{err}");
        }
    }

    #[test]
    fn quota_detail_carries_retry_hint() {
        let err = McpError::Access(AccessError::QuotaExceeded {
            identity: "a".into(),
            protocol: "file".into(),
            used: 3,
            limit: 3,
            retry_after: Duration::from_millis(1500),
        });
        let record = ErrorMapper::map(&err);
        assert_eq!(record.error_code(), Some(ErrorCode::QuotaExceeded));
        assert_eq!(record.detail.unwrap()["retry_after_ms"], 1500);
    }
}
