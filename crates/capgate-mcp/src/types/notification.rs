//! Server-to-client notification payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::Notification;

/// Method name of log notifications.
pub const LOG_METHOD: &str = "notifications/message";

/// Method name of progress notifications.
pub const PROGRESS_METHOD: &str = "notifications/progress";

/// Progress token, either string or number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressToken {
    /// String token.
    String(String),
    /// Numeric token.
    Number(i64),
}

/// Progress notification params (server → client).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    /// The progress token from the original request.
    pub progress_token: ProgressToken,
    /// Current progress value.
    pub progress: f64,
    /// Optional total progress value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
}

/// Log message notification params (server → client).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMessageParams {
    /// Log level.
    pub level: LogLevel,
    /// Optional logger name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    /// Log message data.
    pub data: Value,
}

/// Log levels for session log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogMessageParams {
    pub fn new(level: LogLevel, logger: &str, data: Value) -> Self {
        Self {
            level,
            logger: Some(logger.to_string()),
            data,
        }
    }

    pub fn into_notification(self) -> Notification {
        Notification::new(LOG_METHOD, serde_json::to_value(self).ok())
    }
}

impl ProgressParams {
    pub fn into_notification(self) -> Notification {
        Notification::new(PROGRESS_METHOD, serde_json::to_value(self).ok())
    }
}
