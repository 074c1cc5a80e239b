//! Envelope and message types shared by every transport.
//!
//! On the wire each message is one [`Envelope`]. The dispatcher works with the
//! tagged [`Message`] form; [`Message::from_envelope`] is the only place that
//! decides which variant an envelope is.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ErrorRecord;

/// JSON-RPC 2.0 marker stamped on every server-emitted envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier: a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String identifier.
    String(String),
    /// Numeric identifier.
    Number(i64),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId::String(value.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        RequestId::Number(value)
    }
}

/// The raw wire form: `{id?, method?, params?, result?, error?}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

/// A request expecting exactly one response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

/// The single answer to a [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub outcome: Result<Value, ErrorRecord>,
}

/// A fire-and-forget message with no id.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

/// Any message carried by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

/// Why an envelope could not be classified.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedEnvelope {
    /// The id, when the envelope carried one, so the error can be correlated.
    pub id: Option<RequestId>,
    pub reason: String,
}

impl Message {
    /// Classify a decoded envelope.
    pub fn from_envelope(envelope: Envelope) -> Result<Self, MalformedEnvelope> {
        let Envelope {
            id,
            method,
            params,
            result,
            error,
            ..
        } = envelope;

        let malformed = |id: Option<RequestId>, reason: &str| MalformedEnvelope {
            id,
            reason: reason.to_string(),
        };

        if let Some(params) = &params {
            if !params.is_object() && !params.is_array() {
                return Err(malformed(id, "params must be an object"));
            }
        }

        match (id, method, result, error) {
            (Some(id), Some(method), None, None) => Ok(Message::Request(Request { id, method, params })),
            (None, Some(method), None, None) => {
                Ok(Message::Notification(Notification { method, params }))
            }
            (Some(id), None, Some(result), None) => Ok(Message::Response(Response {
                id,
                outcome: Ok(result),
            })),
            (Some(id), None, None, Some(error)) => Ok(Message::Response(Response {
                id,
                outcome: Err(error),
            })),
            (id, Some(_), _, _) => Err(malformed(id, "a message with a method cannot carry result or error")),
            (Some(id), None, Some(_), Some(_)) => {
                Err(malformed(Some(id), "a response carries exactly one of result or error"))
            }
            (id, None, _, _) => Err(malformed(id, "envelope has neither a method nor a result")),
        }
    }

    /// The wire form of this message.
    pub fn to_envelope(&self) -> Envelope {
        let mut envelope = Envelope {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            ..Envelope::default()
        };
        match self {
            Message::Request(req) => {
                envelope.id = Some(req.id.clone());
                envelope.method = Some(req.method.clone());
                envelope.params = req.params.clone();
            }
            Message::Response(resp) => {
                envelope.id = Some(resp.id.clone());
                match &resp.outcome {
                    Ok(result) => envelope.result = Some(result.clone()),
                    Err(error) => envelope.error = Some(error.clone()),
                }
            }
            Message::Notification(note) => {
                envelope.method = Some(note.method.clone());
                envelope.params = note.params.clone();
            }
        }
        envelope
    }

    /// Request id, for requests and responses.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Message::Request(req) => Some(&req.id),
            Message::Response(resp) => Some(&resp.id),
            Message::Notification(_) => None,
        }
    }
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: &str, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.to_string(),
            params,
        }
    }
}

impl Response {
    /// Create a success response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            outcome: Ok(result),
        }
    }

    /// Create an error response.
    pub fn error(id: RequestId, error: ErrorRecord) -> Self {
        Self {
            id,
            outcome: Err(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }
}

impl Notification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            method: method.to_string(),
            params,
        }
    }
}

impl From<Request> for Message {
    fn from(value: Request) -> Self {
        Message::Request(value)
    }
}

impl From<Response> for Message {
    fn from(value: Response) -> Self {
        Message::Response(value)
    }
}

impl From<Notification> for Message {
    fn from(value: Notification) -> Self {
        Message::Notification(value)
    }
}
