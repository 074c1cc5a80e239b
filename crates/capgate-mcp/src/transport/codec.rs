//! Envelope encoding shared by both transports.

use serde_json::Value;

use crate::types::{Envelope, MalformedEnvelope, McpError, McpResult, Message, RequestId};

/// Default cap on a single encoded message.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// One decoded unit from the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A well-formed message.
    Message(Message),
    /// Valid JSON that is not a usable envelope. The session survives this.
    Malformed(MalformedEnvelope),
}

/// Decode one message. Bytes that are not UTF-8 JSON are a transport fault;
/// JSON of the wrong shape is reported as [`Inbound::Malformed`].
pub fn decode(bytes: &[u8]) -> McpResult<Inbound> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| McpError::Transport(format!("message is not valid UTF-8: {e}")))?;
    let value: Value = serde_json::from_str(text)
        .map_err(|e| McpError::Transport(format!("message is not valid JSON: {e}")))?;
    Ok(classify(value))
}

/// Classify an already-parsed JSON value.
pub fn classify(value: Value) -> Inbound {
    // recover the id before the typed parse so errors can still be correlated
    let id = value
        .get("id")
        .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

    let envelope: Envelope = match serde_json::from_value(value) {
        Ok(envelope) => envelope,
        Err(e) => {
            return Inbound::Malformed(MalformedEnvelope {
                id,
                reason: format!("malformed envelope: {e}"),
            })
        }
    };

    match Message::from_envelope(envelope) {
        Ok(message) => Inbound::Message(message),
        Err(malformed) => Inbound::Malformed(malformed),
    }
}

/// Encode a message as a single line of JSON (no trailing newline).
pub fn encode(message: &Message) -> McpResult<String> {
    Ok(serde_json::to_string(&message.to_envelope())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Notification, Request};
    use serde_json::json;

    #[test]
    fn garbage_is_a_transport_fault() {
        assert!(matches!(decode(b"{not json"), Err(McpError::Transport(_))));
        assert!(matches!(decode(&[0xff, 0xfe, b'{']), Err(McpError::Transport(_))));
    }

    #[test]
    fn wrong_shapes_are_malformed_not_fatal() {
        let Inbound::Malformed(m) = decode(br#"{"id": 5, "method": 12}"#).unwrap() else {
            panic!("expected malformed");
        };
        assert_eq!(m.id, Some(RequestId::Number(5)));

        assert!(matches!(decode(b"[1,2,3]").unwrap(), Inbound::Malformed(_)));
        assert!(matches!(decode(b"\"hello\"").unwrap(), Inbound::Malformed(_)));
    }

    #[test]
    fn encodes_on_one_line() {
        let msg = Message::Request(Request::new(
            "a",
            "tools/call",
            Some(json!({"arguments": {"text": "line one\nline two"}})),
        ));
        let line = encode(&msg).unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(decode(line.as_bytes()).unwrap(), Inbound::Message(msg));
    }

    #[test]
    fn envelope_survives_reencoding() {
        let raw = json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": {"progress": 1}});
        let envelope: Envelope = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&envelope).unwrap(), raw);

        let msg = Message::Notification(Notification::new("notifications/initialized", None));
        assert_eq!(decode(encode(&msg).unwrap().as_bytes()).unwrap(), Inbound::Message(msg));
    }
}
