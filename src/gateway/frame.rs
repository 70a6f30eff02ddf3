//! Typed, timestamped frames pushed over a streaming connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Error;

/// Frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Connected,
    Heartbeat,
    Progress,
    Result,
    Error,
    Broadcast,
}

impl MessageType {
    /// SSE event name for this frame type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Heartbeat => "heartbeat",
            Self::Progress => "progress",
            Self::Result => "result",
            Self::Error => "error",
            Self::Broadcast => "broadcast",
        }
    }
}

/// One frame on the stream: `{type, data, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    pub fn new(kind: MessageType, data: Value) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn connected(connection_id: &str) -> Self {
        Self::new(
            MessageType::Connected,
            json!({ "connectionId": connection_id }),
        )
    }

    pub fn heartbeat() -> Self {
        Self::new(MessageType::Heartbeat, json!({}))
    }

    /// Terminal success frame for a request.
    pub fn result(request_id: &str, result: Value) -> Self {
        Self::new(
            MessageType::Result,
            json!({ "id": request_id, "result": result }),
        )
    }

    /// Terminal failure frame for a request.
    pub fn failure(request_id: &str, error: &Error) -> Self {
        Self::new(
            MessageType::Result,
            json!({ "id": request_id, "error": ErrorDescriptor::from(error) }),
        )
    }

    /// Whether this frame ends a request.
    pub fn is_terminal(&self) -> bool {
        self.kind == MessageType::Result
    }

    /// The request id carried in `data.id`, if any.
    pub fn request_id(&self) -> Option<&str> {
        self.data.get("id").and_then(Value::as_str)
    }
}

/// Structured error descriptor `{code, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub code: String,
    pub message: String,
}

impl From<&Error> for ErrorDescriptor {
    fn from(error: &Error) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.public_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_frame_shape() {
        let frame = Frame::connected("conn-1");
        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["type"], "connected");
        assert_eq!(json["data"]["connectionId"], "conn-1");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_result_frame_shape() {
        let frame = Frame::result("r1", json!({ "text": "2 add 3 = 5" }));
        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["type"], "result");
        assert_eq!(json["data"]["id"], "r1");
        assert_eq!(json["data"]["result"]["text"], "2 add 3 = 5");
        assert!(frame.is_terminal());
        assert_eq!(frame.request_id(), Some("r1"));
    }

    #[test]
    fn test_failure_frame_carries_code_and_message() {
        let frame = Frame::failure("r2", &Error::Timeout { millis: 50 });
        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["type"], "result");
        assert_eq!(json["data"]["id"], "r2");
        assert_eq!(json["data"]["error"]["code"], "TIMEOUT");
        assert!(json["data"].get("result").is_none());
    }

    #[test]
    fn test_progress_is_not_terminal() {
        let frame = Frame::new(MessageType::Progress, json!({ "id": "r3", "progress": 0.5 }));
        assert!(!frame.is_terminal());
        assert_eq!(MessageType::Progress.as_str(), "progress");
    }
}
