//! Wire types for the submission channel and tool catalog.
//!
//! Method names follow the Model Context Protocol (`tools/list`,
//! `tools/call`, `ping`); the envelope is the gateway's `{id, method, params}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

/// Method names accepted on the submission channel.
pub mod methods {
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
}

/// A submission `{id, method, params}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub id: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl SubmitRequest {
    /// Client-requested deadline from `params._meta.timeoutMs`.
    pub fn requested_timeout(&self) -> Option<Duration> {
        self.params
            .as_ref()?
            .get("_meta")?
            .get("timeoutMs")?
            .as_u64()
            .map(Duration::from_millis)
    }
}

/// Synchronous acknowledgment of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAck {
    pub status: String,
    pub request_id: String,
}

impl SubmitAck {
    pub fn accepted(request_id: impl Into<String>) -> Self {
        Self {
            status: "accepted".to_string(),
            request_id: request_id.into(),
        }
    }
}

/// Tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Tool call result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// List tools result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
}

/// Call tool params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: HashMap<String, Value>,
}

impl CallToolParams {
    /// Parse `tools/call` params, stripping the `_meta` envelope field.
    pub fn from_params(params: Option<&Value>) -> Result<Self> {
        let params =
            params.ok_or_else(|| Error::Validation("Missing params for tools/call".to_string()))?;
        serde_json::from_value(params.clone()).map_err(|e| Error::Validation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_submit_request_deserialization() {
        let request: SubmitRequest = serde_json::from_value(json!({
            "id": "r1",
            "method": "tools/call",
            "params": {
                "name": "calculate",
                "arguments": { "operation": "add", "a": 2, "b": 3 }
            }
        }))
        .unwrap();

        assert_eq!(request.id, "r1");
        assert_eq!(request.method, methods::TOOLS_CALL);
        assert!(request.requested_timeout().is_none());

        let call = CallToolParams::from_params(request.params.as_ref()).unwrap();
        assert_eq!(call.name, "calculate");
        assert_eq!(call.arguments["a"], 2);
    }

    #[test]
    fn test_requested_timeout() {
        let request: SubmitRequest = serde_json::from_value(json!({
            "id": "r2",
            "method": "tools/call",
            "params": { "name": "long_task", "_meta": { "timeoutMs": 250 } }
        }))
        .unwrap();

        assert_eq!(request.requested_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_submit_ack_serialization() {
        let ack = SubmitAck::accepted("r1");
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json, json!({ "status": "accepted", "requestId": "r1" }));
    }

    #[test]
    fn test_tool_definition() {
        let tool = Tool {
            name: "calculate".to_string(),
            description: "Arithmetic".to_string(),
            input_schema: json!({ "type": "object" }),
        };

        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("\"inputSchema\""));
    }

    #[test]
    fn test_call_tool_params_missing() {
        assert!(matches!(
            CallToolParams::from_params(None),
            Err(Error::Validation(_))
        ));
        assert!(CallToolParams::from_params(Some(&json!({ "arguments": {} }))).is_err());
    }
}
