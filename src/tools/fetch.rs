//! Upstream HTTP fetch tool.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::mcp::handler::{get_string_arg, ToolContext, ToolHandler};
use crate::mcp::protocol::{Tool, ToolResult};

/// Bytes of the response body read and returned to the caller.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// `fetch_url` tool: GET a URL from an upstream service.
pub struct FetchUrlTool {
    client: Client,
}

impl FetchUrlTool {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for FetchUrlTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "fetch_url".to_string(),
            description: "Fetch an http(s) URL and return its status and (truncated) body."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "http:// or https:// URL to fetch"
                    }
                },
                "required": ["url"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, args: HashMap<String, Value>, ctx: ToolContext) -> Result<ToolResult> {
        let url = get_string_arg(&args, "url")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Validation(
                "url must start with http:// or https://".to_string(),
            ));
        }

        let progress = ctx.progress.with_total(2);
        let mut response = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            response = self.client.get(&url).send() => response?,
        };
        progress.report(1, Some("response headers received")).await;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!(
                "upstream returned status {}",
                status.as_u16()
            )));
        }

        let mut body: Vec<u8> = Vec::new();
        let mut truncated = false;
        loop {
            let chunk = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
                chunk = response.chunk() => chunk?,
            };
            let Some(chunk) = chunk else { break };
            let room = MAX_BODY_BYTES - body.len();
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }
        progress.complete(Some("body received")).await;

        let text = String::from_utf8_lossy(&body).into_owned();

        Ok(ToolResult {
            text,
            data: Some(json!({
                "status": status.as_u16(),
                "bytes": body.len(),
                "truncated": truncated,
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_non_http_url() {
        let tool = FetchUrlTool::new(Client::new());
        let args: HashMap<String, Value> =
            serde_json::from_value(json!({ "url": "file:///etc/passwd" })).unwrap();

        let err = tool.execute(args, ToolContext::detached("f1")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_upstream_error() {
        let tool = FetchUrlTool::new(Client::new());
        let args: HashMap<String, Value> =
            serde_json::from_value(json!({ "url": "http://127.0.0.1:1/" })).unwrap();

        let err = tool.execute(args, ToolContext::detached("f2")).await.unwrap_err();
        assert_eq!(err.code(), "UPSTREAM_ERROR");
    }
}
