//! Long-running tools that report progress.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::error::{Error, Result};
use crate::mcp::handler::{get_u64_arg, ToolContext, ToolHandler};
use crate::mcp::protocol::{Tool, ToolResult};

const MAX_STEPS: u64 = 1_000;

/// `long_task` tool: runs a number of timed steps, reporting after each.
pub struct LongTaskTool;

impl LongTaskTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LongTaskTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolHandler for LongTaskTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "long_task".to_string(),
            description: "Simulate a multi-step job, emitting a progress frame after every step."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "steps": {
                        "type": "integer",
                        "description": "Number of steps (default 5, max 1000)"
                    },
                    "delay_ms": {
                        "type": "integer",
                        "description": "Time spent on each step in milliseconds (default 200)"
                    },
                    "fail_at": {
                        "type": "integer",
                        "description": "Fail with an upstream error when this step is reached"
                    }
                },
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, args: HashMap<String, Value>, ctx: ToolContext) -> Result<ToolResult> {
        let steps = get_u64_arg(&args, "steps", 5);
        if steps == 0 || steps > MAX_STEPS {
            return Err(Error::Validation(format!(
                "steps must be between 1 and {}",
                MAX_STEPS
            )));
        }
        let delay = Duration::from_millis(get_u64_arg(&args, "delay_ms", 200));
        let fail_at = args.get("fail_at").and_then(Value::as_u64);
        let progress = ctx.progress.with_total(steps);

        for step in 1..=steps {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    debug!("long_task {} cancelled at step {}", ctx.request_id, step);
                    return Err(Error::Cancelled);
                }
                _ = sleep(delay) => {}
            }

            if fail_at == Some(step) {
                return Err(Error::Upstream(format!("step {} of {} failed", step, steps)));
            }

            progress
                .report(step, Some(&format!("step {} of {}", step, steps)))
                .await;
        }

        Ok(ToolResult {
            text: format!("Completed {} steps", steps),
            data: Some(json!({ "steps": steps })),
        })
    }
}
