//! Arithmetic tool.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::mcp::handler::{get_number_arg, get_string_arg, ToolContext, ToolHandler};
use crate::mcp::protocol::{Tool, ToolResult};

/// `calculate` tool: one binary arithmetic operation.
pub struct CalculateTool;

impl CalculateTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CalculateTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolHandler for CalculateTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "calculate".to_string(),
            description: "Perform a basic arithmetic operation on two numbers.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "enum": ["add", "subtract", "multiply", "divide"],
                        "description": "Operation to apply"
                    },
                    "a": { "type": "number", "description": "Left operand" },
                    "b": { "type": "number", "description": "Right operand" }
                },
                "required": ["operation", "a", "b"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, args: HashMap<String, Value>, _ctx: ToolContext) -> Result<ToolResult> {
        let operation = get_string_arg(&args, "operation")?;
        let a = get_number_arg(&args, "a")?;
        let b = get_number_arg(&args, "b")?;

        let value = match operation.as_str() {
            "add" => a + b,
            "subtract" => a - b,
            "multiply" => a * b,
            "divide" if b == 0.0 => {
                return Err(Error::Upstream("division by zero".to_string()));
            }
            "divide" => a / b,
            other => return Err(Error::Validation(format!("Unknown operation: {}", other))),
        };

        Ok(ToolResult {
            text: format!(
                "{} {} {} = {}",
                format_number(a),
                operation,
                format_number(b),
                format_number(value)
            ),
            data: None,
        })
    }
}

/// Render whole numbers without a trailing `.0`.
fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(args: Value) -> Result<ToolResult> {
        CalculateTool::new()
            .execute(serde_json::from_value(args).unwrap(), ToolContext::detached("t"))
            .await
    }

    #[tokio::test]
    async fn test_add() {
        let result = run(json!({ "operation": "add", "a": 2, "b": 3 })).await.unwrap();
        assert_eq!(result.text, "2 add 3 = 5");
        assert!(result.data.is_none());
    }

    #[tokio::test]
    async fn test_fractional_operands() {
        let result = run(json!({ "operation": "multiply", "a": 1.5, "b": 3 })).await.unwrap();
        assert_eq!(result.text, "1.5 multiply 3 = 4.5");

        let result = run(json!({ "operation": "divide", "a": 7, "b": 2 })).await.unwrap();
        assert_eq!(result.text, "7 divide 2 = 3.5");
    }

    #[tokio::test]
    async fn test_divide_by_zero_fails() {
        let err = run(json!({ "operation": "divide", "a": 1, "b": 0 })).await.unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(5.0), "5");
        assert_eq!(format_number(-2.0), "-2");
        assert_eq!(format_number(0.25), "0.25");
    }
}
