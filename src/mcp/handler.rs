//! Tool dispatch engine.
//!
//! Resolves tool names to handlers, validates arguments against each tool's
//! declared input schema and runs the handler. Handler failures, including
//! panics, come back as ordinary errors.

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::mcp::progress::ProgressReporter;
use crate::mcp::protocol::{Tool, ToolResult};

/// Per-call context handed to a handler.
#[derive(Clone)]
pub struct ToolContext {
    pub request_id: String,
    pub progress: ProgressReporter,
    /// Cancelled when the gateway stops waiting for this call.
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(request_id: impl Into<String>, progress: ProgressReporter, cancel: CancellationToken) -> Self {
        Self {
            request_id: request_id.into(),
            progress,
            cancel,
        }
    }

    /// Context with no progress sink and a fresh cancellation token.
    pub fn detached(request_id: impl Into<String>) -> Self {
        Self::new(request_id, ProgressReporter::noop(), CancellationToken::new())
    }

    /// Fail with [`Error::Cancelled`] once cancellation was requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Handler for a tool call.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Get the tool definition.
    fn definition(&self) -> Tool;

    /// Execute the tool with already validated arguments.
    async fn execute(&self, arguments: HashMap<String, Value>, ctx: ToolContext) -> Result<ToolResult>;
}

struct RegisteredTool {
    tool: Tool,
    schema: jsonschema::Validator,
    handler: Arc<dyn ToolHandler>,
}

/// Registry of tool handlers.
pub struct ToolDispatcher {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool handler.
    pub fn register<T: ToolHandler + 'static>(&mut self, handler: T) -> Result<()> {
        self.register_arc(Arc::new(handler))
    }

    /// Register a tool handler (Arc version).
    ///
    /// The declared input schema is compiled once here; an invalid schema
    /// is a configuration error.
    pub fn register_arc(&mut self, handler: Arc<dyn ToolHandler>) -> Result<()> {
        let tool = handler.definition();
        let schema = compile_schema(&tool.input_schema)
            .map_err(|e| Error::Config(format!("tool {} has an invalid input schema: {}", tool.name, e)))?;
        self.tools.insert(
            tool.name.clone(),
            RegisteredTool {
                tool,
                schema,
                handler,
            },
        );
        Ok(())
    }

    /// Declared tool catalog, sorted by name.
    pub fn list_tools(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self.tools.values().map(|t| t.tool.clone()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Resolve and validate a call without running it.
    pub fn prepare(&self, name: &str, arguments: &HashMap<String, Value>) -> Result<Arc<dyn ToolHandler>> {
        let registered = self
            .tools
            .get(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))?;
        validate_arguments(&registered.schema, arguments)?;
        Ok(registered.handler.clone())
    }

    /// Resolve, validate and run a call.
    pub async fn call(
        &self,
        name: &str,
        arguments: HashMap<String, Value>,
        ctx: ToolContext,
    ) -> Result<ToolResult> {
        let handler = self.prepare(name, &arguments)?;
        run_handler(name, handler, arguments, ctx).await
    }
}

impl Default for ToolDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a resolved handler, converting a panic into [`Error::Upstream`].
pub async fn run_handler(
    name: &str,
    handler: Arc<dyn ToolHandler>,
    arguments: HashMap<String, Value>,
    ctx: ToolContext,
) -> Result<ToolResult> {
    debug!("Executing tool {} for request {}", name, ctx.request_id);
    match AssertUnwindSafe(handler.execute(arguments, ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            error!("Tool {} panicked", name);
            Err(Error::Upstream(format!("tool {} failed unexpectedly", name)))
        }
    }
}

/// Compile a declared input schema.
pub fn compile_schema(schema: &Value) -> std::result::Result<jsonschema::Validator, String> {
    jsonschema::options().build(schema).map_err(|e| e.to_string())
}

/// Validate call arguments against a compiled input schema.
///
/// Every violation is reported, joined with `; `.
pub fn validate_arguments(schema: &jsonschema::Validator, arguments: &HashMap<String, Value>) -> Result<()> {
    let object: serde_json::Map<String, Value> = arguments
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let instance = Value::Object(object);

    let violations: Vec<String> = schema.iter_errors(&instance).map(|e| e.to_string()).collect();
    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "Invalid arguments: {}",
            violations.join("; ")
        )))
    }
}

/// Helper to create a successful tool result.
pub fn success_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        text: text.into(),
        data: None,
    }
}

/// Helper to extract a required string argument.
pub fn get_string_arg(args: &HashMap<String, Value>, name: &str) -> Result<String> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| Error::Validation(format!("Missing required argument: {}", name)))
}

/// Helper to extract a required numeric argument.
pub fn get_number_arg(args: &HashMap<String, Value>, name: &str) -> Result<f64> {
    args.get(name)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| Error::Validation(format!("Missing required argument: {}", name)))
}

/// Helper to extract an optional integer argument with a default.
pub fn get_u64_arg(args: &HashMap<String, Value>, name: &str, default: u64) -> u64 {
    args.get(name).and_then(|v| v.as_u64()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn definition(&self) -> Tool {
            Tool {
                name: "echo".to_string(),
                description: "Echo the input".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "input": { "type": "string" },
                        "mode": { "type": "string", "enum": ["plain", "loud"] },
                        "tags": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["input"],
                    "additionalProperties": false
                }),
            }
        }

        async fn execute(&self, args: HashMap<String, Value>, _ctx: ToolContext) -> Result<ToolResult> {
            let input = get_string_arg(&args, "input")?;
            Ok(success_result(format!("Executed echo with: {}", input)))
        }
    }

    struct PanicTool;

    #[async_trait]
    impl ToolHandler for PanicTool {
        fn definition(&self) -> Tool {
            Tool {
                name: "explode".to_string(),
                description: "Always panics".to_string(),
                input_schema: json!({ "type": "object" }),
            }
        }

        async fn execute(&self, _args: HashMap<String, Value>, _ctx: ToolContext) -> Result<ToolResult> {
            panic!("boom");
        }
    }

    fn args(value: Value) -> HashMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    fn dispatcher() -> ToolDispatcher {
        let mut dispatcher = ToolDispatcher::new();
        dispatcher.register(EchoTool).unwrap();
        dispatcher.register(PanicTool).unwrap();
        dispatcher
    }

    #[test]
    fn test_handler_registration() {
        let dispatcher = dispatcher();
        assert_eq!(dispatcher.tool_count(), 2);
        assert!(dispatcher.has_tool("echo"));
        assert!(!dispatcher.has_tool("nonexistent"));

        let names: Vec<_> = dispatcher.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["echo", "explode"]);
    }

    #[tokio::test]
    async fn test_tool_execution() {
        let result = dispatcher()
            .call("echo", args(json!({ "input": "hello" })), ToolContext::detached("r1"))
            .await
            .unwrap();
        assert_eq!(result.text, "Executed echo with: hello");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let err = dispatcher()
            .call("nope", HashMap::new(), ToolContext::detached("r1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolNotFound(_)));
    }

    #[test]
    fn test_validation_errors() {
        let dispatcher = dispatcher();

        let missing = dispatcher.prepare("echo", &HashMap::new()).err().unwrap();
        assert!(matches!(missing, Error::Validation(_)));
        assert!(missing.to_string().contains("\"input\" is a required property"));

        let mistyped = dispatcher.prepare("echo", &args(json!({ "input": 7 }))).err().unwrap();
        assert!(matches!(mistyped, Error::Validation(_)));
        assert!(mistyped.to_string().contains("\"string\""));

        for bad in [
            json!({ "input": "x", "mode": "quiet" }),
            json!({ "input": "x", "tags": ["a", 1] }),
            json!({ "input": "x", "other": true }),
        ] {
            assert!(
                matches!(dispatcher.prepare("echo", &args(bad.clone())), Err(Error::Validation(_))),
                "accepted {}",
                bad
            );
        }

        assert!(dispatcher
            .prepare("echo", &args(json!({ "input": "x", "mode": "loud", "tags": ["a"] })))
            .is_ok());
    }

    #[test]
    fn test_integer_and_number_types() {
        let schema = compile_schema(&json!({
            "type": "object",
            "properties": {
                "count": { "type": "integer" },
                "ratio": { "type": "number" }
            }
        }))
        .unwrap();
        assert!(validate_arguments(&schema, &args(json!({ "count": 3, "ratio": 0.5 }))).is_ok());
        assert!(validate_arguments(&schema, &args(json!({ "count": 0.5 }))).is_err());
        assert!(validate_arguments(&schema, &args(json!({ "ratio": "1" }))).is_err());
    }

    struct BrokenSchemaTool;

    #[async_trait]
    impl ToolHandler for BrokenSchemaTool {
        fn definition(&self) -> Tool {
            Tool {
                name: "broken".to_string(),
                description: "Declares a schema that does not compile".to_string(),
                input_schema: json!({ "type": 12 }),
            }
        }

        async fn execute(&self, _args: HashMap<String, Value>, _ctx: ToolContext) -> Result<ToolResult> {
            Ok(success_result("unreachable"))
        }
    }

    #[test]
    fn test_invalid_schema_is_rejected_at_registration() {
        let mut dispatcher = ToolDispatcher::new();
        let err = dispatcher.register(BrokenSchemaTool).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!dispatcher.has_tool("broken"));
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_upstream_error() {
        let dispatcher = dispatcher();
        let err = dispatcher
            .call("explode", HashMap::new(), ToolContext::detached("r1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));

        // The dispatcher stays usable afterwards.
        assert!(dispatcher
            .call("echo", args(json!({ "input": "still here" })), ToolContext::detached("r2"))
            .await
            .is_ok());
    }

    #[test]
    fn test_context_cancellation() {
        let ctx = ToolContext::detached("r1");
        assert!(ctx.check_cancelled().is_ok());
        ctx.cancel.cancel();
        assert!(matches!(ctx.check_cancelled(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_arg_helpers() {
        let a = args(json!({ "name": "value", "n": 2.5, "k": 4 }));
        assert_eq!(get_string_arg(&a, "name").unwrap(), "value");
        assert!(get_string_arg(&a, "missing").is_err());
        assert_eq!(get_number_arg(&a, "n").unwrap(), 2.5);
        assert_eq!(get_u64_arg(&a, "k", 1), 4);
        assert_eq!(get_u64_arg(&a, "missing", 1), 1);
    }
}
