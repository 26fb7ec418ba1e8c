//! Tool routing and dispatch

use tracing::{info, instrument, warn};

use super::registry::ToolRegistry;
use super::{ToolCall, ToolContext, ToolResult};

/// Result of routing a tool call
#[derive(Debug)]
pub enum RouteResult {
    /// Tool ran (the result itself may report failure)
    Success(ToolResult),
    /// Tool not found
    NotFound(String),
    /// Error during execution
    Error(String),
}

impl RouteResult {
    /// Text fed back to the model and whether the call counts as successful
    pub fn into_message(self) -> (String, bool) {
        match self {
            RouteResult::Success(r) => (r.to_message(), r.success),
            RouteResult::NotFound(name) => (format!("Tool not found: {}", name), false),
            RouteResult::Error(e) => (format!("Tool error: {}", e), false),
        }
    }
}

/// Router for dispatching tool calls
pub struct ToolRouter {
    registry: ToolRegistry,
}

impl ToolRouter {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// Route a single tool call
    #[instrument(skip(self, ctx), fields(tool = %tool_call.name))]
    pub async fn route(&self, tool_call: &ToolCall, ctx: &ToolContext) -> RouteResult {
        let tool = match self.registry.get(&tool_call.name) {
            Some(t) => t,
            None => {
                warn!(tool = %tool_call.name, "Tool not found");
                return RouteResult::NotFound(tool_call.name.clone());
            }
        };

        info!(tool = %tool_call.name, "Executing tool");
        match tool.execute(&tool_call.arguments, ctx).await {
            Ok(mut result) => {
                if result.success {
                    info!(
                        tool = %tool_call.name,
                        output_len = result.output.len(),
                        "Tool executed successfully"
                    );
                } else {
                    warn!(tool = %tool_call.name, error = ?result.error, "Tool execution failed");
                }
                result.output = truncate_output(result.output, ctx.max_output_len);
                RouteResult::Success(result)
            }
            Err(e) => {
                warn!(tool = %tool_call.name, error = %e, "Tool execution error");
                RouteResult::Error(e.to_string())
            }
        }
    }

    /// Get a reference to the registry
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

impl std::fmt::Debug for ToolRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRouter")
            .field("registry", &self.registry)
            .finish()
    }
}

/// Truncate on a char boundary, noting how much was dropped
pub fn truncate_output(output: String, max_len: usize) -> String {
    if output.len() <= max_len {
        return output;
    }

    let mut end = max_len;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n\n[Output truncated: {} of {} bytes shown]",
        &output[..end],
        end,
        output.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ParameterSchema, Tool};
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes input"
        }

        fn parameters_schema(&self) -> ParameterSchema {
            ParameterSchema::new()
        }

        async fn execute(
            &self,
            args: &serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolResult> {
            match args.get("text").and_then(|v| v.as_str()) {
                Some(text) => Ok(ToolResult::success(text)),
                None => anyhow::bail!("Missing required parameter: text"),
            }
        }
    }

    fn router() -> ToolRouter {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        ToolRouter::new(registry)
    }

    #[tokio::test]
    async fn test_router_success() {
        let call = ToolCall {
            name: "echo".to_string(),
            arguments: json!({"text": "hello"}),
        };

        match router().route(&call, &ToolContext::default()).await {
            RouteResult::Success(r) => {
                assert!(r.success);
                assert_eq!(r.output, "hello");
            }
            other => panic!("unexpected route result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_router_not_found() {
        let call = ToolCall {
            name: "nonexistent".to_string(),
            arguments: json!({}),
        };

        let result = router().route(&call, &ToolContext::default()).await;
        assert!(matches!(result, RouteResult::NotFound(_)));
        assert_eq!(result.into_message(), ("Tool not found: nonexistent".to_string(), false));
    }

    #[tokio::test]
    async fn test_router_error() {
        let call = ToolCall {
            name: "echo".to_string(),
            arguments: json!({}),
        };

        let (message, ok) = router().route(&call, &ToolContext::default()).await.into_message();
        assert!(!ok);
        assert!(message.contains("Missing required parameter: text"));
    }

    #[tokio::test]
    async fn test_router_truncates() {
        let call = ToolCall {
            name: "echo".to_string(),
            arguments: json!({"text": "abcdefghij"}),
        };
        let ctx = ToolContext::default().with_max_output_len(4);

        let (message, _) = router().route(&call, &ctx).await.into_message();
        assert!(message.starts_with("abcd\n"));
        assert!(message.contains("4 of 10 bytes"));
    }

    #[test]
    fn test_truncate_char_boundary() {
        let out = truncate_output("héllo".to_string(), 2);
        assert!(out.starts_with("h\n"));
    }
}
