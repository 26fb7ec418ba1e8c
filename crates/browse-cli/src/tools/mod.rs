//! Tool framework for agent-based execution
//!
//! Tools are exposed to the model as OpenAI-style function definitions.

pub mod builtin;
pub mod registry;
pub mod router;

use anyhow::Result;
use async_trait::async_trait;
use browse_core::ToolDefinition;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,
    /// Output from the tool
    pub output: String,
    /// Error message if failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The output is the agent's final answer; the loop stops after this call
    #[serde(skip)]
    pub is_final: bool,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            is_final: false,
        }
    }

    /// Create a failed result
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            is_final: false,
        }
    }

    /// Create a successful result that ends the run
    pub fn finish(output: impl Into<String>) -> Self {
        Self {
            is_final: true,
            ..Self::success(output)
        }
    }

    /// Text fed back to the model
    pub fn to_message(&self) -> String {
        match (&self.error, self.output.is_empty()) {
            (Some(err), true) => format!("Error: {}", err),
            (Some(err), false) => format!("{}\nError: {}", self.output, err),
            (None, _) => self.output.clone(),
        }
    }
}

/// Context provided to tools during execution
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Maximum output length (truncate if exceeded)
    pub max_output_len: usize,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            max_output_len: 50000,
        }
    }
}

impl ToolContext {
    pub fn with_max_output_len(mut self, len: usize) -> Self {
        self.max_output_len = len;
        self
    }
}

/// Schema for a tool parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterProperty {
    /// Parameter type (string, number, boolean)
    #[serde(rename = "type")]
    pub param_type: String,
    /// Parameter description
    pub description: String,
    /// Enum values if applicable
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

impl ParameterProperty {
    fn of_type(param_type: &str, description: impl Into<String>) -> Self {
        Self {
            param_type: param_type.to_string(),
            description: description.into(),
            enum_values: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::of_type("string", description)
    }

    pub fn number(description: impl Into<String>) -> Self {
        Self::of_type("number", description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::of_type("boolean", description)
    }

    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }
}

/// Schema describing tool parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Type is always "object"
    #[serde(rename = "type")]
    pub schema_type: String,
    /// Parameter properties
    pub properties: std::collections::BTreeMap<String, ParameterProperty>,
    /// Required parameter names
    #[serde(default)]
    pub required: Vec<String>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: std::collections::BTreeMap::new(),
            required: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        self.properties.insert(name.into(), prop);
        self
    }

    pub fn with_required(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), prop);
        self.required.push(name);
        self
    }
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// A tool call from the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool/function name
    pub name: String,
    /// Arguments as JSON
    pub arguments: Value,
}

/// Read a required string argument
pub fn required_str<'a>(args: &'a Value, name: &str) -> Result<&'a str> {
    args.get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {}", name))
}

/// The Tool trait that all tools must implement
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get a description of what the tool does
    fn description(&self) -> &str;

    /// Get the parameter schema
    fn parameters_schema(&self) -> ParameterSchema;

    /// Execute the tool with the given arguments
    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult>;

    /// Convert to a tool definition for the LLM
    fn to_definition(&self) -> ToolDefinition {
        let parameters = serde_json::to_value(self.parameters_schema())
            .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}));
        ToolDefinition::function(self.name(), self.description(), parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_serializes_as_json_schema() {
        let schema = ParameterSchema::new()
            .with_required("city", ParameterProperty::string("City name"))
            .with_property(
                "direction",
                ParameterProperty::string("Which way").with_enum(&["up", "down"]),
            );

        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(value["type"], "object");
        assert_eq!(value["required"], json!(["city"]));
        assert_eq!(value["properties"]["city"]["type"], "string");
        assert_eq!(value["properties"]["direction"]["enum"], json!(["up", "down"]));
        assert!(value["properties"]["city"].get("enum").is_none());
    }

    #[test]
    fn test_tool_result_message() {
        assert_eq!(ToolResult::success("ok").to_message(), "ok");
        assert_eq!(ToolResult::error("boom").to_message(), "Error: boom");
        assert!(ToolResult::finish("answer").is_final);
        assert!(!ToolResult::success("x").is_final);
    }

    #[test]
    fn test_required_str() {
        let args = json!({"city": "Lahore", "n": 3});
        assert_eq!(required_str(&args, "city").unwrap(), "Lahore");
        assert!(required_str(&args, "n").is_err());
        assert!(required_str(&args, "missing").is_err());
    }
}
