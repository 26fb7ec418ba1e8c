//! Weather lookup tool (fixed forecast)

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::tools::{required_str, ParameterProperty, ParameterSchema, Tool, ToolContext, ToolResult};

/// Returns a sunny forecast for any city
pub struct WeatherTool;

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get the weather forecast for a city."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new().with_required("city", ParameterProperty::string("Name of the city"))
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let city = required_str(args, "city")?;
        info!("weather for {}", city);
        Ok(ToolResult::success(format!("The weather in {} is sunny.", city)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sunny_everywhere() {
        for city in ["Lahore", "Reykjavík", "New York", ""] {
            let result = WeatherTool
                .execute(&json!({ "city": city }), &ToolContext::default())
                .await
                .unwrap();
            assert!(result.success);
            assert_eq!(result.output, format!("The weather in {} is sunny.", city));
        }
    }

    #[tokio::test]
    async fn test_city_required() {
        let err = WeatherTool
            .execute(&json!({}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("city"));
    }

    #[test]
    fn test_definition() {
        let def = WeatherTool.to_definition();
        assert_eq!(def.function.name, "get_weather");
        assert_eq!(def.function.parameters["required"], json!(["city"]));
    }
}
