//! Tool that hands a query to the browser agent

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::browser::{BrowserAgent, BrowserSession, BrowserSource, SessionTimeouts};
use crate::tools::{
    required_str, ParameterProperty, ParameterSchema, Tool, ToolContext, ToolResult,
};

/// Opens a browser per call, runs the browser agent, returns its text result
pub struct BrowserAgentTool {
    agent: Arc<BrowserAgent>,
    source: BrowserSource,
    timeouts: SessionTimeouts,
}

impl BrowserAgentTool {
    pub fn new(
        agent: Arc<BrowserAgent>,
        source: BrowserSource,
        timeouts: SessionTimeouts,
    ) -> Self {
        Self {
            agent,
            source,
            timeouts,
        }
    }
}

#[async_trait]
impl Tool for BrowserAgentTool {
    fn name(&self) -> &str {
        "browser_agent"
    }

    fn description(&self) -> &str {
        "Use this to navigate in a real browser: visit URLs, click links, scrape content, etc."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new().with_required(
            "query",
            ParameterProperty::string(
                "What to do in the browser, as a clear and concise instruction",
            ),
        )
    }

    #[instrument(skip(self, args, _ctx))]
    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let query = required_str(args, "query")?;
        info!(source = ?self.source, "Opening browser");

        let session = match BrowserSession::open(self.source.clone(), self.timeouts).await {
            Ok(s) => s,
            Err(e) => {
                return Ok(ToolResult::error(format!("Could not open a browser: {:#}", e)));
            }
        };
        if let Some(remote) = session.remote_session() {
            info!(viewer = %remote.session_viewer_url, "Remote session live");
        }

        let (outcome, report) = self.agent.run(query, session).await;
        if !report.is_clean() {
            warn!(errors = ?report.errors, "Browser cleanup was incomplete");
        }

        match outcome {
            Ok(text) => Ok(ToolResult::success(text)),
            Err(e) => Ok(ToolResult::error(format!("Browser agent failed: {:#}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::ScriptedModel;
    use crate::browser::BrowserAgentSettings;
    use serde_json::json;

    fn tool() -> BrowserAgentTool {
        let agent = BrowserAgent::new(ScriptedModel::new(vec![]), BrowserAgentSettings::new("m"));
        // Nothing listens on port 1, so opening the browser fails fast
        BrowserAgentTool::new(
            Arc::new(agent),
            BrowserSource::Attach {
                endpoint: "ws://127.0.0.1:1/devtools/browser/none".to_string(),
            },
            SessionTimeouts::default(),
        )
    }

    #[test]
    fn test_definition() {
        let def = tool().to_definition();
        assert_eq!(def.function.name, "browser_agent");
        assert_eq!(def.function.parameters["required"], json!(["query"]));
        assert!(def.function.description.starts_with("Use this to navigate in a real browser"));
    }

    #[tokio::test]
    async fn test_unreachable_browser_is_a_failed_result() {
        let result = tool()
            .execute(&json!({"query": "open example.com"}), &ToolContext::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Could not open a browser"));
    }

    #[tokio::test]
    async fn test_query_required() {
        assert!(tool().execute(&json!({}), &ToolContext::default()).await.is_err());
    }
}
