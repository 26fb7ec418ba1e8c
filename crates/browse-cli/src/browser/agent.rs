//! LLM-driven browser controller

use std::sync::Arc;

use anyhow::Result;
use browse_core::{ChatModel, ChatOptions};
use tracing::{info, instrument};

use super::actions::browser_registry;
use super::page::PageDriver;
use super::session::{BrowserSession, CleanupReport};
use crate::agent::{AgentConfig, AgentLoop};
use crate::tools::router::ToolRouter;

const BROWSER_INSTRUCTIONS: &str = "You control a real web browser through tools. \
Complete the user's task by navigating pages and reading their content.

Guidelines:
- Start with go_to_url. Only http and https URLs can be opened.
- Use list_interactive to discover links, buttons and fields with their CSS selectors \
before clicking or typing.
- Use extract_content to read the page; do not guess what a page says.
- When a selector fails, list the interactive elements again instead of retrying the same call.
- Finish by calling done with a complete answer to the task. Include the concrete facts you found.";

/// Settings for one browser agent
#[derive(Debug, Clone)]
pub struct BrowserAgentSettings {
    pub model: String,
    /// Model turns allowed before the run fails
    pub max_steps: usize,
    pub max_content_chars: usize,
    pub temperature: Option<f32>,
    pub verbose: bool,
}

impl BrowserAgentSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_steps: 25,
            max_content_chars: 20_000,
            temperature: None,
            verbose: false,
        }
    }

    pub fn from_config(config: &browse_core::Config) -> Self {
        Self {
            model: config.llm.model.clone(),
            max_steps: config.settings.browser.max_steps,
            max_content_chars: config.settings.browser.max_content_chars,
            temperature: config.settings.agent.temperature,
            verbose: false,
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Drives a page with the page-action tools until the model calls `done`
pub struct BrowserAgent {
    model: Arc<dyn ChatModel>,
    settings: BrowserAgentSettings,
}

impl BrowserAgent {
    pub fn new(model: Arc<dyn ChatModel>, settings: BrowserAgentSettings) -> Self {
        Self { model, settings }
    }

    /// Run a task in its own session; the session is always cleaned up
    pub async fn run(
        &self,
        task: &str,
        session: BrowserSession,
    ) -> (Result<String>, CleanupReport) {
        session.run(|page| self.run_on_page(task, page)).await
    }

    /// Run a task against an already open page
    #[instrument(skip(self, task, page), fields(model = %self.settings.model))]
    pub async fn run_on_page(&self, task: &str, page: Arc<dyn PageDriver>) -> Result<String> {
        let registry = browser_registry(page, self.settings.max_content_chars);
        let config = AgentConfig::new(&self.settings.model)
            .with_name("browser")
            .with_system_prompt(BROWSER_INSTRUCTIONS)
            .with_max_iterations(self.settings.max_steps)
            .with_verbose(self.settings.verbose)
            .with_options(ChatOptions {
                temperature: self.settings.temperature,
                ..Default::default()
            });

        let agent = AgentLoop::new(Arc::clone(&self.model), ToolRouter::new(registry), config);
        let state = agent.run(task).await?;
        info!(
            steps = state.iteration,
            total_tokens = state.token_usage.total_tokens(),
            "Browser agent finished"
        );
        state.into_result()
    }
}

impl std::fmt::Debug for BrowserAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserAgent")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::{text_reply, tool_reply, ScriptedModel};
    use crate::browser::actions::tests::ScriptedPage;
    use crate::browser::session::tests::{CallLog, FakeConnection};
    use serde_json::json;

    fn agent(model: Arc<ScriptedModel>, max_steps: usize) -> BrowserAgent {
        let mut settings = BrowserAgentSettings::new("test-model");
        settings.max_steps = max_steps;
        BrowserAgent::new(model, settings)
    }

    #[tokio::test]
    async fn test_navigates_then_finishes_with_done() {
        let model = ScriptedModel::new(vec![
            tool_reply("c1", "go_to_url", json!({"url": "https://github.com/heyibad/tasker"})),
            tool_reply("c2", "done", json!({"result": "Tasker is a task manager."})),
        ]);
        let page = ScriptedPage::with_answers(vec![json!("heyibad/tasker")]);

        let result = agent(model.clone(), 5)
            .run_on_page("What is tasker?", page.clone())
            .await
            .unwrap();

        assert_eq!(result, "Tasker is a task manager.");
        assert_eq!(
            *page.navigations.lock().unwrap(),
            vec!["https://github.com/heyibad/tasker"]
        );
        let requests = model.requests.lock().unwrap();
        assert!(requests[0][0].content.contains("You control a real web browser"));
        assert!(requests[1].last().unwrap().content.contains("title: heyibad/tasker"));
    }

    #[tokio::test]
    async fn test_plain_reply_is_the_result() {
        let model = ScriptedModel::new(vec![text_reply("Nothing to browse.")]);
        let page = ScriptedPage::with_answers(vec![]);

        let result = agent(model, 5).run_on_page("Say hi", page).await.unwrap();
        assert_eq!(result, "Nothing to browse.");
    }

    #[tokio::test]
    async fn test_step_limit_is_an_error() {
        let model = ScriptedModel::new(vec![
            tool_reply("c1", "scroll", json!({"direction": "down"})),
            tool_reply("c2", "scroll", json!({"direction": "down"})),
        ]);
        let page = ScriptedPage::with_answers(vec![json!(100), json!(200)]);

        let err = agent(model, 2).run_on_page("Scroll forever", page).await.unwrap_err();
        assert!(err.to_string().contains("maximum iterations (2)"));
    }

    #[tokio::test]
    async fn test_run_cleans_up_session() {
        let log = CallLog::default();
        let session = BrowserSession::from_parts(
            Box::new(FakeConnection {
                log: log.clone(),
                fail_open: false,
                fail_shutdown: false,
            }),
            None,
        );
        let model = ScriptedModel::new(vec![]);

        let (result, report) = agent(model, 5).run("Anything", session).await;

        assert!(result.unwrap_err().to_string().contains("LLM error"));
        assert!(report.browser_closed);
        assert_eq!(report.session_released, None);
        assert_eq!(log.entries(), vec!["open_page", "shutdown"]);
    }
}
