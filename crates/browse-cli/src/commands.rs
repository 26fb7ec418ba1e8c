//! CLI commands implementation

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use browse_core::steel::redact_cdp_url;
use browse_core::{
    ChatModel, ChatOptions, ChromeOptions, Config, OpenAiClient, RetryConfig, SessionBroker,
    SessionOptions, SteelClient,
};
use tracing::{debug, info};

use crate::agent::{AgentConfig, AgentLoop, ASSISTANT_INSTRUCTIONS};
use crate::browser::session::CleanupReport;
use crate::browser::{
    BrowserAgent, BrowserAgentSettings, BrowserSession, BrowserSource, SessionTimeouts,
};
use crate::progress::StatusLine;
use crate::tools::builtin::{create_assistant_registry, BrowserAgentTool};
use crate::tools::registry::ToolRegistry;
use crate::tools::router::ToolRouter;

// ANSI color codes
const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const YELLOW: &str = "\x1b[93m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Task used by `browse` when none is given
const DEFAULT_BROWSE_TASK: &str = "Go to https://github.com/heyibad/tasker/, and tell me about it.";

/// Where the browser for a command comes from
#[derive(Debug, Clone, Default)]
pub struct BrowserChoice {
    /// Provision a Steel session
    pub remote: bool,
    /// Attach to a running browser
    pub cdp_url: Option<String>,
}

fn chat_model(config: &Config) -> Result<Arc<dyn ChatModel>> {
    let client = OpenAiClient::new(
        &config.llm.base_url,
        &config.llm.api_key,
        Duration::from_secs(config.settings.http.timeout_secs),
    )?
    .with_retry(RetryConfig::default().with_max_retries(config.settings.http.max_retries));
    Ok(Arc::new(client))
}

fn steel_broker(config: &Config) -> Result<Arc<dyn SessionBroker>> {
    let steel = config.steel()?.clone();
    let timeout = Duration::from_secs(config.settings.http.timeout_secs);
    Ok(Arc::new(SteelClient::new(steel, timeout)?))
}

fn session_timeouts(config: &Config) -> SessionTimeouts {
    SessionTimeouts {
        command: Duration::from_secs(config.settings.browser.command_timeout_secs),
        page_load: Duration::from_secs(config.settings.browser.page_load_timeout_secs),
    }
}

/// Remote wins over an explicit endpoint, which wins over launching Chrome
fn browser_source(config: &Config, choice: &BrowserChoice) -> Result<BrowserSource> {
    if choice.remote {
        return Ok(BrowserSource::Remote {
            broker: steel_broker(config)?,
            options: SessionOptions::default(),
        });
    }

    if let Some(endpoint) = choice.cdp_url.clone().or_else(|| config.browser.cdp_url.clone()) {
        return Ok(BrowserSource::Attach { endpoint });
    }

    Ok(BrowserSource::Launch(ChromeOptions {
        binary: config.browser.chrome_path.clone(),
        debug_port: config.settings.browser.debug_port,
        headless: config.headless(),
        ..Default::default()
    }))
}

fn browser_agent(config: &Config, model: Arc<dyn ChatModel>, verbose: bool) -> BrowserAgent {
    BrowserAgent::new(model, BrowserAgentSettings::from_config(config).with_verbose(verbose))
}

fn assistant_registry(
    config: &Config,
    choice: &BrowserChoice,
    verbose: bool,
) -> Result<ToolRegistry> {
    let model = chat_model(config)?;
    let tool = BrowserAgentTool::new(
        Arc::new(browser_agent(config, model, verbose)),
        browser_source(config, choice)?,
        session_timeouts(config),
    );
    Ok(create_assistant_registry(tool))
}

fn read_query() -> Result<String> {
    print!("Enter your query: ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line).context("Failed to read query from stdin")?;
    Ok(line.trim().to_string())
}

/// Run the assistant on one query
pub async fn ask(prompt: &str, choice: BrowserChoice, verbose: bool) -> Result<()> {
    let config = Config::load()?;

    let query = if prompt.trim().is_empty() {
        read_query()?
    } else {
        prompt.trim().to_string()
    };
    if query.is_empty() {
        anyhow::bail!("No query given");
    }

    let router = ToolRouter::new(assistant_registry(&config, &choice, verbose)?);
    let instructions = config
        .settings
        .agent
        .system_prompt
        .clone()
        .unwrap_or_else(|| ASSISTANT_INSTRUCTIONS.to_string());
    let agent_config = AgentConfig::new(&config.llm.model)
        .with_name("assistant")
        .with_system_prompt(instructions)
        .with_max_iterations(config.settings.agent.max_iterations)
        .with_verbose(verbose)
        .with_options(ChatOptions {
            temperature: config.settings.agent.temperature,
            ..Default::default()
        });

    let agent = AgentLoop::new(chat_model(&config)?, router, agent_config);
    info!(model = %config.llm.model, "Running assistant");

    let mut status = (!verbose).then(|| StatusLine::start("Thinking..."));
    let state = agent.run(&query).await;
    if let Some(ref mut status) = status {
        status.clear().await;
    }
    let state = state?;

    if let Some(ref response) = state.final_response {
        println!("{}", response);
    }
    if verbose {
        println!(
            "{}Completed in {} iteration(s); {}{}",
            DIM,
            state.iteration,
            state.token_usage.summary(),
            RESET
        );
    }

    state.into_result().map(|_| ())
}

/// Run the browser agent directly; failures are reported, not propagated
pub async fn browse(task: &str, choice: BrowserChoice, verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let task = if task.trim().is_empty() {
        DEFAULT_BROWSE_TASK
    } else {
        task.trim()
    };

    let source = browser_source(&config, &choice)?;
    let agent = browser_agent(&config, chat_model(&config)?, verbose);

    if choice.remote {
        println!("Creating Steel session...");
    }
    let opened = BrowserSession::open_observed(source, session_timeouts(&config), |remote| {
        println!("Session created at {}", remote.session_viewer_url);
    })
    .await;
    let session = match opened {
        Ok(s) => s,
        Err(failure) => {
            println!("{}An error occurred: {:#}{}", RED, failure.error, RESET);
            print_cleanup(&failure.cleanup);
            println!("Done!");
            return Ok(());
        }
    };

    println!("Running the agent...");
    debug!(task = %task, "Starting browser task");
    let (outcome, report) = agent.run(task, session).await;

    match outcome {
        Ok(result) => {
            println!("{}Task completed!{}", GREEN, RESET);
            println!();
            println!("{}", result);
            println!();
        }
        Err(e) => println!("{}An error occurred: {:#}{}", RED, e, RESET),
    }

    print_cleanup(&report);
    println!("Done!");

    Ok(())
}

fn print_cleanup(report: &CleanupReport) {
    if report.browser_closed {
        println!("Browser closed");
    }
    if report.session_released == Some(true) {
        println!("Session released");
    }
    for error in &report.errors {
        println!("{}Cleanup failed: {}{}", YELLOW, error, RESET);
    }
}

/// Create a Steel session and print how to reach it
pub async fn session_create(proxy: bool, solve_captcha: bool) -> Result<()> {
    let config = Config::load()?;
    let broker = steel_broker(&config)?;
    let options = SessionOptions {
        use_proxy: proxy,
        solve_captcha,
        session_timeout: None,
    };

    let status = StatusLine::start("Creating Steel session...");
    let session = match broker.create(&options).await {
        Ok(s) => s,
        Err(e) => {
            status.fail("Failed to create session").await;
            return Err(e);
        }
    };
    status.succeed(format!("Session {}", session.id)).await;

    println!("  Viewer: {}", session.session_viewer_url);
    println!("  CDP:    {}", redact_cdp_url(&broker.cdp_url(&session.id)?));
    if let Some(ref status) = session.status {
        println!("  Status: {}", status);
    }
    println!();
    println!("{}Release with: browse-agent session release {}{}", DIM, session.id, RESET);

    Ok(())
}

/// Release a Steel session by id
pub async fn session_release(id: &str) -> Result<()> {
    let config = Config::load()?;
    steel_broker(&config)?.release(id).await?;
    println!("{}✓{} Session released: {}", GREEN, RESET, id);
    Ok(())
}

/// List the assistant's tools
pub async fn tools() -> Result<()> {
    let config = Config::load()?;
    let registry = assistant_registry(&config, &BrowserChoice::default(), false)?;

    println!("{}Tools ({}){}", BOLD, registry.all_tools().len(), RESET);
    for tool in registry.all_tools() {
        println!("  {}{}{}", BOLD, tool.name(), RESET);
        println!("    {}", tool.description());
        for (name, prop) in tool.parameters_schema().properties {
            println!("    {}- {} ({}): {}{}", DIM, name, prop.param_type, prop.description, RESET);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use browse_core::Settings;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let mut env: HashMap<String, String> = [
            ("GEMINI_API_KEY", "g-key"),
            ("MODEL_NAME", "gemini-2.0-flash"),
            ("BASE_URL", "https://generativelanguage.googleapis.com/v1beta/openai"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        env.extend(vars.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        Config::from_lookup(|key| env.get(key).cloned(), Settings::default()).unwrap()
    }

    #[test]
    fn test_browser_source_launches_by_default() {
        let cfg = config(&[("BROWSER_HEADLESS", "false")]);
        let source = browser_source(&cfg, &BrowserChoice::default()).unwrap();
        match source {
            BrowserSource::Launch(options) => {
                assert!(!options.headless);
                assert_eq!(options.debug_port, 9222);
            }
            other => panic!("unexpected source: {other:?}"),
        }
    }

    #[test]
    fn test_browser_source_prefers_flag_over_env() {
        let cfg = config(&[("BROWSER_CDP_URL", "http://127.0.0.1:9333")]);

        let source = browser_source(&cfg, &BrowserChoice::default()).unwrap();
        assert!(matches!(
            source,
            BrowserSource::Attach { ref endpoint } if endpoint == "http://127.0.0.1:9333"
        ));

        let choice = BrowserChoice {
            remote: false,
            cdp_url: Some("ws://127.0.0.1:9444/devtools/browser/x".to_string()),
        };
        let source = browser_source(&cfg, &choice).unwrap();
        assert!(matches!(
            source,
            BrowserSource::Attach { ref endpoint } if endpoint.ends_with("/x")
        ));
    }

    #[test]
    fn test_remote_requires_steel_key() {
        let choice = BrowserChoice {
            remote: true,
            cdp_url: None,
        };
        let err = browser_source(&config(&[]), &choice).unwrap_err();
        assert!(err.to_string().contains("STEEL_API_KEY"));

        let source = browser_source(&config(&[("steel_api_key", "s-key")]), &choice).unwrap();
        assert!(matches!(source, BrowserSource::Remote { .. }));
    }

    #[test]
    fn test_assistant_registry_tools() {
        let registry = assistant_registry(&config(&[]), &BrowserChoice::default(), false).unwrap();
        assert_eq!(registry.list_names(), vec!["browser_agent", "get_weather"]);
    }
}
