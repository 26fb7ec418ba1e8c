//! browse-agent: LLM assistant with a weather tool and a browser-automation tool
//!
//! The assistant runs an OpenAI-compatible model with tool calling; the
//! browser tool drives Chrome over the DevTools Protocol, locally or through
//! a Steel remote session.

mod agent;
mod browser;
mod commands;
mod progress;
mod tools;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::BrowserChoice;

#[derive(Debug, Parser)]
#[command(name = "browse-agent")]
#[command(about = "LLM agent with weather and browser-automation tools", version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ask the assistant (reads the query from stdin when none is given)
    Ask {
        /// The query
        prompt: Vec<String>,

        #[command(flatten)]
        browser: BrowserArgs,
    },

    /// Run the browser agent directly on a task
    Browse {
        /// The task
        task: Vec<String>,

        #[command(flatten)]
        browser: BrowserArgs,
    },

    /// Manage Steel remote browser sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// List the assistant's tools
    Tools,
}

#[derive(Debug, Args)]
struct BrowserArgs {
    /// Use a Steel remote browser session
    #[arg(long)]
    remote: bool,

    /// Attach to a running browser (ws:// or http:// DevTools endpoint)
    #[arg(long, env = "BROWSER_CDP_URL")]
    cdp_url: Option<String>,
}

impl From<BrowserArgs> for BrowserChoice {
    fn from(args: BrowserArgs) -> Self {
        Self {
            remote: args.remote,
            cdp_url: args.cdp_url,
        }
    }
}

#[derive(Debug, Subcommand)]
enum SessionAction {
    /// Create a session and print its viewer URL
    Create {
        /// Route traffic through Steel's proxy
        #[arg(long)]
        proxy: bool,

        /// Let Steel solve captchas
        #[arg(long)]
        solve_captcha: bool,
    },
    /// Release a session
    Release {
        /// Session id
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before parsing, so .env values reach clap's env fallbacks
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Some(Commands::Ask { prompt, browser }) => {
            commands::ask(&prompt.join(" "), browser.into(), cli.verbose).await
        }
        Some(Commands::Browse { task, browser }) => {
            commands::browse(&task.join(" "), browser.into(), cli.verbose).await
        }
        Some(Commands::Session { action }) => match action {
            SessionAction::Create {
                proxy,
                solve_captcha,
            } => commands::session_create(proxy, solve_captcha).await,
            SessionAction::Release { id } => commands::session_release(&id).await,
        },
        Some(Commands::Tools) => commands::tools().await,
        // Default to the assistant reading its query from stdin
        None => commands::ask("", BrowserChoice::default(), cli.verbose).await,
    }
}
