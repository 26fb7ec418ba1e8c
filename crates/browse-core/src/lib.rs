//! browse-core: Shared library for the browse agent
//!
//! Provides:
//! - Configuration loading (.env variables, browse-agent.toml)
//! - OpenAI-compatible chat client with tool calling
//! - Steel remote browser sessions
//! - Local Chrome process management

pub mod config;
pub mod openai;
pub mod process;
pub mod steel;

#[cfg(test)]
mod stub_http;

pub use config::{Config, ConfigError, Settings};
pub use openai::{
    ChatMessage, ChatModel, ChatOptions, ChatResponse, FunctionCall, FunctionDefinition,
    OpenAiClient, RetryConfig, Role, ToolCall, ToolDefinition, Usage,
};
pub use process::{ChromeOptions, ChromeProcess};
pub use steel::{SessionBroker, SessionOptions, SteelClient, SteelSession};
