//! Agent framework for autonomous task execution
//!
//! Implements an observe-think-act loop: the model sees the conversation and
//! the tool definitions, requests tool calls, and sees their results until it
//! answers in plain text or a tool ends the run.

mod agent_loop;
mod state;

pub use agent_loop::AgentLoop;
pub use state::AgentConfig;

#[cfg(test)]
pub(crate) use agent_loop::tests as testing;

/// Instructions for the top-level assistant
pub const ASSISTANT_INSTRUCTIONS: &str = "You are an AI assistant with two tools:
1. get_weather(city) → returns weather forecast
2. browser_agent(query) → can open a browser, visit URLs, click links, and scrape content.
Whenever the user asks you to navigate or fetch information from a website, \
you MUST call browser_agent with a clear, concise query.";
