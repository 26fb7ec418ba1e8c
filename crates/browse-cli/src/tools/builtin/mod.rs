//! Built-in tools for the assistant

mod browser_agent;
mod weather;

pub use browser_agent::BrowserAgentTool;
pub use weather::WeatherTool;

use super::registry::ToolRegistry;

/// Create the assistant's registry: the weather stub and the browser tool
pub fn create_assistant_registry(browser: BrowserAgentTool) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(WeatherTool);
    registry.register(browser);
    registry
}
