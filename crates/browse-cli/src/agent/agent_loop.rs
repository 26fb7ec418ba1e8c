//! Agent loop implementation

use std::io::{stdout, Write};
use std::sync::Arc;

use anyhow::Result;
use browse_core::{
    ChatMessage, ChatModel, FunctionCall, ToolCall as LlmToolCall, ToolDefinition,
};
use tracing::{debug, info, instrument, warn};

use crate::tools::router::{RouteResult, ToolRouter};
use crate::tools::{ToolCall, ToolContext};

use super::state::{AgentConfig, AgentState, FailureTracker};

// ANSI colors
const GREEN: &str = "\x1b[92m";
const BLUE: &str = "\x1b[94m";
const YELLOW: &str = "\x1b[93m";
const CYAN: &str = "\x1b[96m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// The agent loop orchestrator
pub struct AgentLoop {
    model: Arc<dyn ChatModel>,
    router: ToolRouter,
    config: AgentConfig,
    tool_ctx: ToolContext,
}

impl AgentLoop {
    /// Create a new agent loop
    pub fn new(model: Arc<dyn ChatModel>, router: ToolRouter, config: AgentConfig) -> Self {
        Self {
            model,
            router,
            config,
            tool_ctx: ToolContext::default(),
        }
    }

    /// Run the agent with a task
    #[instrument(
        skip(self, task),
        fields(agent = %self.config.name, model = %self.config.model)
    )]
    pub async fn run(&self, task: &str) -> Result<AgentState> {
        info!(
            task_len = task.len(),
            max_iterations = self.config.max_iterations,
            "Starting agent loop"
        );
        let mut state = AgentState::new();

        let system = match self.config.system_prompt {
            Some(ref prompt) => prompt.clone(),
            None => self.default_system_prompt(),
        };
        state.add_message(ChatMessage::system(system));
        state.add_message(ChatMessage::user(task));

        let tool_defs = self.tool_definitions();

        while !state.finished && state.iteration < self.config.max_iterations {
            state.increment_iteration();
            debug!(
                iteration = state.iteration,
                messages = state.messages.len(),
                "Starting iteration"
            );

            if self.config.verbose {
                print!("{}[{} {}]{} ", DIM, self.config.name, state.iteration, RESET);
                stdout().flush()?;
            }

            let response = match self
                .model
                .chat(&self.config.model, &state.messages, &tool_defs, &self.config.options)
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "LLM request failed");
                    if self.config.verbose {
                        println!("{}LLM error{}", YELLOW, RESET);
                    }
                    state.mark_error(format!("LLM error: {:#}", e));
                    break;
                }
            };

            state.record_usage(response.usage.as_ref());
            debug!(
                usage = ?response.usage,
                finish_reason = ?response.finish_reason,
                "Received response"
            );

            let content = response.message.content;
            let mut tool_calls = response.message.tool_calls;

            // Some models write tool calls into the content instead of using native tool calling
            if tool_calls.is_empty() {
                let registry = self.router.registry();
                let is_tool = |name: &str| registry.get(name).is_some();
                if let Some(parsed_calls) = parse_json_tool_calls(&content, is_tool) {
                    debug!(count = parsed_calls.len(), "Parsed tool calls from content JSON");
                    tool_calls = parsed_calls;
                }
            }

            if tool_calls.is_empty() {
                info!(iterations = state.iteration, "Agent completed task");
                if self.config.verbose {
                    println!("{}Done{}", GREEN, RESET);
                }
                state.mark_finished(content.clone());
                state.add_message(ChatMessage::assistant(content));
                break;
            }

            if self.config.verbose && !content.trim().is_empty() {
                println!();
                println!("{}{}{}", BLUE, content.trim(), RESET);
            }

            state.add_message(ChatMessage::assistant_with_tools(content, tool_calls.clone()));

            debug!(tool_count = tool_calls.len(), "Processing tool calls");
            for tool_call in &tool_calls {
                let call = ToolCall {
                    name: tool_call.function.name.clone(),
                    arguments: tool_call.function.arguments.clone(),
                };
                let signature = FailureTracker::tool_signature(&call.name, &call.arguments);

                if self.config.verbose {
                    if state.failure_tracker.is_repeated_call(&signature) {
                        println!(
                            "{}[Warning: This tool call has failed {} time(s)]{}",
                            YELLOW,
                            state.failure_tracker.failure_count(&signature),
                            RESET
                        );
                    }
                    print!("{}[Tool: {}]{} ", CYAN, call.name, RESET);
                    stdout().flush()?;
                }

                let result = self.router.route(&call, &self.tool_ctx).await;

                let final_output = match &result {
                    RouteResult::Success(r) if r.is_final && r.success => Some(r.output.clone()),
                    _ => None,
                };
                let (tool_result, is_success) = result.into_message();

                if self.config.verbose {
                    if is_success {
                        println!("{}OK{}", GREEN, RESET);
                    } else {
                        println!("{}Failed{}", YELLOW, RESET);
                    }
                }

                let tool_call_id = if tool_call.id.is_empty() {
                    tool_call.function.name.clone()
                } else {
                    tool_call.id.clone()
                };
                state.add_message(ChatMessage::tool_result(tool_call_id, tool_result.clone()));

                if let Some(output) = final_output {
                    info!(
                        tool = %call.name,
                        iterations = state.iteration,
                        "Agent finished through tool"
                    );
                    state.mark_finished(output);
                    break;
                }

                if is_success {
                    state.failure_tracker.record_success(&signature);
                } else if let Some(abort_reason) =
                    state.failure_tracker.record_failure(&signature, &tool_result)
                {
                    warn!(
                        tool = %call.name,
                        failures = state.failure_tracker.failure_count(&signature),
                        "Aborting due to consecutive failures"
                    );
                    if self.config.verbose {
                        println!("{}[Abort]{} {}", YELLOW, RESET, abort_reason);
                    }
                    state.mark_error(abort_reason);
                    break;
                }
            }
        }

        if !state.finished && state.iteration >= self.config.max_iterations {
            warn!(max_iterations = self.config.max_iterations, "Agent reached maximum iterations");
            state.mark_error(format!(
                "Agent reached maximum iterations ({})",
                self.config.max_iterations
            ));
        }

        if self.config.verbose && state.token_usage.call_count > 0 {
            println!("{}[Usage]{} {}", DIM, RESET, state.token_usage.summary());
        }

        info!(
            finished = state.finished,
            iterations = state.iteration,
            prompt_tokens = state.token_usage.prompt_tokens,
            completion_tokens = state.token_usage.completion_tokens,
            total_tokens = state.token_usage.total_tokens(),
            error = ?state.error,
            "Agent loop completed"
        );

        Ok(state)
    }

    fn default_system_prompt(&self) -> String {
        format!(
            "You are an AI assistant with access to tools for completing tasks.\n\n\
             ## Available Tools\n{}\n\n\
             When you have completed the task, provide a final response \
             without calling any more tools.",
            self.format_tool_list()
        )
    }

    fn format_tool_list(&self) -> String {
        self.router
            .registry()
            .all_tools()
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.router.registry().tool_definitions()
    }
}

/// Parse JSON tool calls from content text
///
/// Supports:
/// - Raw JSON: `{"name": "tool_name", "arguments": {...}}`
/// - Markdown code blocks: ```json\n{"name": ...}\n```
/// - Multiple tool calls (array or sequential)
///
/// An object counts only when it has both `name` and `arguments` and
/// `is_tool` accepts the name, so JSON quoted in an answer stays text.
fn parse_json_tool_calls(
    content: &str,
    is_tool: impl Fn(&str) -> bool,
) -> Option<Vec<LlmToolCall>> {
    let content = content.trim();
    if content.is_empty() {
        return None;
    }

    let json_content = extract_json_from_markdown(content).unwrap_or(content);

    if let Some(call) = try_parse_single_tool_call(json_content, &is_tool) {
        return Some(vec![call]);
    }

    if let Some(calls) = try_parse_tool_call_array(json_content, &is_tool) {
        return Some(calls);
    }

    extract_json_objects(content, &is_tool)
}

/// Extract JSON content from markdown code blocks
fn extract_json_from_markdown(content: &str) -> Option<&str> {
    let patterns = ["```json\n", "```JSON\n", "```\n"];

    for pattern in patterns {
        if let Some(start) = content.find(pattern) {
            let json_start = start + pattern.len();
            if let Some(end) = content[json_start..].find("```") {
                return Some(content[json_start..json_start + end].trim());
            }
        }
    }

    None
}

#[derive(serde::Deserialize)]
struct ToolCallJson {
    name: String,
    arguments: serde_json::Value,
}

impl ToolCallJson {
    fn into_call(self, is_tool: &impl Fn(&str) -> bool) -> Option<LlmToolCall> {
        if self.name.is_empty() || !is_tool(&self.name) {
            return None;
        }
        Some(LlmToolCall {
            id: uuid::Uuid::new_v4().to_string(),
            function: FunctionCall {
                name: self.name,
                arguments: self.arguments,
            },
        })
    }
}

fn try_parse_single_tool_call(
    content: &str,
    is_tool: &impl Fn(&str) -> bool,
) -> Option<LlmToolCall> {
    serde_json::from_str::<ToolCallJson>(content)
        .ok()?
        .into_call(is_tool)
}

fn try_parse_tool_call_array(
    content: &str,
    is_tool: &impl Fn(&str) -> bool,
) -> Option<Vec<LlmToolCall>> {
    let parsed: Vec<ToolCallJson> = serde_json::from_str(content).ok()?;
    let calls: Vec<LlmToolCall> = parsed
        .into_iter()
        .filter_map(|call| call.into_call(is_tool))
        .collect();

    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}

/// Extract JSON objects from content that look like tool calls
fn extract_json_objects(
    content: &str,
    is_tool: &impl Fn(&str) -> bool,
) -> Option<Vec<LlmToolCall>> {
    let mut calls = Vec::new();
    let mut depth = 0usize;
    let mut start = None;

    for (i, c) in content.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        if let Some(call) = try_parse_single_tool_call(&content[s..=i], is_tool) {
                            calls.push(call);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}
