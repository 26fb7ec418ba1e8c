//! Agent state management

use browse_core::{ChatMessage, ChatOptions, Usage};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Configuration for the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Label used in logs ("assistant", "browser")
    pub name: String,
    /// Model to use
    pub model: String,
    /// System prompt
    pub system_prompt: Option<String>,
    /// Maximum iterations before stopping
    pub max_iterations: usize,
    /// Whether to print tool executions
    pub verbose: bool,
    /// Sampling options passed to every request
    pub options: ChatOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "agent".to_string(),
            model: String::new(),
            system_prompt: None,
            max_iterations: 10,
            verbose: false,
            options: ChatOptions::default(),
        }
    }
}

impl AgentConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }
}

/// Token usage accumulated over a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub call_count: u32,
}

impl TokenUsage {
    pub fn record(&mut self, usage: &Usage) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.call_count += 1;
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn summary(&self) -> String {
        format!(
            "{} tokens ({} prompt, {} completion) over {} call(s)",
            self.total_tokens(),
            self.prompt_tokens,
            self.completion_tokens,
            self.call_count
        )
    }
}

/// State of the agent during execution
#[derive(Debug)]
pub struct AgentState {
    /// Message history
    pub messages: Vec<ChatMessage>,
    /// Current iteration
    pub iteration: usize,
    /// Whether the agent has finished
    pub finished: bool,
    /// Final response (if finished)
    pub final_response: Option<String>,
    /// Error message (if failed)
    pub error: Option<String>,
    /// Failure tracker for detecting infinite loops
    pub failure_tracker: FailureTracker,
    /// Tokens reported by the provider
    pub token_usage: TokenUsage,
}

/// Default max consecutive failures before aborting
const DEFAULT_MAX_CONSECUTIVE_FAILURES: usize = 3;

impl AgentState {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            iteration: 0,
            finished: false,
            final_response: None,
            error: None,
            failure_tracker: FailureTracker::new(DEFAULT_MAX_CONSECUTIVE_FAILURES),
            token_usage: TokenUsage::default(),
        }
    }

    pub fn add_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn mark_finished(&mut self, response: String) {
        self.finished = true;
        self.final_response = Some(response);
    }

    pub fn mark_error(&mut self, error: String) {
        self.finished = true;
        self.error = Some(error);
    }

    pub fn increment_iteration(&mut self) {
        self.iteration += 1;
    }

    pub fn record_usage(&mut self, usage: Option<&Usage>) {
        if let Some(usage) = usage {
            self.token_usage.record(usage);
        }
    }

    /// The final response, or the error that ended the run
    pub fn into_result(self) -> anyhow::Result<String> {
        match (self.error, self.final_response) {
            (Some(error), _) => Err(anyhow::anyhow!(error)),
            (None, Some(response)) => Ok(response),
            (None, None) => Err(anyhow::anyhow!("Agent stopped without a response")),
        }
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks consecutive failures for tool calls to detect infinite loops
#[derive(Debug, Default)]
pub struct FailureTracker {
    /// Map from tool call signature to consecutive failure count
    failures: HashMap<String, ConsecutiveFailure>,
    /// Last tool call signature
    last_signature: Option<String>,
    /// Maximum consecutive failures before aborting
    max_consecutive: usize,
}

#[derive(Debug, Clone)]
pub struct ConsecutiveFailure {
    pub count: usize,
    pub last_error: String,
}

impl FailureTracker {
    pub fn new(max_consecutive: usize) -> Self {
        Self {
            failures: HashMap::new(),
            last_signature: None,
            max_consecutive,
        }
    }

    /// Create a signature for a tool call (name + arguments hash)
    pub fn tool_signature(name: &str, args: &serde_json::Value) -> String {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        args.to_string().hash(&mut hasher);
        format!("{}:{:x}", name, hasher.finish())
    }

    /// Record a successful tool execution, resetting failure count
    pub fn record_success(&mut self, signature: &str) {
        self.failures.remove(signature);
        self.last_signature = Some(signature.to_string());
    }

    /// Record a failed tool execution.
    /// Returns the abort reason once the same call has failed too often.
    pub fn record_failure(&mut self, signature: &str, error: &str) -> Option<String> {
        let entry = self
            .failures
            .entry(signature.to_string())
            .or_insert(ConsecutiveFailure {
                count: 0,
                last_error: String::new(),
            });

        entry.count += 1;
        entry.last_error = error.to_string();
        self.last_signature = Some(signature.to_string());

        if entry.count >= self.max_consecutive {
            Some(format!(
                "Tool call failed {} consecutive times with error: {}",
                entry.count, entry.last_error
            ))
        } else {
            None
        }
    }

    /// Same signature as the previous call, and that call failed
    pub fn is_repeated_call(&self, signature: &str) -> bool {
        self.last_signature.as_deref() == Some(signature) && self.failures.contains_key(signature)
    }

    pub fn failure_count(&self, signature: &str) -> usize {
        self.failures.get(signature).map_or(0, |f| f.count)
    }
}
