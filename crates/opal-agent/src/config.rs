//! Engine configuration.
//!
//! [`EngineConfig`] gathers every tunable of the ReAct loop.  Values come
//! from code or, at the CLI edge, from environment variables
//! (`MAX_ITERATIONS`, `MAX_HISTORY`, `TOOL_TIMEOUT_SECONDS`).

use std::time::Duration;

use crate::tools::gateway::DEFAULT_TOOL_TIMEOUT;

/// Default system prompt when the embedder supplies none.
const DEFAULT_SYSTEM_PROMPT: &str =
    "You are Opal, an AI assistant with access to tools. Think step by step, \
     use tools when they help, and answer concisely.";

/// Tunables for the ReAct loop and tool dispatch.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on think→act iterations per task.
    pub max_iterations: u32,

    /// Maximum number of history messages included in a request window.
    pub max_history: usize,

    /// Per-call tool timeout.
    pub tool_timeout: Duration,

    /// Consecutive tool failures that trigger an early exit.
    pub max_consecutive_failures: u32,

    /// Upper bound on concurrently executing tool calls from one assistant
    /// turn (applies only when every call is parallel-safe).
    pub max_parallel_tools: usize,

    /// Estimated-token budget above which the compression hook runs.
    pub compression_token_budget: usize,

    /// Messages preserved verbatim when compression runs.
    pub compression_keep_recent: usize,

    /// System prompt prepended to every request window.
    pub system_prompt: String,

    /// Prefer streaming LLM calls (fall back to one-shot when disabled).
    pub prefer_streaming: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_history: 100,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            max_consecutive_failures: 3,
            max_parallel_tools: 4,
            compression_token_budget: 24_000,
            compression_keep_recent: 8,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            prefer_streaming: true,
        }
    }
}

impl EngineConfig {
    /// Apply environment-variable overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse::<u32>("MAX_ITERATIONS") {
            self.max_iterations = v.max(1);
        }
        if let Some(v) = env_parse::<usize>("MAX_HISTORY") {
            self.max_history = v.max(1);
        }
        if let Some(v) = env_parse::<u64>("TOOL_TIMEOUT_SECONDS") {
            self.tool_timeout = Duration::from_secs(v.max(1));
        }
        self
    }

    /// Builder: set the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_iterations, 50);
        assert_eq!(config.max_consecutive_failures, 3);
        assert_eq!(config.max_parallel_tools, 4);
        assert_eq!(config.tool_timeout, Duration::from_secs(60));
        assert!(config.prefer_streaming);
    }
}
