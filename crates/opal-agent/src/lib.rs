//! # opal-agent
//!
//! The Opal agent core: everything between a user task and its terminal
//! event.
//!
//! - **[`llm`]** -- the [`LlmClient`] contract, OpenAI-compatible client,
//!   streaming accumulation, retry with jittered backoff.
//! - **[`tools`]** -- the [`Tool`] contract, concurrent registry, and the
//!   invocation gateway (validation, timeout, cancellation, panic
//!   isolation), plus the `subagent` delegation tool.
//! - **[`engine`]** -- the ReAct loop: window assembly, tool dispatch
//!   (serial and bounded-parallel), stop conditions, event emission.
//! - **[`coordinator`]** -- session lifecycle, per-session run
//!   serialization, model-profile resolution, listener binding.
//! - **[`compaction`]** -- the pure compression hook for long histories.
//! - **[`history`]** -- store↔engine message conversion and the
//!   never-orphan-a-tool-message window rules.
//! - **[`profile`]** -- resolved model bindings with fail-fast validation.

pub mod compaction;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod history;
pub mod llm;
pub mod profile;
pub mod tools;

// Re-export the most commonly used types at the crate root for convenience.
pub use compaction::{Compressor, TranscriptCompressor};
pub use config::EngineConfig;
pub use coordinator::{Coordinator, TaskInput};
pub use engine::{Engine, RunParams, TaskResult};
pub use error::{AgentError, Result};
pub use llm::{
    ChatRequest, ChatResponse, DeltaStream, LlmClient, Message, OpenAiClient, RetryConfig, Role,
    StreamDelta, ToolCall, Usage,
};
pub use profile::ModelProfile;
pub use tools::{
    SubagentTool, SubtaskExecutor, Tool, ToolContext, ToolDescriptor, ToolGateway, ToolOutput,
    ToolRegistry, ToolResult,
};
