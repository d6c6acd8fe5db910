//! LLM interaction layer.
//!
//! - **[`types`]** -- provider-agnostic messages, requests, deltas, usage.
//! - **[`client`]** -- the [`LlmClient`] contract and the OpenAI-compatible
//!   implementation.
//! - **[`streaming`]** -- SSE line parsing and delta accumulation.
//! - **[`retry`]** -- jittered backoff for transient failures.

pub mod client;
pub mod retry;
pub mod streaming;
pub mod types;

pub use client::{DeltaStream, LlmClient, OpenAiClient};
pub use retry::RetryConfig;
pub use streaming::StreamAccumulator;
pub use types::{
    ChatRequest, ChatResponse, Message, Role, StreamDelta, ToolCall, ToolCallFragment, Usage,
    estimate_tokens,
};
