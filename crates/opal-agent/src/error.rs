//! Agent error types.
//!
//! All agent subsystems surface errors through [`AgentError`].  Each variant
//! carries enough context for callers to decide how to handle the failure;
//! [`AgentError::is_transient`] drives the LLM retry policy.

/// Unified error type for the agent core.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- LLM errors ----------------------------------------------------------
    /// The provider returned a non-success HTTP status.
    #[error("llm request failed with status {status}: {reason}")]
    LlmHttp { status: u16, reason: String },

    /// The request never produced a response (connect, DNS, timeout).
    #[error("llm transport error: {reason}")]
    LlmTransport { reason: String },

    /// The response body could not be parsed into the expected shape.
    #[error("llm response parse error: {reason}")]
    LlmParse { reason: String },

    /// The streaming connection broke or produced invalid frames.
    #[error("llm stream error: {reason}")]
    LlmStream { reason: String },

    /// The API key is missing for a provider that requires one.
    #[error("missing api key for provider: {provider}")]
    MissingApiKey { provider: String },

    /// The resolved model profile is internally inconsistent.
    #[error("invalid model profile: {reason}")]
    InvalidProfile { reason: String },

    // -- Tool errors ---------------------------------------------------------
    /// A tool name referenced by the LLM is not in the registry.
    #[error("unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    /// A tool invocation failed.
    #[error("tool execution failed for `{tool_name}`: {reason}")]
    ToolExecutionFailed { tool_name: String, reason: String },

    /// The subagent tool was invoked from within a subagent.
    #[error("recursive subagent not allowed")]
    RecursiveSubagent,

    // -- Engine errors -------------------------------------------------------
    /// An engine invariant was violated; the session is unhealthy.
    #[error("engine invariant violated: {reason}")]
    InvariantViolation { reason: String },

    // -- Upstream crate errors -----------------------------------------------
    /// An error propagated from the session store.
    #[error("store error: {0}")]
    Store(#[from] opal_store::StoreError),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal agent error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Whether a retry has a realistic chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::LlmHttp { status, .. } => *status >= 500 || *status == 429,
            Self::LlmTransport { .. } => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::LlmTransport {
                reason: err.to_string(),
            }
        } else {
            Self::LlmStream {
                reason: err.to_string(),
            }
        }
    }
}
