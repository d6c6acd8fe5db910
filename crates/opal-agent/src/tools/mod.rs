//! Tool contract.
//!
//! Every capability the LLM can invoke implements [`Tool`]: a static
//! [`ToolDescriptor`] (name, LLM-visible description, JSON-Schema parameter
//! definition) plus an async `invoke`.  Tools never talk to the engine
//! directly; the [`gateway`] wraps each invocation with argument parsing,
//! schema validation, timeout, cancellation, and panic isolation, and the
//! engine only ever sees a [`ToolResult`] envelope.

pub mod gateway;
pub mod registry;
pub mod subagent;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};

use opal_store::Attachment;

use crate::error::Result;

pub use gateway::ToolGateway;
pub use registry::ToolRegistry;
pub use subagent::{SubagentTool, SubtaskExecutor, SubtaskOutcome};

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Static metadata for a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,

    /// LLM-visible description of what the tool does.
    pub description: String,

    /// JSON Schema (object subset: typed properties + required list)
    /// describing the tool's parameters.
    pub parameters: Value,

    /// Whether concurrent invocations of this tool are safe.  Only calls
    /// where every tool in the batch opts in are dispatched in parallel.
    #[serde(default)]
    pub parallel_safe: bool,
}

impl ToolDescriptor {
    /// Create a descriptor with an empty-object parameter schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": [],
            }),
            parallel_safe: false,
        }
    }

    /// Builder: set the parameter schema.
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Builder: mark concurrent invocations as safe.
    pub fn parallel_safe(mut self) -> Self {
        self.parallel_safe = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Invocation context
// ---------------------------------------------------------------------------

/// Per-invocation context handed to every tool.
#[derive(Clone)]
pub struct ToolContext {
    /// The session this invocation belongs to.
    pub session_id: String,

    /// The task run this invocation belongs to.
    pub run_id: String,

    /// Directory tools should resolve relative paths against.
    pub working_dir: PathBuf,

    /// Cooperative cancellation signal; tools should poll at natural
    /// suspension points.
    pub cancel: watch::Receiver<bool>,

    /// Set when this invocation happens inside a subagent run; the
    /// `subagent` tool refuses to recurse when it sees this.
    pub inside_subagent: bool,

    /// Bounded progress channel; chunks surface as `tool_call_stream`
    /// events between start and completion.
    pub progress: Option<mpsc::Sender<String>>,
}

impl ToolContext {
    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Push a progress chunk.  Best-effort: a full or closed channel drops
    /// the chunk rather than blocking the tool.
    pub fn send_progress(&self, chunk: impl Into<String>) {
        if let Some(tx) = &self.progress {
            let _ = tx.try_send(chunk.into());
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// The success payload a tool returns from `invoke`.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Text shown to the LLM.
    pub content: String,

    /// Optional structured payload for programmatic consumers.
    pub data: Option<Value>,

    /// Attachments to merge into the session registry.
    pub attachments: Vec<Attachment>,

    /// Metadata propagated onto the `tool_call_complete` event.
    pub metadata: Map<String, Value>,
}

impl ToolOutput {
    /// Create an output with text content only.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

/// Envelope returned by every gateway invocation, success or failure.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Echoes the LLM's call id.
    pub call_id: String,

    /// Text shown to the LLM (empty on failure; see [`Self::llm_content`]).
    pub content: String,

    /// Optional structured payload.
    pub data: Option<Value>,

    /// `None` on success, otherwise a description of the failure.
    pub error: Option<String>,

    /// Wall-clock duration of the invocation (monotonic).
    pub duration: Duration,

    /// Attachments to merge into the session registry.
    pub attachments: Vec<Attachment>,

    /// Metadata propagated onto the `tool_call_complete` event.
    pub metadata: Map<String, Value>,
}

impl ToolResult {
    /// Build a success envelope from a tool's output.
    pub fn success(call_id: impl Into<String>, output: ToolOutput, duration: Duration) -> Self {
        Self {
            call_id: call_id.into(),
            content: output.content,
            data: output.data,
            error: None,
            duration,
            attachments: output.attachments,
            metadata: output.metadata,
        }
    }

    /// Build a failure envelope.
    pub fn failure(
        call_id: impl Into<String>,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            content: String::new(),
            data: None,
            error: Some(error.into()),
            duration,
            attachments: Vec::new(),
            metadata: Map::new(),
        }
    }

    /// Whether the invocation failed.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The text fed back to the LLM as the tool message.
    pub fn llm_content(&self) -> String {
        match &self.error {
            Some(err) => format!("Error: {err}"),
            None => self.content.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool trait
// ---------------------------------------------------------------------------

/// An externally callable capability described to the LLM.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// The tool's static metadata.
    fn descriptor(&self) -> ToolDescriptor;

    /// Execute with validated arguments.
    ///
    /// The gateway guarantees `args` satisfied the descriptor's parameter
    /// schema.  Errors are reported to the LLM, not propagated as engine
    /// failures.
    async fn invoke(&self, ctx: &ToolContext, args: Map<String, Value>) -> Result<ToolOutput>;
}
