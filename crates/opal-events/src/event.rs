//! Typed lifecycle events.
//!
//! Every observable point in a task's life is described by an [`AgentEvent`]:
//! a common envelope (session, run, level, timestamp) wrapping one
//! [`EventKind`] variant.  Events serialize with a snake_case `event_type`
//! tag so that SSE clients and persisted logs share one wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Envelope fields
// ---------------------------------------------------------------------------

/// Whether an event was produced by a top-level task or a delegated subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentLevel {
    /// The primary task run for a session.
    Core,
    /// A subtask executed on behalf of a parent run.
    Subagent,
}

/// Why a task terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model produced a final text answer.
    FinalAnswer,
    /// The iteration bound was reached without a final answer.
    MaxIterations,
    /// Too many consecutive tool failures.
    ToolFailures,
    /// The run was cancelled externally.
    Cancelled,
    /// The LLM failed persistently (after retry).
    LlmError,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::FinalAnswer => "final_answer",
            Self::MaxIterations => "max_iterations",
            Self::ToolFailures => "tool_failures",
            Self::Cancelled => "cancelled",
            Self::LlmError => "llm_error",
        };
        write!(f, "{s}")
    }
}

/// The phase in which an [`EventKind::Error`] occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPhase {
    /// An LLM request or stream failed.
    Llm,
    /// A tool invocation failed at the gateway level.
    Tool,
    /// An engine invariant was violated; the session is unhealthy.
    Engine,
    /// A listener failed while consuming an event.
    Listener,
}

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

/// The payload of an [`AgentEvent`], one variant per lifecycle point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventKind {
    /// The coordinator accepted a task for execution.
    WorkflowInputReceived {
        /// The user task text.
        task: String,
        /// Names of attachments supplied with the task.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachment_names: Vec<String>,
    },

    /// An engine iteration is starting.
    IterationStart {
        /// 1-based iteration number.
        iter: u32,
        /// The configured iteration bound.
        total: u32,
    },

    /// The engine is waiting on the LLM.
    Thinking {
        /// The iteration this think belongs to.
        iter: u32,
    },

    /// The LLM turn finished and the assistant message was assembled.
    ThinkComplete {
        /// Assistant text content (may be empty when only tool calls).
        content: String,
        /// The iteration this think belongs to.
        iter: u32,
        /// Number of tool calls the assistant requested.
        tool_calls_count: u32,
        /// Prompt tokens billed for this turn (0 when unknown).
        input_tokens: u32,
        /// Completion tokens billed for this turn (0 when unknown).
        output_tokens: u32,
    },

    /// An engine iteration finished (tool results appended).
    IterationComplete {
        /// 1-based iteration number.
        iter: u32,
        /// Tokens consumed by this iteration.
        tokens_used: u32,
        /// Number of tools that ran this iteration.
        tools_run: u32,
    },

    /// A tool invocation is starting.
    ToolCallStart {
        /// The LLM-assigned call id.
        call_id: String,
        /// The tool being invoked.
        tool_name: String,
        /// Truncated preview of the argument JSON.
        arguments_preview: String,
    },

    /// Incremental progress from a streaming tool.
    ToolCallStream {
        /// The call this chunk belongs to.
        call_id: String,
        /// The progress chunk.
        chunk: String,
    },

    /// A tool invocation finished.
    ToolCallComplete {
        /// The LLM-assigned call id.
        call_id: String,
        /// The tool that was invoked.
        tool_name: String,
        /// Result content when the tool succeeded.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        /// Error description when the tool failed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Wall-clock duration of the invocation in milliseconds.
        duration_ms: u64,
        /// Names of attachments the tool produced.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachment_names: Vec<String>,
        /// Tool-specific metadata (e.g. subtask counters).
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        metadata: Map<String, Value>,
    },

    /// The task reached a successful terminal state.
    TaskComplete {
        /// The final answer shown to the user.
        final_answer: String,
        /// How many iterations ran.
        total_iterations: u32,
        /// Total tokens consumed by the run.
        total_tokens: u32,
        /// Why the task stopped.
        stop_reason: StopReason,
        /// Total run duration in milliseconds.
        duration_ms: u64,
        /// Names of attachments accumulated over the run.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachment_names: Vec<String>,
        /// Set on the second terminal delivery once streaming sinks have
        /// drained.  The dedup pipeline admits this duplicate.
        #[serde(default)]
        stream_finished: bool,
    },

    /// The task was cancelled before reaching completion.
    TaskCancelled {
        /// Who requested cancellation (e.g. "user").
        requested_by: String,
        /// Human-readable reason.
        reason: String,
    },

    /// The task failed; no further iterations will run.
    Error {
        /// Error description.
        error: String,
        /// Where the failure originated.
        phase: ErrorPhase,
    },

    /// Derived: a subtask of `parent_run_id` completed.
    SubagentProgress {
        /// The run that spawned the subtasks.
        parent_run_id: String,
        /// Subtasks completed so far.
        completed: u32,
        /// Total subtasks (0 while unknown).
        total: u32,
        /// Tokens consumed by completed subtasks.
        tokens: u64,
        /// Tool calls made by completed subtasks.
        tool_calls: u32,
    },

    /// Derived: all subtasks of `parent_run_id` completed.
    SubagentComplete {
        /// The run that spawned the subtasks.
        parent_run_id: String,
        /// Total subtasks.
        total: u32,
        /// Subtasks that succeeded.
        success: u32,
        /// Subtasks that failed.
        failed: u32,
        /// Tokens consumed across all subtasks.
        tokens: u64,
        /// Tool calls made across all subtasks.
        tool_calls: u32,
    },
}

impl EventKind {
    /// The snake_case tag used on the wire (`event:` field of SSE frames).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::WorkflowInputReceived { .. } => "workflow_input_received",
            Self::IterationStart { .. } => "iteration_start",
            Self::Thinking { .. } => "thinking",
            Self::ThinkComplete { .. } => "think_complete",
            Self::IterationComplete { .. } => "iteration_complete",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCallStream { .. } => "tool_call_stream",
            Self::ToolCallComplete { .. } => "tool_call_complete",
            Self::TaskComplete { .. } => "task_complete",
            Self::TaskCancelled { .. } => "task_cancelled",
            Self::Error { .. } => "error",
            Self::SubagentProgress { .. } => "subagent_progress",
            Self::SubagentComplete { .. } => "subagent_complete",
        }
    }

    /// The tool call id this event refers to, when any.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::ToolCallStart { call_id, .. }
            | Self::ToolCallStream { call_id, .. }
            | Self::ToolCallComplete { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    /// Whether this kind ends a task (exactly one terminal event per run).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::TaskComplete { .. } | Self::TaskCancelled { .. } | Self::Error { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A lifecycle event: envelope plus payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    /// The session this event belongs to.
    pub session_id: String,

    /// The task run this event belongs to.
    pub run_id: String,

    /// The parent run when this event was produced by a subtask.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,

    /// Core task or delegated subtask.
    pub agent_level: AgentLevel,

    /// When the event was emitted (RFC 3339 on the wire).
    pub timestamp: DateTime<Utc>,

    /// The variant payload.
    #[serde(flatten)]
    pub kind: EventKind,
}

impl AgentEvent {
    /// Create a core-level event stamped with the current time.
    pub fn new(
        session_id: impl Into<String>,
        run_id: impl Into<String>,
        kind: EventKind,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            run_id: run_id.into(),
            parent_run_id: None,
            agent_level: AgentLevel::Core,
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Builder: mark this event as produced by a subtask of `parent`.
    pub fn from_subagent(mut self, parent: impl Into<String>) -> Self {
        self.parent_run_id = Some(parent.into());
        self.agent_level = AgentLevel::Subagent;
        self
    }

    /// The wire tag of the payload.
    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }
}

// ---------------------------------------------------------------------------
// Listener contract
// ---------------------------------------------------------------------------

/// A consumer of agent events.
///
/// Listeners are invoked exactly once per published event, in registration
/// order, serialized per session.  Handlers must not block for long; slow
/// consumers should push into their own queues and drain asynchronously.
#[async_trait::async_trait]
pub trait EventListener: Send + Sync {
    /// Diagnostic name, shown in logs when a listener misbehaves.
    fn name(&self) -> &str;

    /// Handle one event.  Panics are recovered by the bus.
    async fn on_event(&self, event: &AgentEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_tags_are_snake_case() {
        let kind = EventKind::IterationStart { iter: 1, total: 50 };
        assert_eq!(kind.event_type(), "iteration_start");

        let json = serde_json::to_value(AgentEvent::new("s1", "r1", kind)).unwrap();
        assert_eq!(json["event_type"], "iteration_start");
        assert_eq!(json["session_id"], "s1");
        assert_eq!(json["run_id"], "r1");
        // Envelope timestamp serializes as an RFC 3339 string.
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn terminal_classification() {
        assert!(
            EventKind::TaskCancelled {
                requested_by: "user".into(),
                reason: "ctrl-c".into(),
            }
            .is_terminal()
        );
        assert!(!EventKind::Thinking { iter: 3 }.is_terminal());
    }

    #[test]
    fn subagent_builder_sets_level_and_parent() {
        let ev = AgentEvent::new("s1", "r2", EventKind::Thinking { iter: 1 })
            .from_subagent("r1");
        assert_eq!(ev.agent_level, AgentLevel::Subagent);
        assert_eq!(ev.parent_run_id.as_deref(), Some("r1"));
    }

    #[test]
    fn stop_reason_round_trips() {
        let json = serde_json::to_string(&StopReason::ToolFailures).unwrap();
        assert_eq!(json, "\"tool_failures\"");
        let back: StopReason = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StopReason::ToolFailures);
    }
}
