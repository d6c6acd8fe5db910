//! Subtask delegation tool.
//!
//! Exposes a `subagent` tool that lets the LLM fan a task out into
//! independent subtasks.  Each subtask becomes a full engine run at
//! subagent level (own run id, `parent_run_id` pointing back at the
//! delegating run); the coordinator implements [`SubtaskExecutor`] and owns
//! that wiring.  Nesting is refused: a subagent run invoking `subagent`
//! again gets an error result, not another layer of fan-out.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::info;

use opal_events::SubagentTracker;

use super::{Tool, ToolContext, ToolDescriptor, ToolOutput};
use crate::error::{AgentError, Result};

/// Outcome of one delegated subtask run.
#[derive(Debug, Clone)]
pub struct SubtaskOutcome {
    /// The subtask's final answer (or error description on failure).
    pub answer: String,
    /// Tokens the subtask consumed.
    pub tokens: u64,
    /// Tool calls the subtask made.
    pub tool_calls: u32,
    /// Whether the subtask reached a final answer.
    pub success: bool,
}

/// Executes one subtask on behalf of the subagent tool.
///
/// Implemented by the coordinator; the indirection keeps the tool free of a
/// back-pointer into engine internals.
#[async_trait::async_trait]
pub trait SubtaskExecutor: Send + Sync {
    /// Run `subtask` as a subagent-level task under the caller's session.
    async fn execute_subtask(
        &self,
        parent: &ToolContext,
        subtask: &str,
        index: usize,
        total: usize,
    ) -> Result<SubtaskOutcome>;
}

/// The `subagent` tool.
pub struct SubagentTool {
    executor: Arc<dyn SubtaskExecutor>,
    tracker: Option<Arc<SubagentTracker>>,
}

impl SubagentTool {
    /// Create the tool over a subtask executor.
    pub fn new(executor: Arc<dyn SubtaskExecutor>) -> Self {
        Self {
            executor,
            tracker: None,
        }
    }

    /// Builder: declare fan-out width to `tracker` so derived
    /// `subagent_complete` events fire.
    pub fn with_tracker(mut self, tracker: Arc<SubagentTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }
}

#[async_trait::async_trait]
impl Tool for SubagentTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "subagent",
            "Delegate independent subtasks to parallel worker agents. \
             Each subtask is a self-contained instruction; results are \
             returned in order. Use for work that decomposes cleanly.",
        )
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "subtasks": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 1,
                    "description": "Self-contained subtask instructions."
                }
            },
            "required": ["subtasks"],
        }))
    }

    async fn invoke(&self, ctx: &ToolContext, args: Map<String, Value>) -> Result<ToolOutput> {
        if ctx.inside_subagent {
            return Err(AgentError::RecursiveSubagent);
        }

        let subtasks: Vec<String> = args
            .get("subtasks")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        if subtasks.is_empty() {
            return Err(AgentError::ToolExecutionFailed {
                tool_name: "subagent".into(),
                reason: "subtasks must be a non-empty array of strings".into(),
            });
        }

        let total = subtasks.len();
        if let Some(tracker) = &self.tracker {
            tracker.declare_total(&ctx.run_id, &ctx.session_id, total as u32);
        }

        info!(
            session_id = %ctx.session_id,
            run_id = %ctx.run_id,
            total,
            "dispatching subtasks"
        );

        let mut sections = Vec::with_capacity(total);
        let mut tokens: u64 = 0;
        let mut tool_calls: u32 = 0;
        let mut succeeded: u32 = 0;

        for (index, subtask) in subtasks.iter().enumerate() {
            if ctx.is_cancelled() {
                sections.push(format!(
                    "{}. (skipped, cancelled before start)",
                    index + 1
                ));
                continue;
            }

            ctx.send_progress(format!("subtask {}/{total}: {subtask}", index + 1));

            match self
                .executor
                .execute_subtask(ctx, subtask, index, total)
                .await
            {
                Ok(outcome) => {
                    tokens += outcome.tokens;
                    tool_calls += outcome.tool_calls;
                    if outcome.success {
                        succeeded += 1;
                    }
                    sections.push(format!("{}. {}", index + 1, outcome.answer));
                }
                Err(e) => {
                    sections.push(format!("{}. Error: {e}", index + 1));
                }
            }
        }

        let mut metadata = Map::new();
        metadata.insert("subtask_total".into(), json!(total));
        metadata.insert("subtask_success".into(), json!(succeeded));
        metadata.insert("tokens".into(), json!(tokens));
        metadata.insert("tool_calls".into(), json!(tool_calls));

        Ok(ToolOutput {
            content: sections.join("\n"),
            data: None,
            attachments: Vec::new(),
            metadata,
        })
    }
}
