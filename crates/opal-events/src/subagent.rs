//! Subagent progress derivation.
//!
//! The engine emits ordinary lifecycle events for delegated subtasks;
//! nothing in the core loop aggregates them.  [`SubagentTracker`] is a bus
//! listener that counts subagent-level completions against their parent
//! run and synthesizes [`EventKind::SubagentProgress`] after each one,
//! plus a single [`EventKind::SubagentComplete`] when the last subtask
//! finishes.
//!
//! The subagent machinery declares the fan-out width (and the parent's
//! session) via [`SubagentTracker::declare_total`] before dispatching.
//! Completions then arrive as `task_complete` events at
//! [`AgentLevel::Subagent`] with `parent_run_id` pointing at the
//! delegating run; ordinary tool completions inside a subtask run bump the
//! parent's `tool_calls` tally without emitting progress.

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::bus::EventBus;
use crate::event::{AgentEvent, AgentLevel, EventKind, EventListener, StopReason};

/// Per-parent aggregation state.
#[derive(Debug, Default)]
struct ParentCounters {
    session_id: String,
    completed: u32,
    declared_total: Option<u32>,
    tokens: u64,
    tool_calls: u32,
    success: u32,
    failed: u32,
    done: bool,
}

impl ParentCounters {
    fn total(&self) -> u32 {
        self.declared_total.unwrap_or(0)
    }
}

/// Listener that derives subagent progress events.
///
/// Derived events are queued and republished from a background task; the
/// listener itself runs under the bus's per-session delivery lock and must
/// not publish inline.
pub struct SubagentTracker {
    counters: DashMap<String, ParentCounters>,
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl SubagentTracker {
    /// Create a tracker that republishes derived events onto `bus`.
    pub fn new(bus: EventBus) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AgentEvent>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                bus.publish(event).await;
            }
        });
        Self {
            counters: DashMap::new(),
            tx,
        }
    }

    /// Declare the expected subtask count for a parent run.
    ///
    /// The subagent machinery knows the fan-out width (and the parent's
    /// session) before any subtask completes; declaring them up front is
    /// what lets `subagent_complete` fire, and pins derived events to the
    /// parent's session when subtasks run in child sessions.
    pub fn declare_total(&self, parent_run_id: &str, session_id: &str, total: u32) {
        let mut entry = self
            .counters
            .entry(parent_run_id.to_owned())
            .or_default();
        entry.session_id = session_id.to_owned();
        entry.declared_total = Some(total);
    }

    fn record_completion(
        &self,
        parent_run_id: &str,
        session_id: &str,
        tokens: u64,
        success: bool,
    ) {
        let mut entry = self
            .counters
            .entry(parent_run_id.to_owned())
            .or_default();

        if entry.done {
            return;
        }
        if entry.session_id.is_empty() {
            entry.session_id = session_id.to_owned();
        }
        entry.completed += 1;
        entry.tokens += tokens;
        if success {
            entry.success += 1;
        } else {
            entry.failed += 1;
        }

        let total = entry.total();
        let derived_session = entry.session_id.clone();
        let progress = AgentEvent::new(
            derived_session.clone(),
            parent_run_id,
            EventKind::SubagentProgress {
                parent_run_id: parent_run_id.to_owned(),
                completed: entry.completed,
                total,
                tokens: entry.tokens,
                tool_calls: entry.tool_calls,
            },
        );
        let _ = self.tx.send(progress);

        if total > 0 && entry.completed >= total {
            entry.done = true;
            let complete = AgentEvent::new(
                derived_session,
                parent_run_id,
                EventKind::SubagentComplete {
                    parent_run_id: parent_run_id.to_owned(),
                    total,
                    success: entry.success,
                    failed: entry.failed,
                    tokens: entry.tokens,
                    tool_calls: entry.tool_calls,
                },
            );
            drop(entry);
            self.counters.remove(parent_run_id);
            let _ = self.tx.send(complete);
        }
    }
}

#[async_trait::async_trait]
impl EventListener for SubagentTracker {
    fn name(&self) -> &str {
        "subagent-tracker"
    }

    async fn on_event(&self, event: &AgentEvent) {
        if event.agent_level != AgentLevel::Subagent {
            return;
        }

        match &event.kind {
            // A tool ran inside a subtask: tally it for the parent.
            EventKind::ToolCallComplete { .. } => {
                if let Some(parent) = &event.parent_run_id {
                    if let Some(mut entry) = self.counters.get_mut(parent) {
                        if !entry.done {
                            entry.tool_calls += 1;
                        }
                    }
                }
            }

            // A subtask run finished.
            EventKind::TaskComplete {
                total_tokens,
                stop_reason,
                ..
            } => {
                let Some(parent) = event.parent_run_id.clone() else {
                    return;
                };
                self.record_completion(
                    &parent,
                    &event.session_id,
                    u64::from(*total_tokens),
                    *stop_reason == StopReason::FinalAnswer,
                );
            }

            _ => {}
        }
    }
}
