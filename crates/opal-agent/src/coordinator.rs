//! Task coordinator.
//!
//! The coordinator owns session lifecycle and run orchestration: it resolves
//! (or creates) the session, serializes runs per session, resolves the
//! [`ModelProfile`] for the run, registers per-run listeners, and drives the
//! [`Engine`] to its terminal event.  It also implements
//! [`SubtaskExecutor`], which is how the `subagent` tool fans work out into
//! child runs without reaching into engine internals.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use opal_events::{AgentEvent, AgentLevel, EventBus, EventKind, EventListener, StopReason};
use opal_store::{Attachment, AttachmentKind, AttachmentOp, SessionRecord, SessionStore};

use crate::config::EngineConfig;
use crate::engine::{Engine, RunParams, TaskResult};
use crate::error::Result;
use crate::llm::LlmClient;
use crate::profile::ModelProfile;
use crate::tools::{SubtaskExecutor, SubtaskOutcome, ToolContext, ToolGateway, ToolRegistry};

/// A task submission: the instruction plus any uploaded attachments.
#[derive(Debug, Clone)]
pub struct TaskInput {
    /// The user task text.
    pub task: String,
    /// Attachments supplied with the task.
    pub attachments: Vec<Attachment>,
}

impl TaskInput {
    /// A bare task with no attachments.
    pub fn text(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            attachments: Vec::new(),
        }
    }
}

/// Orchestrates sessions and task runs over one engine.
pub struct Coordinator {
    store: SessionStore,
    bus: EventBus,
    engine: Engine,
    profile: ModelProfile,
    /// Per-session run locks: one active run per session at a time.
    run_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Coordinator {
    /// Wire a coordinator over its collaborators.
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: ToolRegistry,
        store: SessionStore,
        bus: EventBus,
        config: EngineConfig,
        profile: ModelProfile,
    ) -> Arc<Self> {
        let gateway = ToolGateway::new(registry, config.tool_timeout);
        let engine = Engine::new(llm, gateway, store.clone(), bus.clone(), config);
        Arc::new(Self {
            store,
            bus,
            engine,
            profile,
            run_locks: DashMap::new(),
        })
    }

    /// The event bus tasks publish to.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The session store.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Fetch a session, creating one when `id` is empty.
    pub async fn get_session(&self, id: &str) -> Result<SessionRecord> {
        if id.is_empty() {
            let working_dir = std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .to_string_lossy()
                .into_owned();
            let session = self.store.create(&working_dir).await?;
            info!(session_id = %session.id, "session created for task");
            return Ok(session);
        }
        Ok(self.store.get(id).await?)
    }

    /// Delete a session and drop its event-bus state.
    pub async fn delete_session(&self, id: &str) -> Result<()> {
        self.store.delete(id).await?;
        self.bus.clear_session(id);
        self.run_locks.remove(id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Task execution
    // -----------------------------------------------------------------------

    /// Run a task to completion and return the final result.
    pub async fn execute_task(&self, session_id: &str, input: TaskInput) -> Result<TaskResult> {
        let session = self.get_session(session_id).await?;

        // One active run per session; later submissions queue here.
        let lock = self
            .run_locks
            .entry(session.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        self.store.clear_cancel(&session.id);

        let run_id = Uuid::now_v7().to_string();
        let profile = self.resolve_profile(&session)?;

        let attachment_names: Vec<String> =
            input.attachments.iter().map(|a| a.name.clone()).collect();
        for attachment in input.attachments {
            let attachment = attachment.with_kind(AttachmentKind::Upload);
            self.store
                .append_attachment_op(&session.id, AttachmentOp::Add { attachment })
                .await?;
        }

        self.bus
            .publish(AgentEvent::new(
                &session.id,
                &run_id,
                EventKind::WorkflowInputReceived {
                    task: input.task.clone(),
                    attachment_names,
                },
            ))
            .await;

        let result = self
            .engine
            .run(RunParams {
                session_id: session.id.clone(),
                run_id: run_id.clone(),
                parent_run_id: None,
                agent_level: AgentLevel::Core,
                profile,
                working_dir: PathBuf::from(&session.working_dir),
                task: input.task,
            })
            .await?;

        self.publish_final_complete(&result).await?;
        Ok(result)
    }

    /// Run a task with a per-run listener attached for its duration.
    ///
    /// The listener observes every event of the run live and is
    /// deregistered before this returns.
    pub async fn execute_task_with_listener(
        &self,
        session_id: &str,
        input: TaskInput,
        listener: Arc<dyn EventListener>,
    ) -> Result<TaskResult> {
        let id = self.bus.register(listener);
        let result = self.execute_task(session_id, input).await;
        self.bus.unregister(id);
        result
    }

    /// Resolve the model profile for a run: the configured base profile,
    /// with a session-metadata `model` override when present.  Pure with
    /// respect to session state.
    fn resolve_profile(&self, session: &SessionRecord) -> Result<ModelProfile> {
        let mut profile = self.profile.clone();
        if let Ok(metadata) = serde_json::from_str::<serde_json::Value>(&session.metadata) {
            if let Some(model) = metadata["model"].as_str() {
                debug!(session_id = %session.id, model, "session model override");
                profile.model_id = model.to_owned();
            }
        }
        profile.validate()?;
        Ok(profile)
    }

    /// Re-deliver the terminal `task_complete` with `stream_finished` set
    /// and the session's folded attachment set, once streaming sinks have
    /// been fed.  Cancelled and failed runs keep their own terminal event.
    async fn publish_final_complete(&self, result: &TaskResult) -> Result<()> {
        if !matches!(
            result.stop_reason,
            StopReason::FinalAnswer | StopReason::MaxIterations | StopReason::ToolFailures
        ) {
            return Ok(());
        }

        let attachments = self.store.attachments(&result.session_id).await?;
        self.bus
            .publish(AgentEvent::new(
                &result.session_id,
                &result.run_id,
                EventKind::TaskComplete {
                    final_answer: result.final_answer.clone(),
                    total_iterations: result.iterations,
                    total_tokens: result.total_tokens,
                    stop_reason: result.stop_reason,
                    duration_ms: result.duration.as_millis() as u64,
                    attachment_names: attachments.keys().cloned().collect(),
                    stream_finished: true,
                },
            ))
            .await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Subtask execution
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl SubtaskExecutor for Coordinator {
    /// Run one subtask as a subagent-level task.
    ///
    /// Each subtask gets a child session so the parent's history stays
    /// clean; the parent's cancel signal is bridged into the child for the
    /// duration of the run.
    async fn execute_subtask(
        &self,
        parent: &ToolContext,
        subtask: &str,
        index: usize,
        total: usize,
    ) -> Result<SubtaskOutcome> {
        let child = self
            .store
            .create(&parent.working_dir.to_string_lossy())
            .await?;

        debug!(
            parent_run = %parent.run_id,
            child_session = %child.id,
            index,
            total,
            "subtask run starting"
        );

        let bridge = {
            let mut parent_cancel = parent.cancel.clone();
            let store = self.store.clone();
            let child_id = child.id.clone();
            tokio::spawn(async move {
                if parent_cancel.wait_for(|c| *c).await.is_ok() {
                    store.set_cancel(&child_id);
                }
            })
        };

        let result = self
            .engine
            .run(RunParams {
                session_id: child.id.clone(),
                run_id: Uuid::now_v7().to_string(),
                parent_run_id: Some(parent.run_id.clone()),
                agent_level: AgentLevel::Subagent,
                profile: self.profile.clone(),
                working_dir: parent.working_dir.clone(),
                task: subtask.to_owned(),
            })
            .await;
        bridge.abort();

        let result = result?;
        Ok(SubtaskOutcome {
            answer: result.final_answer,
            tokens: u64::from(result.total_tokens),
            tool_calls: 0,
            success: result.stop_reason == StopReason::FinalAnswer,
        })
    }
}
