//! ReAct execution engine.
//!
//! Drives one task over a session: think (LLM turn) → act (tool dispatch) →
//! observe (append results), repeating until the model produces a final
//! answer or a stop condition fires.  One engine run is single-threaded per
//! session; every state boundary checks the session cancel signal, emits
//! lifecycle events on the bus, and appends to the store before moving on —
//! no lock is ever held across a suspension point.
//!
//! Stop conditions, in precedence order: cancellation, LLM failure (after
//! retry), consecutive tool failures, final answer, iteration bound.  Every
//! run ends with exactly one terminal event.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use opal_events::{AgentEvent, AgentLevel, ErrorPhase, EventBus, EventKind, StopReason};
use opal_store::{AttachmentOp, SessionStore};

use crate::compaction::{Compressor, TranscriptCompressor, compress_window, needs_compression};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::history;
use crate::llm::{ChatRequest, LlmClient, Message, StreamAccumulator, ToolCall, Usage};
use crate::profile::ModelProfile;
use crate::tools::{ToolContext, ToolGateway, ToolResult};

/// Characters of argument JSON shown in `tool_call_start` previews.
const ARGUMENTS_PREVIEW_CHARS: usize = 120;

/// Capacity of each tool's progress channel.
const PROGRESS_CAPACITY: usize = 32;

// ---------------------------------------------------------------------------
// Run parameters and results
// ---------------------------------------------------------------------------

/// Everything the engine needs to execute one task.
#[derive(Debug, Clone)]
pub struct RunParams {
    /// The session the task runs in.
    pub session_id: String,
    /// Unique id for this run.
    pub run_id: String,
    /// The delegating run, when this is a subtask.
    pub parent_run_id: Option<String>,
    /// Core task or delegated subtask.
    pub agent_level: AgentLevel,
    /// Resolved LLM binding for the run.
    pub profile: ModelProfile,
    /// Working directory tools resolve paths against.
    pub working_dir: PathBuf,
    /// The user task text.
    pub task: String,
}

/// The outcome of one engine run.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub run_id: String,
    pub session_id: String,
    pub final_answer: String,
    pub stop_reason: StopReason,
    pub iterations: u32,
    pub total_tokens: u32,
    pub duration: Duration,
}

/// One LLM turn's outcome.
enum LlmTurn {
    Completed(Message, Usage),
    Cancelled,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The ReAct engine: one instance drives one task at a time per session.
#[derive(Clone)]
pub struct Engine {
    llm: Arc<dyn LlmClient>,
    gateway: ToolGateway,
    store: SessionStore,
    bus: EventBus,
    config: EngineConfig,
    compressor: Arc<dyn Compressor>,
}

impl Engine {
    /// Create an engine over its collaborators.
    pub fn new(
        llm: Arc<dyn LlmClient>,
        gateway: ToolGateway,
        store: SessionStore,
        bus: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            llm,
            gateway,
            store,
            bus,
            config,
            compressor: Arc::new(TranscriptCompressor::default()),
        }
    }

    /// Builder: replace the compression hook.
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = compressor;
        self
    }

    /// Execute one task to its terminal event.
    ///
    /// # Errors
    ///
    /// Only fatal conditions (store failures, violated log invariants)
    /// surface as `Err`; LLM failures, tool failures, and cancellation all
    /// resolve to an `Ok` result carrying the appropriate stop reason.
    pub async fn run(&self, params: RunParams) -> Result<TaskResult> {
        let started = Instant::now();
        let cancel = self.store.cancel_signal(&params.session_id);

        info!(
            session_id = %params.session_id,
            run_id = %params.run_id,
            level = ?params.agent_level,
            "starting task run"
        );

        self.store
            .append_message(
                &params.session_id,
                history::to_record(&Message::user(&params.task))?,
            )
            .await?;

        let mut total_usage = Usage::default();
        let mut consecutive_failures: u32 = 0;
        let mut last_answer = String::new();

        for iter in 1..=self.config.max_iterations {
            if *cancel.borrow() {
                return Ok(self.finish_cancelled(&params, started, iter - 1, total_usage).await);
            }

            self.emit(
                &params,
                EventKind::IterationStart {
                    iter,
                    total: self.config.max_iterations,
                },
            )
            .await;

            // Assemble the request window from the durable log.
            let records = self.store.messages(&params.session_id).await?;
            let log = history::from_records(&records)?;
            if let Err(e) = history::verify_log(&log) {
                self.emit(
                    &params,
                    EventKind::Error {
                        error: e.to_string(),
                        phase: ErrorPhase::Engine,
                    },
                )
                .await;
                return Err(e);
            }

            let mut window =
                history::assemble_window(&self.config.system_prompt, &log, self.config.max_history);
            if needs_compression(&window[1..], self.config.compression_token_budget) {
                let compressed = compress_window(
                    &window[1..],
                    self.config.compression_keep_recent,
                    self.compressor.as_ref(),
                );
                window.truncate(1);
                window.extend(compressed);
            }

            self.emit(&params, EventKind::Thinking { iter }).await;

            let request = ChatRequest {
                profile: params.profile.clone(),
                messages: window,
                tools: self.gateway.registry().list(),
            };

            let (assistant, usage) = match self.call_llm(&request, cancel.clone()).await {
                Ok(LlmTurn::Completed(message, usage)) => (message, usage),
                Ok(LlmTurn::Cancelled) => {
                    return Ok(self.finish_cancelled(&params, started, iter - 1, total_usage).await);
                }
                Err(e) => {
                    warn!(error = %e, "llm turn failed after retry");
                    self.emit(
                        &params,
                        EventKind::Error {
                            error: e.to_string(),
                            phase: ErrorPhase::Llm,
                        },
                    )
                    .await;
                    return Ok(TaskResult {
                        run_id: params.run_id.clone(),
                        session_id: params.session_id.clone(),
                        final_answer: last_answer,
                        stop_reason: StopReason::LlmError,
                        iterations: iter - 1,
                        total_tokens: total_usage.total_tokens,
                        duration: started.elapsed(),
                    });
                }
            };
            total_usage.add(usage);

            self.store
                .append_message(&params.session_id, history::to_record(&assistant)?)
                .await?;
            self.emit(
                &params,
                EventKind::ThinkComplete {
                    content: assistant.content.clone(),
                    iter,
                    tool_calls_count: assistant.tool_calls.len() as u32,
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                },
            )
            .await;

            // Final answer: no tool calls.
            if assistant.tool_calls.is_empty() {
                self.emit(
                    &params,
                    EventKind::IterationComplete {
                        iter,
                        tokens_used: usage.total_tokens,
                        tools_run: 0,
                    },
                )
                .await;
                return Ok(self
                    .finish_complete(
                        &params,
                        started,
                        assistant.content,
                        StopReason::FinalAnswer,
                        iter,
                        total_usage,
                    )
                    .await);
            }
            if !assistant.content.is_empty() {
                last_answer = assistant.content.clone();
            }

            // Act: dispatch the batch, append results in LLM order.
            let results = self
                .dispatch_tools(&params, &assistant.tool_calls, &cancel)
                .await;
            let tools_run = results.len() as u32;

            for result in &results {
                self.store
                    .append_message(
                        &params.session_id,
                        history::to_record(&Message::tool_result(
                            &result.call_id,
                            result.llm_content(),
                        ))?,
                    )
                    .await?;
                for attachment in &result.attachments {
                    self.store
                        .append_attachment_op(
                            &params.session_id,
                            AttachmentOp::Add {
                                attachment: attachment.clone(),
                            },
                        )
                        .await?;
                }
                if result.is_error() {
                    consecutive_failures += 1;
                } else {
                    consecutive_failures = 0;
                }
            }

            if *cancel.borrow() {
                return Ok(self.finish_cancelled(&params, started, iter, total_usage).await);
            }
            if consecutive_failures >= self.config.max_consecutive_failures {
                warn!(
                    failures = consecutive_failures,
                    "consecutive tool failures reached threshold; stopping early"
                );
                self.emit(
                    &params,
                    EventKind::IterationComplete {
                        iter,
                        tokens_used: usage.total_tokens,
                        tools_run,
                    },
                )
                .await;
                return Ok(self
                    .finish_complete(
                        &params,
                        started,
                        best_effort_answer(&last_answer),
                        StopReason::ToolFailures,
                        iter,
                        total_usage,
                    )
                    .await);
            }

            self.emit(
                &params,
                EventKind::IterationComplete {
                    iter,
                    tokens_used: usage.total_tokens,
                    tools_run,
                },
            )
            .await;
        }

        // Iteration bound reached without a final answer.
        let iterations = self.config.max_iterations;
        Ok(self
            .finish_complete(
                &params,
                started,
                best_effort_answer(&last_answer),
                StopReason::MaxIterations,
                iterations,
                total_usage,
            )
            .await)
    }

    // -----------------------------------------------------------------------
    // LLM turn
    // -----------------------------------------------------------------------

    /// Call the LLM (streaming preferred), racing the cancel signal.
    ///
    /// On cancellation the in-flight stream is handed to a detached drain
    /// task and its partial output discarded.
    async fn call_llm(
        &self,
        request: &ChatRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<LlmTurn> {
        let mut cancel_rx = cancel;
        let cancelled = async move {
            if cancel_rx.wait_for(|c| *c).await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        tokio::pin!(cancelled);

        if self.config.prefer_streaming {
            let mut stream = self.llm.chat_stream(request).await?;
            let mut acc = StreamAccumulator::new();
            let mut was_cancelled = false;
            loop {
                tokio::select! {
                    delta = stream.next() => match delta {
                        Some(Ok(delta)) => acc.push(delta),
                        Some(Err(e)) => return Err(e),
                        None => break,
                    },
                    () = &mut cancelled => {
                        was_cancelled = true;
                        break;
                    }
                }
            }
            if was_cancelled {
                // Drain the in-flight stream off to the side; the partial
                // accumulation is discarded.
                tokio::spawn(async move {
                    while stream.next().await.is_some() {}
                });
                return Ok(LlmTurn::Cancelled);
            }
            let (message, usage) = acc.finish();
            Ok(LlmTurn::Completed(message, usage))
        } else {
            tokio::select! {
                response = self.llm.chat(request) => {
                    let response = response?;
                    Ok(LlmTurn::Completed(response.message, response.usage))
                }
                () = &mut cancelled => Ok(LlmTurn::Cancelled),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Tool dispatch
    // -----------------------------------------------------------------------

    /// Execute a batch of tool calls from one assistant turn.
    ///
    /// Calls run concurrently only when every tool in the batch is marked
    /// parallel-safe and the batch fits under `max_parallel_tools`;
    /// otherwise they run serially in the order the LLM emitted them.
    /// Results always come back in LLM order, regardless of completion
    /// order, so session appends are deterministic.
    async fn dispatch_tools(
        &self,
        params: &RunParams,
        calls: &[ToolCall],
        cancel: &watch::Receiver<bool>,
    ) -> Vec<ToolResult> {
        let parallel = calls.len() > 1
            && calls.len() <= self.config.max_parallel_tools
            && calls.iter().all(|c| {
                self.gateway
                    .registry()
                    .get(&c.name)
                    .map(|r| r.descriptor.parallel_safe)
                    .unwrap_or(false)
            });

        if parallel {
            debug!(count = calls.len(), "dispatching tool batch in parallel");
            let handles: Vec<_> = calls
                .iter()
                .map(|call| tokio::spawn(self.tool_call_future(params, call.clone(), cancel.clone())))
                .collect();

            let mut results = Vec::with_capacity(handles.len());
            for (handle, call) in handles.into_iter().zip(calls) {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => ToolResult::failure(
                        &call.id,
                        format!("tool worker failed: {e}"),
                        Duration::ZERO,
                    ),
                };
                results.push(result);
            }
            results
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                if *cancel.borrow() {
                    break;
                }
                results.push(
                    self.tool_call_future(params, call.clone(), cancel.clone())
                        .await,
                );
            }
            results
        }
    }

    /// Build the self-contained future for one tool call: start event,
    /// live progress forwarding, gateway invocation, completion event.
    fn tool_call_future(
        &self,
        params: &RunParams,
        call: ToolCall,
        cancel: watch::Receiver<bool>,
    ) -> BoxFuture<'static, ToolResult> {
        let gateway = self.gateway.clone();
        let bus = self.bus.clone();
        let meta = EventMeta::from_params(params);
        let working_dir = params.working_dir.clone();
        let inside_subagent = params.agent_level == AgentLevel::Subagent;

        async move {
            bus.publish(meta.event(EventKind::ToolCallStart {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments_preview: preview(&call.arguments, ARGUMENTS_PREVIEW_CHARS),
            }))
            .await;

            let (tx, mut rx) = mpsc::channel::<String>(PROGRESS_CAPACITY);
            let ctx = ToolContext {
                session_id: meta.session_id.clone(),
                run_id: meta.run_id.clone(),
                working_dir,
                cancel,
                inside_subagent,
                progress: Some(tx),
            };

            let result = {
                let invoke = gateway.invoke(&ctx, &call);
                tokio::pin!(invoke);
                loop {
                    tokio::select! {
                        result = &mut invoke => break result,
                        chunk = rx.recv() => {
                            if let Some(chunk) = chunk {
                                bus.publish(meta.event(EventKind::ToolCallStream {
                                    call_id: call.id.clone(),
                                    chunk,
                                }))
                                .await;
                            }
                        }
                    }
                }
            };

            // Close our progress sender and flush whatever the tool pushed
            // before finishing, so stream events precede the completion.
            drop(ctx);
            while let Some(chunk) = rx.recv().await {
                bus.publish(meta.event(EventKind::ToolCallStream {
                    call_id: call.id.clone(),
                    chunk,
                }))
                .await;
            }

            bus.publish(meta.event(EventKind::ToolCallComplete {
                call_id: result.call_id.clone(),
                tool_name: call.name.clone(),
                result: (!result.is_error()).then(|| result.content.clone()),
                error: result.error.clone(),
                duration_ms: result.duration.as_millis() as u64,
                attachment_names: result.attachments.iter().map(|a| a.name.clone()).collect(),
                metadata: result.metadata.clone(),
            }))
            .await;

            result
        }
        .boxed()
    }

    // -----------------------------------------------------------------------
    // Terminal states
    // -----------------------------------------------------------------------

    async fn finish_complete(
        &self,
        params: &RunParams,
        started: Instant,
        final_answer: String,
        stop_reason: StopReason,
        iterations: u32,
        usage: Usage,
    ) -> TaskResult {
        let duration = started.elapsed();
        info!(
            run_id = %params.run_id,
            iterations,
            stop_reason = %stop_reason,
            "task complete"
        );
        self.emit(
            params,
            EventKind::TaskComplete {
                final_answer: final_answer.clone(),
                total_iterations: iterations,
                total_tokens: usage.total_tokens,
                stop_reason,
                duration_ms: duration.as_millis() as u64,
                attachment_names: Vec::new(),
                stream_finished: false,
            },
        )
        .await;

        TaskResult {
            run_id: params.run_id.clone(),
            session_id: params.session_id.clone(),
            final_answer,
            stop_reason,
            iterations,
            total_tokens: usage.total_tokens,
            duration,
        }
    }

    async fn finish_cancelled(
        &self,
        params: &RunParams,
        started: Instant,
        iterations: u32,
        usage: Usage,
    ) -> TaskResult {
        info!(run_id = %params.run_id, "task cancelled");
        self.emit(
            params,
            EventKind::TaskCancelled {
                requested_by: "user".into(),
                reason: "session cancel signal set".into(),
            },
        )
        .await;

        TaskResult {
            run_id: params.run_id.clone(),
            session_id: params.session_id.clone(),
            final_answer: String::new(),
            stop_reason: StopReason::Cancelled,
            iterations,
            total_tokens: usage.total_tokens,
            duration: started.elapsed(),
        }
    }

    async fn emit(&self, params: &RunParams, kind: EventKind) {
        self.bus
            .publish(EventMeta::from_params(params).event(kind))
            .await;
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Event envelope fields shared by every event of one run.
#[derive(Clone)]
struct EventMeta {
    session_id: String,
    run_id: String,
    parent_run_id: Option<String>,
    agent_level: AgentLevel,
}

impl EventMeta {
    fn from_params(params: &RunParams) -> Self {
        Self {
            session_id: params.session_id.clone(),
            run_id: params.run_id.clone(),
            parent_run_id: params.parent_run_id.clone(),
            agent_level: params.agent_level,
        }
    }

    fn event(&self, kind: EventKind) -> AgentEvent {
        let mut event = AgentEvent::new(&self.session_id, &self.run_id, kind);
        event.parent_run_id = self.parent_run_id.clone();
        event.agent_level = self.agent_level;
        event
    }
}

fn preview(arguments: &str, max: usize) -> String {
    if arguments.len() <= max {
        return arguments.to_owned();
    }
    let mut cut = max;
    while !arguments.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &arguments[..cut])
}

fn best_effort_answer(last_answer: &str) -> String {
    if last_answer.is_empty() {
        "(no final answer produced)".to_owned()
    } else {
        last_answer.to_owned()
    }
}
