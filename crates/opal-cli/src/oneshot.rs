//! Subcommand: `opal run "<task>"` — one-shot execution.
//!
//! Streams the run inline to the terminal and exits 0 when the task reaches
//! `task_complete`, non-zero on error or cancellation.

use std::sync::Arc;

use anyhow::Result;

use opal_agent::TaskInput;
use opal_events::StopReason;

use crate::helpers::{self, Runtime};
use crate::renderer::TerminalRenderer;

/// Execute one task and return the process exit code.
pub async fn cmd_run(task: String) -> Result<i32> {
    let runtime = helpers::build_runtime().await?;
    let Runtime {
        coordinator,
        store,
        bus,
    } = &runtime;

    bus.register(Arc::new(TerminalRenderer::new(
        store.clone(),
        helpers::verbose(),
    )));

    let session = coordinator.get_session("").await?;
    let session_id = session.id.clone();

    let run = {
        let coordinator = Arc::clone(coordinator);
        let session_id = session_id.clone();
        tokio::spawn(async move {
            coordinator
                .execute_task(&session_id, TaskInput::text(task))
                .await
        })
    };
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        signal = tokio::signal::ctrl_c() => {
            if signal.is_ok() {
                store.set_cancel(&session_id);
            }
            (&mut run).await
        }
    };

    let task_result = result??;
    Ok(match task_result.stop_reason {
        StopReason::FinalAnswer | StopReason::MaxIterations | StopReason::ToolFailures => 0,
        StopReason::Cancelled | StopReason::LlmError => 1,
    })
}
