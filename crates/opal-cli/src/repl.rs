//! Subcommand: `opal chat` — interactive REPL.
//!
//! Reads tasks from stdin and runs each through the coordinator.  Ctrl-C
//! during a task cancels that task (the session survives); Ctrl-C at the
//! prompt, or `exit`, leaves the REPL.

use std::io::{self, Write as _};
use std::sync::Arc;

use anyhow::{Context, Result};

use opal_agent::TaskInput;
use opal_events::StopReason;

use crate::helpers::{self, Runtime};
use crate::renderer::TerminalRenderer;

/// Run the interactive chat loop.
pub async fn cmd_chat(session: Option<String>) -> Result<()> {
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

    let session = match session {
        Some(id) => coordinator
            .get_session(&id)
            .await
            .with_context(|| format!("failed to resume session {id}"))?,
        None => coordinator.get_session("").await?,
    };
    println!("session: {}  (Ctrl-C cancels the current task, `exit` quits)", session.id);

    loop {
        print!("you> ");
        io::stdout().flush().ok();

        let Some(line) = read_line().await? else {
            break;
        };
        let task = line.trim();
        if task.is_empty() {
            continue;
        }
        if task == "exit" || task == "quit" {
            break;
        }

        let run = {
            let coordinator = Arc::clone(coordinator);
            let session_id = session.id.clone();
            let input = TaskInput::text(task);
            tokio::spawn(async move { coordinator.execute_task(&session_id, input).await })
        };
        tokio::pin!(run);

        let result = tokio::select! {
            result = &mut run => result,
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    store.set_cancel(&session.id);
                }
                // Let the engine wind down to its terminal event.
                (&mut run).await
            }
        };

        match result {
            Ok(Ok(task_result)) => {
                if task_result.stop_reason == StopReason::Cancelled {
                    continue;
                }
            }
            Ok(Err(e)) => eprintln!("task failed: {e}"),
            Err(e) => eprintln!("task panicked: {e}"),
        }
    }

    println!("bye");
    Ok(())
}

/// Read one line from stdin without blocking the runtime.
async fn read_line() -> Result<Option<String>> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(line)),
            Err(e) => Err(anyhow::Error::from(e)),
        }
    })
    .await
    .context("stdin reader failed")?
}
