//! Tool invocation gateway.
//!
//! The single entry point through which the engine invokes tools.  Every
//! call goes through the same sequence: parse the argument JSON, validate it
//! against the tool's parameter schema, run the tool on its own task with a
//! deadline and cancellation, recover panics, and wrap whatever happened in
//! a [`ToolResult`] envelope.  Nothing a tool does — bad arguments, errors,
//! panics, hangs — ever unwinds into the engine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::registry::ToolRegistry;
use super::{ToolContext, ToolResult};
use crate::llm::ToolCall;

/// Default per-call tool timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Wraps the registry with uniform invocation semantics.
#[derive(Clone)]
pub struct ToolGateway {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolGateway {
    /// Create a gateway over `registry` with the given per-call timeout.
    pub fn new(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// The underlying registry.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Invoke one tool call and return its envelope.
    ///
    /// Never fails: every outcome — including unknown tools, argument
    /// errors, timeouts, cancellation, and panics — is reported through
    /// [`ToolResult::error`].
    pub async fn invoke(&self, ctx: &ToolContext, call: &ToolCall) -> ToolResult {
        let started = Instant::now();

        let Some(registered) = self.registry.get(&call.name) else {
            return ToolResult::failure(
                &call.id,
                format!("unknown tool: {}", call.name),
                started.elapsed(),
            );
        };

        // 1. Parse the raw argument JSON into an object.
        let args = match parse_arguments(&call.arguments) {
            Ok(args) => args,
            Err(reason) => {
                debug!(tool = %call.name, %reason, "argument parse failed");
                return ToolResult::failure(&call.id, reason, started.elapsed());
            }
        };

        // 2. Validate against the descriptor's parameter schema.
        if let Some(schema) = &registered.schema {
            let instance = Value::Object(args.clone());
            if let Err(errors) = schema.validate(&instance) {
                let reasons: Vec<String> = errors.map(|e| e.to_string()).collect();
                debug!(tool = %call.name, reasons = ?reasons, "argument validation failed");
                return ToolResult::failure(
                    &call.id,
                    format!("invalid arguments: {}", reasons.join("; ")),
                    started.elapsed(),
                );
            }
        }

        // 3. Run on a separate task so a panicking tool is isolated, racing
        //    the deadline and the cancellation signal.
        let tool = Arc::clone(&registered.tool);
        let task_ctx = ctx.clone();
        let mut handle = tokio::spawn(async move { tool.invoke(&task_ctx, args).await });

        let mut cancel = ctx.cancel.clone();
        let cancelled = async move {
            // A dropped sender means nobody can cancel any more; park forever
            // instead of firing.
            if cancel.wait_for(|c| *c).await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        let outcome = tokio::select! {
            res = &mut handle => res,
            () = tokio::time::sleep(self.timeout) => {
                handle.abort();
                warn!(tool = %call.name, timeout_s = self.timeout.as_secs(), "tool timed out");
                return ToolResult::failure(
                    &call.id,
                    format!(
                        "tool `{}` timed out after {}s",
                        call.name,
                        self.timeout.as_secs()
                    ),
                    started.elapsed(),
                );
            }
            () = cancelled => {
                handle.abort();
                debug!(tool = %call.name, "tool cancelled");
                return ToolResult::failure(
                    &call.id,
                    format!("tool `{}` cancelled", call.name),
                    started.elapsed(),
                );
            }
        };

        let duration = started.elapsed();
        match outcome {
            Ok(Ok(output)) => ToolResult::success(&call.id, output, duration),
            Ok(Err(err)) => ToolResult::failure(&call.id, err.to_string(), duration),
            Err(join_err) if join_err.is_panic() => {
                let msg = panic_message(join_err.into_panic());
                warn!(tool = %call.name, panic = %msg, "tool panicked");
                ToolResult::failure(&call.id, format!("tool panic: {msg}"), duration)
            }
            Err(_) => ToolResult::failure(
                &call.id,
                format!("tool `{}` aborted", call.name),
                duration,
            ),
        }
    }
}

/// Parse an LLM-emitted argument string into a JSON object.
///
/// An empty string is treated as `{}` (models routinely omit arguments for
/// parameterless tools); anything else must parse to a JSON object.
fn parse_arguments(raw: &str) -> Result<Map<String, Value>, String> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("invalid JSON arguments: expected an object".to_owned()),
        Err(e) => Err(format!("invalid JSON arguments: {e}")),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_arguments_parse_to_empty_object() {
        assert!(parse_arguments("").unwrap().is_empty());
        assert!(parse_arguments("  ").unwrap().is_empty());
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        assert!(parse_arguments("[1,2]").unwrap_err().contains("expected an object"));
        assert!(parse_arguments("{not json").unwrap_err().contains("invalid JSON arguments"));
    }
}
