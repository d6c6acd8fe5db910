//! Terminal event renderer.
//!
//! A bus listener that turns lifecycle events into terminal output: compact
//! one-liners by default, full tool output under `VERBOSE=1`.  On the final
//! `task_complete` (the `stream_finished` delivery) it hydrates attachment
//! summaries from the session ledger — events only carry names and content
//! ids, never bulk bytes.

use opal_events::{AgentEvent, EventKind, EventListener};
use opal_store::{Attachment, PreviewCache, SessionStore};

/// Characters of tool output shown in compact mode.
const COMPACT_RESULT_CHARS: usize = 200;

/// Renders agent events to stdout.
pub struct TerminalRenderer {
    store: SessionStore,
    previews: PreviewCache,
    verbose: bool,
}

impl TerminalRenderer {
    /// Create a renderer over the session store.
    pub fn new(store: SessionStore, verbose: bool) -> Self {
        Self {
            store,
            previews: PreviewCache::default(),
            verbose,
        }
    }

    async fn render_attachments(&self, session_id: &str) {
        let Ok(attachments) = self.store.attachments(session_id).await else {
            return;
        };
        if attachments.is_empty() {
            return;
        }

        println!("  attachments:");
        for attachment in attachments.values() {
            let preview = self
                .previews
                .get_or_render(&attachment.content_id(), || summarize(attachment))
                .await;
            println!("    - {preview}");
        }
    }
}

#[async_trait::async_trait]
impl EventListener for TerminalRenderer {
    fn name(&self) -> &str {
        "terminal-renderer"
    }

    async fn on_event(&self, event: &AgentEvent) {
        match &event.kind {
            EventKind::WorkflowInputReceived { task, .. } => {
                println!("▸ task: {task}");
            }

            EventKind::IterationStart { iter, total } if self.verbose => {
                println!("· iteration {iter}/{total}");
            }

            EventKind::ThinkComplete { content, .. } => {
                if !content.is_empty() {
                    println!("{content}");
                }
            }

            EventKind::ToolCallStart {
                tool_name,
                arguments_preview,
                ..
            } => {
                println!("⚙ {tool_name}({arguments_preview})");
            }

            EventKind::ToolCallStream { chunk, .. } if self.verbose => {
                println!("  │ {chunk}");
            }

            EventKind::ToolCallComplete {
                tool_name,
                result,
                error,
                duration_ms,
                ..
            } => match error {
                Some(err) => println!("✗ {tool_name} failed in {duration_ms}ms: {err}"),
                None => {
                    let output = result.as_deref().unwrap_or_default();
                    if self.verbose {
                        println!("✓ {tool_name} ({duration_ms}ms)\n{output}");
                    } else {
                        println!("✓ {tool_name} ({duration_ms}ms): {}", truncate(output));
                    }
                }
            },

            EventKind::SubagentProgress {
                completed, total, ..
            } => {
                println!("  ↳ subtasks {completed}/{total}");
            }

            EventKind::TaskComplete {
                final_answer,
                total_iterations,
                total_tokens,
                stream_finished,
                ..
            } => {
                if *stream_finished {
                    // Final delivery: hydrate the attachment summaries.
                    self.render_attachments(&event.session_id).await;
                } else {
                    println!("\n{final_answer}");
                    if self.verbose {
                        println!("({total_iterations} iterations, {total_tokens} tokens)");
                    }
                }
            }

            EventKind::TaskCancelled { reason, .. } => {
                println!("✋ cancelled: {reason}");
            }

            EventKind::Error { error, phase } => {
                println!("✗ error ({phase:?}): {error}");
            }

            _ => {}
        }
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= COMPACT_RESULT_CHARS {
        return s.replace('\n', " ");
    }
    let mut cut = COMPACT_RESULT_CHARS;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", s[..cut].replace('\n', " "))
}

fn summarize(attachment: &Attachment) -> String {
    let location = match (&attachment.data, &attachment.uri) {
        (Some(data), _) => format!("{} bytes inline", data.len() / 4 * 3),
        (None, Some(uri)) => uri.clone(),
        (None, None) => "reference".to_owned(),
    };
    format!(
        "{} ({}, {location})",
        attachment.name, attachment.media_type
    )
}
