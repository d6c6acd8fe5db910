//! Context compression hook.
//!
//! When the request window's estimated token size exceeds the configured
//! budget, the earliest messages are collapsed into one synthetic assistant
//! summary before the request is assembled.  Compression is a pure function
//! of the window: the session log is never mutated, and the summary carries
//! `source_messages` so expansion is lossless.  Below the budget, raw
//! messages are sent untouched.

use tracing::debug;

use crate::llm::types::{Message, Role, estimate_tokens};

/// Produces a summary message for a span of history.
pub trait Compressor: Send + Sync {
    /// Collapse `messages` into a single summary message.
    ///
    /// Implementations must return a message with `is_compressed` set and
    /// `source_messages` carrying the originals.
    fn compress(&self, messages: &[Message]) -> Message;
}

/// Pure transcript digester: role-prefixed lines, truncated to a budget.
///
/// No LLM round-trip — the digest is deterministic, which keeps the
/// compression hook usable in tests and offline replay.
pub struct TranscriptCompressor {
    /// Maximum characters the digest may occupy.
    pub max_chars: usize,
}

impl Default for TranscriptCompressor {
    fn default() -> Self {
        Self { max_chars: 2000 }
    }
}

impl Compressor for TranscriptCompressor {
    fn compress(&self, messages: &[Message]) -> Message {
        let mut digest = String::new();
        for m in messages {
            let line = if m.tool_calls.is_empty() {
                format!("{}: {}\n", m.role.as_str(), m.content)
            } else {
                let names: Vec<&str> = m.tool_calls.iter().map(|c| c.name.as_str()).collect();
                format!("{}: [called {}]\n", m.role.as_str(), names.join(", "))
            };
            digest.push_str(&line);
        }
        if digest.len() > self.max_chars {
            let mut cut = self.max_chars;
            while !digest.is_char_boundary(cut) {
                cut -= 1;
            }
            digest.truncate(cut);
            digest.push_str("…");
        }

        Message::compressed(
            format!(
                "[Summary of {} earlier messages]\n{digest}",
                messages.len()
            ),
            messages.to_vec(),
        )
    }
}

/// Whether the window (system prompt excluded) exceeds the token budget.
pub fn needs_compression(messages: &[Message], token_budget: usize) -> bool {
    estimate_tokens(messages) > token_budget
}

/// Collapse all but the most recent `keep_recent` messages into a summary.
///
/// The split never strands a tool response from its assistant: when the
/// keep-boundary lands on a tool message, it advances so the pair stays in
/// the summarized span together.
pub fn compress_window(
    messages: &[Message],
    keep_recent: usize,
    compressor: &dyn Compressor,
) -> Vec<Message> {
    if messages.len() <= keep_recent {
        return messages.to_vec();
    }

    let mut split = messages.len() - keep_recent;
    while split < messages.len() && messages[split].role == Role::Tool {
        split += 1;
    }
    let (old, recent) = messages.split_at(split);
    if old.is_empty() {
        return messages.to_vec();
    }

    debug!(
        summarized = old.len(),
        kept = recent.len(),
        "compressing request window"
    );

    let mut result = Vec::with_capacity(1 + recent.len());
    result.push(compressor.compress(old));
    result.extend_from_slice(recent);
    result
}
