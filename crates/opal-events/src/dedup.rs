//! Per-session event deduplication.
//!
//! Sits upstream of listener fan-out: an event is admitted at most once per
//! `(event_type, session_id, run_id, call_id, content-hash)` key.  The one
//! sanctioned duplicate is a second terminal [`EventKind::TaskComplete`]
//! carrying `stream_finished = true`, delivered after streaming sinks drain.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use dashmap::DashMap;

use crate::event::{AgentEvent, EventKind};

/// Drops duplicate events before they reach listeners.
#[derive(Debug, Default)]
pub struct DedupPipeline {
    /// Seen-key sets, one per session so sessions cannot interfere.
    seen: DashMap<String, HashSet<u64>>,
}

impl DedupPipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the event should be delivered, recording its key.
    pub fn admit(&self, event: &AgentEvent) -> bool {
        if let EventKind::TaskComplete {
            stream_finished: true,
            ..
        } = event.kind
        {
            return true;
        }

        let key = Self::key(event);
        let mut seen = self.seen.entry(event.session_id.clone()).or_default();
        seen.insert(key)
    }

    /// Forget everything recorded for a session (call on session delete).
    pub fn clear_session(&self, session_id: &str) {
        self.seen.remove(session_id);
    }

    fn key(event: &AgentEvent) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        event.kind.event_type().hash(&mut hasher);
        event.session_id.hash(&mut hasher);
        event.run_id.hash(&mut hasher);
        event.kind.call_id().unwrap_or("").hash(&mut hasher);
        // Content hash over the serialized payload, minus the envelope
        // timestamp so a re-emitted identical payload still collides.
        if let Ok(payload) = serde_json::to_string(&event.kind) {
            payload.hash(&mut hasher);
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StopReason;

    fn thinking(session: &str, run: &str, iter: u32) -> AgentEvent {
        AgentEvent::new(session, run, EventKind::Thinking { iter })
    }

    #[test]
    fn duplicate_payload_is_dropped() {
        let dedup = DedupPipeline::new();
        assert!(dedup.admit(&thinking("s1", "r1", 1)));
        assert!(!dedup.admit(&thinking("s1", "r1", 1)));
        // Different iteration => different content hash => admitted.
        assert!(dedup.admit(&thinking("s1", "r1", 2)));
    }

    #[test]
    fn sessions_do_not_interfere() {
        let dedup = DedupPipeline::new();
        assert!(dedup.admit(&thinking("s1", "r1", 1)));
        assert!(dedup.admit(&thinking("s2", "r1", 1)));
    }

    #[test]
    fn stream_finished_terminal_is_always_admitted() {
        let dedup = DedupPipeline::new();
        let complete = |stream_finished| {
            AgentEvent::new(
                "s1",
                "r1",
                EventKind::TaskComplete {
                    final_answer: "done".into(),
                    total_iterations: 1,
                    total_tokens: 0,
                    stop_reason: StopReason::FinalAnswer,
                    duration_ms: 10,
                    attachment_names: Vec::new(),
                    stream_finished,
                },
            )
        };

        assert!(dedup.admit(&complete(false)));
        assert!(!dedup.admit(&complete(false)));
        assert!(dedup.admit(&complete(true)));
        assert!(dedup.admit(&complete(true)));
    }

    #[test]
    fn clear_session_resets_keys() {
        let dedup = DedupPipeline::new();
        assert!(dedup.admit(&thinking("s1", "r1", 1)));
        dedup.clear_session("s1");
        assert!(dedup.admit(&thinking("s1", "r1", 1)));
    }
}
