//! Session history: record conversion and request-window assembly.
//!
//! The store persists messages as stringly rows ([`MessageRecord`]); the
//! engine works with typed [`Message`]s.  Conversion lives here, along with
//! the two history rules the engine depends on:
//!
//! - **Log invariant** — every `tool` message answers a tool call id that
//!   appeared on an earlier assistant message, and call ids are unique
//!   within a session.  A violation marks the session unhealthy.
//! - **Window rule** — the request window is `[system] + tail(history)`;
//!   when the cut would separate a tool response from its originating
//!   assistant message, both are dropped together.  A tool message never
//!   enters a window without its assistant.

use std::collections::HashSet;

use opal_store::{MessageRecord, NewMessage};

use crate::error::{AgentError, Result};
use crate::llm::types::{Message, Role, ToolCall};

// ---------------------------------------------------------------------------
// Record conversion
// ---------------------------------------------------------------------------

/// Convert a typed message into a store row payload.
pub fn to_record(message: &Message) -> Result<NewMessage> {
    Ok(NewMessage {
        role: message.role.as_str().to_owned(),
        content: message.content.clone(),
        tool_calls: if message.tool_calls.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&message.tool_calls)?)
        },
        tool_call_id: message.tool_call_id.clone(),
        name: message.name.clone(),
        metadata: serde_json::to_string(&message.metadata)?,
        is_compressed: message.is_compressed,
        source_messages: if message.source_messages.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&message.source_messages)?)
        },
    })
}

/// Convert a store row back into a typed message.
pub fn from_record(record: &MessageRecord) -> Result<Message> {
    let role = Role::parse(&record.role).ok_or_else(|| AgentError::InvariantViolation {
        reason: format!("unknown role `{}` in session log", record.role),
    })?;

    let tool_calls: Vec<ToolCall> = match &record.tool_calls {
        Some(raw) => serde_json::from_str(raw)?,
        None => Vec::new(),
    };
    let source_messages: Vec<Message> = match &record.source_messages {
        Some(raw) => serde_json::from_str(raw)?,
        None => Vec::new(),
    };

    Ok(Message {
        role,
        content: record.content.clone(),
        tool_calls,
        tool_call_id: record.tool_call_id.clone(),
        name: record.name.clone(),
        metadata: serde_json::from_str(&record.metadata).unwrap_or_default(),
        is_compressed: record.is_compressed,
        source_messages,
    })
}

/// Convert a full session log.
pub fn from_records(records: &[MessageRecord]) -> Result<Vec<Message>> {
    records.iter().map(from_record).collect()
}

// ---------------------------------------------------------------------------
// Invariants
// ---------------------------------------------------------------------------

/// Check the session-log invariants.
///
/// # Errors
///
/// [`AgentError::InvariantViolation`] when a tool message has no prior
/// assistant tool call with a matching id, or when a call id repeats.
pub fn verify_log(messages: &[Message]) -> Result<()> {
    let mut seen_ids: HashSet<&str> = HashSet::new();

    for message in messages {
        match message.role {
            Role::Assistant => {
                for call in &message.tool_calls {
                    if !seen_ids.insert(call.id.as_str()) {
                        return Err(AgentError::InvariantViolation {
                            reason: format!("duplicate tool call id `{}`", call.id),
                        });
                    }
                }
            }
            Role::Tool => {
                let id = message.tool_call_id.as_deref().unwrap_or_default();
                if !seen_ids.contains(id) {
                    return Err(AgentError::InvariantViolation {
                        reason: format!("orphan tool message for call id `{id}`"),
                    });
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Window assembly
// ---------------------------------------------------------------------------

/// Build the request window: `[system] + tail(messages, max_history)` with
/// the orphan rule applied at the cut.
pub fn assemble_window(
    system_prompt: &str,
    messages: &[Message],
    max_history: usize,
) -> Vec<Message> {
    let mut start = messages.len().saturating_sub(max_history);

    // The cut must not strand tool responses whose assistant fell off:
    // advance past any leading tool messages.
    while start < messages.len() && messages[start].role == Role::Tool {
        start += 1;
    }

    let tail = &messages[start..];

    // Belt over braces: a tool message mid-window whose assistant is absent
    // (possible after compression) is dropped as well.
    let available_ids: HashSet<&str> = tail
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .flat_map(|m| m.tool_calls.iter().map(|c| c.id.as_str()))
        .collect();

    let mut window = Vec::with_capacity(tail.len() + 1);
    window.push(Message::system(system_prompt));
    for message in tail {
        if message.role == Role::Tool {
            let id = message.tool_call_id.as_deref().unwrap_or_default();
            if !available_ids.contains(id) {
                continue;
            }
        }
        window.push(message.clone());
    }
    window
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(id: &str) -> Vec<Message> {
        vec![
            Message::assistant_tool_calls(
                "",
                vec![ToolCall {
                    id: id.into(),
                    name: "list_files".into(),
                    arguments: "{}".into(),
                }],
            ),
            Message::tool_result(id, "ok"),
        ]
    }

    #[test]
    fn round_trip_preserves_tool_calls() {
        let original = Message::assistant_tool_calls(
            "checking",
            vec![ToolCall {
                id: "c1".into(),
                name: "bash".into(),
                arguments: r#"{"cmd":"ls"}"#.into(),
            }],
        );
        let record = to_record(&original).unwrap();
        assert_eq!(record.role, "assistant");

        let restored = from_record(&MessageRecord {
            seq: 0,
            session_id: "s".into(),
            role: record.role,
            content: record.content,
            tool_calls: record.tool_calls,
            tool_call_id: record.tool_call_id,
            name: record.name,
            metadata: record.metadata,
            is_compressed: record.is_compressed,
            source_messages: record.source_messages,
            created_at: 0,
        })
        .unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn verify_accepts_paired_log() {
        let mut log = vec![Message::user("go")];
        log.extend(exchange("c1"));
        log.extend(exchange("c2"));
        assert!(verify_log(&log).is_ok());
    }

    #[test]
    fn verify_rejects_orphan_tool_message() {
        let log = vec![Message::user("go"), Message::tool_result("ghost", "?")];
        assert!(matches!(
            verify_log(&log),
            Err(AgentError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn verify_rejects_duplicate_call_ids() {
        let mut log = exchange("c1");
        log.extend(exchange("c1"));
        assert!(matches!(
            verify_log(&log),
            Err(AgentError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn window_cut_drops_assistant_and_tool_together() {
        // Log: user, assistant(c1), tool(c1), user — a window of 2 would
        // start at the tool message; the cut advances past it.
        let mut log = vec![Message::user("first")];
        log.extend(exchange("c1"));
        log.push(Message::user("second"));

        let window = assemble_window("sys", &log, 2);
        let roles: Vec<Role> = window.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User]);
        assert_eq!(window[1].content, "second");
    }

    #[test]
    fn window_keeps_complete_exchanges() {
        let mut log = vec![Message::user("go")];
        log.extend(exchange("c1"));
        log.push(Message::assistant("done"));

        let window = assemble_window("sys", &log, 10);
        assert_eq!(window.len(), 5);
        assert_eq!(window[0].role, Role::System);
    }

    #[test]
    fn window_never_contains_unmatched_tool_message() {
        let log = vec![
            Message::user("go"),
            // Assistant missing (e.g. dropped by compression), tool present.
            Message::tool_result("c9", "late"),
            Message::user("next"),
        ];
        let window = assemble_window("sys", &log, 10);
        assert!(window.iter().all(|m| m.role != Role::Tool));
    }
}
