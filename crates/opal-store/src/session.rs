//! Session persistence.
//!
//! A session is a durable, append-only log: an ordered message sequence plus
//! an attachment mutation ledger, keyed by session id.  Appends are atomic
//! per session (one SQLite transaction each) and messages read back in
//! append order, so write → read round-trips yield the identical sequence.
//!
//! Cancellation is deliberately *not* persisted: each session owns an
//! in-process `watch` channel that flips to `true` on [`SessionStore::set_cancel`]
//! and is immediately visible to every reader.

use std::collections::BTreeMap;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::attachment::{Attachment, AttachmentOp, fold_ledger};
use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// Default cap on inline attachment data (10 MB decoded).
pub const DEFAULT_INLINE_CAP: usize = 10 * 1024 * 1024;

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Unique identifier (UUID v7, stable across restarts).
    pub id: String,
    /// Working directory tasks in this session run against.
    pub working_dir: String,
    /// Free-form metadata, JSON-encoded object.
    pub metadata: String,
    /// Unix timestamp when the session was created.
    pub created_at: i64,
    /// Unix timestamp when the session was last appended to.
    pub updated_at: i64,
}

/// A single message row within a session.
///
/// `tool_calls` and `source_messages` are stored as JSON strings; the agent
/// layer owns the typed message model and converts at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Position within the session (0-based, dense).
    pub seq: i64,
    /// The session this message belongs to.
    pub session_id: String,
    /// Role: `system`, `user`, `assistant`, or `tool`.
    pub role: String,
    /// Message text (may be empty for tool-call-only assistant turns).
    pub content: String,
    /// JSON-serialized tool calls (assistant messages only).
    pub tool_calls: Option<String>,
    /// The tool call this message answers (tool messages only).
    pub tool_call_id: Option<String>,
    /// Optional participant name.
    pub name: Option<String>,
    /// JSON-encoded metadata object.
    pub metadata: String,
    /// Whether this message is a compression summary.
    pub is_compressed: bool,
    /// JSON-serialized original messages a summary replaces.
    pub source_messages: Option<String>,
    /// Unix timestamp when the message was appended.
    pub created_at: i64,
}

/// A message to append (the store assigns `seq` and timestamps).
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub role: String,
    pub content: String,
    pub tool_calls: Option<String>,
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
    pub metadata: String,
    pub is_compressed: bool,
    pub source_messages: Option<String>,
}

impl NewMessage {
    /// Create a message with the given role and content.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            metadata: "{}".to_owned(),
            ..Self::default()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  SessionStore
// ═══════════════════════════════════════════════════════════════════════

/// CRUD operations on sessions, their message logs, and attachment ledgers.
#[derive(Clone)]
pub struct SessionStore {
    db: Database,
    cancels: std::sync::Arc<DashMap<String, watch::Sender<bool>>>,
    inline_cap: usize,
}

impl SessionStore {
    /// Create a store backed by `db` with the default inline attachment cap.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            cancels: std::sync::Arc::new(DashMap::new()),
            inline_cap: DEFAULT_INLINE_CAP,
        }
    }

    /// Builder: override the inline attachment cap (bytes, decoded).
    pub fn with_inline_cap(mut self, cap: usize) -> Self {
        self.inline_cap = cap;
        self
    }

    // ── session lifecycle ────────────────────────────────────────────

    /// Create a new session rooted at `working_dir`.
    #[instrument(skip(self))]
    pub async fn create(&self, working_dir: &str) -> StoreResult<SessionRecord> {
        let record = SessionRecord {
            id: Uuid::now_v7().to_string(),
            working_dir: working_dir.to_owned(),
            metadata: "{}".to_owned(),
            created_at: Utc::now().timestamp(),
            updated_at: Utc::now().timestamp(),
        };

        let row = record.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (id, working_dir, metadata, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        row.id,
                        row.working_dir,
                        row.metadata,
                        row.created_at,
                        row.updated_at
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!(session_id = %record.id, "session created");
        Ok(record)
    }

    /// Fetch a session by id.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<SessionRecord> {
        let id = id.to_owned();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    "SELECT id, working_dir, metadata, created_at, updated_at \
                     FROM sessions WHERE id = ?1",
                    rusqlite::params![id],
                    |row| {
                        Ok(SessionRecord {
                            id: row.get(0)?,
                            working_dir: row.get(1)?,
                            metadata: row.get(2)?,
                            created_at: row.get(3)?,
                            updated_at: row.get(4)?,
                        })
                    },
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                        entity: "session",
                        id,
                    },
                    other => other.into(),
                })
            })
            .await
    }

    /// List all sessions, most recently updated first.
    pub async fn list(&self) -> StoreResult<Vec<SessionRecord>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, working_dir, metadata, created_at, updated_at \
                     FROM sessions ORDER BY updated_at DESC",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(SessionRecord {
                            id: row.get(0)?,
                            working_dir: row.get(1)?,
                            metadata: row.get(2)?,
                            created_at: row.get(3)?,
                            updated_at: row.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Delete a session and everything attached to it.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let session_id = id.to_owned();
        let deleted = self
            .db
            .execute(move |conn| {
                let n = conn.execute(
                    "DELETE FROM sessions WHERE id = ?1",
                    rusqlite::params![session_id],
                )?;
                Ok(n)
            })
            .await?;

        if deleted == 0 {
            return Err(StoreError::NotFound {
                entity: "session",
                id: id.to_owned(),
            });
        }

        self.cancels.remove(id);
        debug!(session_id = %id, "session deleted");
        Ok(())
    }

    // ── messages ─────────────────────────────────────────────────────

    /// Append one message; returns its assigned `seq`.
    ///
    /// The existence check, sequence assignment, insert, and session touch
    /// happen in a single transaction, so concurrent appenders serialize and
    /// `seq` stays dense.
    #[instrument(skip(self, message), fields(role = %message.role))]
    pub async fn append_message(&self, id: &str, message: NewMessage) -> StoreResult<i64> {
        let session_id = id.to_owned();
        let now = Utc::now().timestamp();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;

                let exists: bool = tx
                    .query_row(
                        "SELECT 1 FROM sessions WHERE id = ?1",
                        rusqlite::params![session_id],
                        |_| Ok(true),
                    )
                    .unwrap_or(false);
                if !exists {
                    return Err(StoreError::NotFound {
                        entity: "session",
                        id: session_id,
                    });
                }

                let seq: i64 = tx.query_row(
                    "SELECT COALESCE(MAX(seq) + 1, 0) FROM messages WHERE session_id = ?1",
                    rusqlite::params![session_id],
                    |row| row.get(0),
                )?;

                tx.execute(
                    "INSERT INTO messages \
                     (session_id, seq, role, content, tool_calls, tool_call_id, name, \
                      metadata, is_compressed, source_messages, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    rusqlite::params![
                        session_id,
                        seq,
                        message.role,
                        message.content,
                        message.tool_calls,
                        message.tool_call_id,
                        message.name,
                        message.metadata,
                        message.is_compressed,
                        message.source_messages,
                        now
                    ],
                )?;

                tx.execute(
                    "UPDATE sessions SET updated_at = ?2 WHERE id = ?1",
                    rusqlite::params![session_id, now],
                )?;

                tx.commit()?;
                Ok(seq)
            })
            .await
    }

    /// Read the full message log in append order.
    pub async fn messages(&self, id: &str) -> StoreResult<Vec<MessageRecord>> {
        let session_id = id.to_owned();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT seq, session_id, role, content, tool_calls, tool_call_id, name, \
                            metadata, is_compressed, source_messages, created_at \
                     FROM messages WHERE session_id = ?1 ORDER BY seq ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![session_id], |row| {
                        Ok(MessageRecord {
                            seq: row.get(0)?,
                            session_id: row.get(1)?,
                            role: row.get(2)?,
                            content: row.get(3)?,
                            tool_calls: row.get(4)?,
                            tool_call_id: row.get(5)?,
                            name: row.get(6)?,
                            metadata: row.get(7)?,
                            is_compressed: row.get(8)?,
                            source_messages: row.get(9)?,
                            created_at: row.get(10)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    // ── attachments ──────────────────────────────────────────────────

    /// Append one ledger entry; returns its assigned `seq`.
    ///
    /// Inline data beyond the configured cap is rewritten reference-only
    /// before it reaches disk.
    #[instrument(skip(self, op), fields(name = %op.name()))]
    pub async fn append_attachment_op(&self, id: &str, op: AttachmentOp) -> StoreResult<i64> {
        let op = match op {
            AttachmentOp::Add { attachment } => AttachmentOp::Add {
                attachment: attachment.apply_inline_cap(self.inline_cap),
            },
            remove => remove,
        };

        let session_id = id.to_owned();
        let name = op.name().to_owned();
        let (op_tag, payload) = match &op {
            AttachmentOp::Add { attachment } => ("add", Some(serde_json::to_string(attachment)?)),
            AttachmentOp::Remove { .. } => ("remove", None),
        };
        let now = Utc::now().timestamp();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;

                let exists: bool = tx
                    .query_row(
                        "SELECT 1 FROM sessions WHERE id = ?1",
                        rusqlite::params![session_id],
                        |_| Ok(true),
                    )
                    .unwrap_or(false);
                if !exists {
                    return Err(StoreError::NotFound {
                        entity: "session",
                        id: session_id,
                    });
                }

                let seq: i64 = tx.query_row(
                    "SELECT COALESCE(MAX(seq) + 1, 0) FROM attachment_ops WHERE session_id = ?1",
                    rusqlite::params![session_id],
                    |row| row.get(0),
                )?;

                tx.execute(
                    "INSERT INTO attachment_ops (session_id, seq, op, name, attachment, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![session_id, seq, op_tag, name, payload, now],
                )?;

                tx.execute(
                    "UPDATE sessions SET updated_at = ?2 WHERE id = ?1",
                    rusqlite::params![session_id, now],
                )?;

                tx.commit()?;
                Ok(seq)
            })
            .await
    }

    /// The raw mutation ledger in append order.
    pub async fn attachment_ledger(&self, id: &str) -> StoreResult<Vec<AttachmentOp>> {
        let session_id = id.to_owned();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT op, name, attachment FROM attachment_ops \
                     WHERE session_id = ?1 ORDER BY seq ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![session_id], |row| {
                        let op: String = row.get(0)?;
                        let name: String = row.get(1)?;
                        let payload: Option<String> = row.get(2)?;
                        Ok((op, name, payload))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                let mut ops = Vec::with_capacity(rows.len());
                for (op, name, payload) in rows {
                    match op.as_str() {
                        "add" => {
                            let payload = payload.ok_or_else(|| {
                                StoreError::InvalidArgument(format!(
                                    "add op for `{name}` has no attachment payload"
                                ))
                            })?;
                            ops.push(AttachmentOp::Add {
                                attachment: serde_json::from_str(&payload)?,
                            });
                        }
                        _ => ops.push(AttachmentOp::Remove { name }),
                    }
                }
                Ok(ops)
            })
            .await
    }

    /// The current attachment set: fold of the ledger.
    pub async fn attachments(&self, id: &str) -> StoreResult<BTreeMap<String, Attachment>> {
        Ok(fold_ledger(self.attachment_ledger(id).await?))
    }

    // ── cancellation ─────────────────────────────────────────────────

    /// Flip the session's cancel signal to `true` (monotonic for the
    /// duration of a run; immediately visible to all readers).
    pub fn set_cancel(&self, id: &str) {
        let tx = self.cancel_sender(id);
        tx.send_replace(true);
        debug!(session_id = %id, "cancel signal set");
    }

    /// Re-arm the signal before a new run on the same session.
    pub fn clear_cancel(&self, id: &str) {
        self.cancel_sender(id).send_replace(false);
    }

    /// A receiver that observes the cancel signal.
    pub fn cancel_signal(&self, id: &str) -> watch::Receiver<bool> {
        self.cancel_sender(id).subscribe()
    }

    /// Whether the session is currently cancelled.
    pub fn is_cancelled(&self, id: &str) -> bool {
        *self.cancel_sender(id).subscribe().borrow()
    }

    fn cancel_sender(&self, id: &str) -> watch::Sender<bool> {
        self.cancels
            .entry(id.to_owned())
            .or_insert_with(|| watch::channel(false).0)
            .clone()
    }
}
