//! # opal-store
//!
//! Session store for the Opal agent core.
//!
//! Provides SQLite-backed persistence with WAL mode: an append-only message
//! log per session, an attachment mutation ledger folded into the current
//! set on read, in-process cancel signals with immediate visibility, and a
//! moka-backed preview cache for attachment hydration.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  PreviewCache (moka, content-addressed)  │
//! ├──────────────────────────────────────────┤
//! │  SessionStore                            │
//! │    sessions      (CRUD)                  │
//! │    messages      (append-only, ordered)  │
//! │    attachments   (ledger + fold)         │
//! │    cancel        (watch, not persisted)  │
//! ├──────────────────────────────────────────┤
//! │  Database (rusqlite WAL + pragmas)       │
//! │  Migrations (versioned, transactional)   │
//! └──────────────────────────────────────────┘
//! ```

pub mod attachment;
pub mod cache;
pub mod db;
pub mod error;
pub mod migration;
pub mod session;

// ── re-exports ───────────────────────────────────────────────────────

pub use attachment::{Attachment, AttachmentKind, AttachmentOp, PreviewProfile, fold_ledger};
pub use cache::{CacheStats, PreviewCache};
pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use session::{DEFAULT_INLINE_CAP, MessageRecord, NewMessage, SessionRecord, SessionStore};
