//! Schema migration system.
//!
//! Migrations are static SQL strings keyed by version number.  The current
//! version is tracked in a `_migrations` table so each migration runs exactly
//! once, inside a transaction.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// A single migration definition.
struct Migration {
    /// Monotonically increasing version number (1, 2, 3, ...).
    version: u32,
    /// Human-readable description.
    description: &'static str,
    /// Raw SQL to execute.  May contain multiple statements separated by `;`.
    sql: &'static str,
}

/// All migrations in order.  Add new migrations to the end of this array.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "initial schema — sessions, messages, attachment ledger",
    sql: r#"
        CREATE TABLE sessions (
            id          TEXT PRIMARY KEY,
            working_dir TEXT NOT NULL,
            metadata    TEXT NOT NULL DEFAULT '{}',
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL
        );

        CREATE TABLE messages (
            session_id      TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            seq             INTEGER NOT NULL,
            role            TEXT NOT NULL CHECK(role IN ('system','user','assistant','tool')),
            content         TEXT NOT NULL,
            tool_calls      TEXT,
            tool_call_id    TEXT,
            name            TEXT,
            metadata        TEXT NOT NULL DEFAULT '{}',
            is_compressed   INTEGER NOT NULL DEFAULT 0,
            source_messages TEXT,
            created_at      INTEGER NOT NULL,
            PRIMARY KEY (session_id, seq)
        );
        CREATE INDEX idx_messages_session ON messages(session_id);

        CREATE TABLE attachment_ops (
            session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            seq        INTEGER NOT NULL,
            op         TEXT NOT NULL CHECK(op IN ('add','remove')),
            name       TEXT NOT NULL,
            attachment TEXT,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (session_id, seq)
        );
        CREATE INDEX idx_attachment_ops_session ON attachment_ops(session_id);
    "#,
}];

/// Apply all pending migrations to `conn`.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )?;

    let current: u32 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |r| {
            r.get(0)
        })
        .unwrap_or(0);

    for m in MIGRATIONS.iter().filter(|m| m.version > current) {
        info!(version = m.version, description = m.description, "applying migration");

        let applied = chrono::Utc::now().timestamp();
        conn.execute_batch("BEGIN")?;
        let result = conn.execute_batch(m.sql).and_then(|()| {
            conn.execute(
                "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![m.version, m.description, applied],
            )
            .map(|_| ())
        });

        match result {
            Ok(()) => conn.execute_batch("COMMIT")?,
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(StoreError::Migration {
                    version: m.version,
                    message: e.to_string(),
                });
            }
        }
    }

    debug!("schema up to date");
    Ok(())
}
