//! SQLite access layer.
//!
//! The session log is append-mostly: short insert transactions from the
//! engine (one per message or ledger entry), full-log reads on every
//! iteration for window assembly, and occasional hydration reads from
//! sinks.  One connection behind a mutex fits that profile; WAL keeps the
//! readers and the writer out of each other's way, and all access from
//! async code hops to the blocking pool so the runtime never stalls on
//! file IO.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migration;

/// Shared handle to the session database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and tune it for the session log.
    ///
    /// Does blocking file IO; call during startup, or use
    /// [`Database::open_and_migrate`] from async code.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening session database");
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory session database");
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Open, tune, and bring the schema up to date.
    pub async fn open_and_migrate(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = tokio::task::spawn_blocking(move || Self::open(&path)).await??;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Apply all pending schema migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = Self::lock(&conn)?;
            migration::run_all(&guard)
        })
        .await?
    }

    /// Run a read or single-statement write on the blocking pool.
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = Self::lock(&conn)?;
            f(&guard)
        })
        .await?
    }

    /// Like [`Database::execute`], but with a `&mut Connection` for callers
    /// that need a transaction (message and ledger appends).
    pub async fn execute_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = Self::lock(&conn)?;
            f(&mut guard)
        })
        .await?
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        Self::tune(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(conn: &Arc<Mutex<Connection>>) -> StoreResult<MutexGuard<'_, Connection>> {
        conn.lock()
            .map_err(|_| StoreError::TaskJoin("connection mutex poisoned".into()))
    }

    // ── tuning ───────────────────────────────────────────────────────

    /// Tune a fresh connection for the append-heavy session log.
    fn tune(conn: &Connection) -> StoreResult<()> {
        debug!("tuning connection for session-log workload");

        // WAL: engine appends must not block window-assembly or hydration
        // reads, and vice versa.
        conn.pragma_update(None, "journal_mode", "WAL")?;

        // NORMAL under WAL loses at most the last transaction on power
        // failure, never the log's integrity — fine for a conversation
        // log with a commit per message.
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        // Parallel tool batches append messages and attachment ops
        // concurrently; queue on the writer instead of surfacing
        // SQLITE_BUSY to the engine.
        conn.pragma_update(None, "busy_timeout", 5000)?;

        // Session delete cascades to messages and the attachment ledger.
        conn.pragma_update(None, "foreign_keys", "ON")?;

        // 64 MiB mmap + 16 MiB page cache: the full log is re-read every
        // iteration, so hot sessions should stay out of read() entirely.
        conn.pragma_update(None, "mmap_size", 67_108_864_i64)?;
        conn.pragma_update(None, "cache_size", -16_000_i64)?;

        // Window tails and ledger folds sort by seq; keep the scratch
        // structures in memory.
        conn.pragma_update(None, "temp_store", "MEMORY")?;

        Ok(())
    }
}
