pub mod journal;
pub mod outbox;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// SQLite-backed local store: opaque key/value settings, the offline queue and the audit trail.
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
}

impl LocalStore {
    /// Open or create the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        // Migrate on the raw connection before wrapping in the async Mutex.
        Self::run_migrations(&conn)?;

        info!("Local store initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Offline queue, rows removed once handled by a sync
            CREATE TABLE IF NOT EXISTS offline_queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                queued_at_ms INTEGER NOT NULL
            );

            -- Dispatch audit trail
            CREATE TABLE IF NOT EXISTS dispatch_journal (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                action TEXT NOT NULL,
                recipient TEXT NOT NULL,
                role TEXT NOT NULL,
                channel TEXT NOT NULL,
                mode TEXT NOT NULL,
                success INTEGER NOT NULL,
                error TEXT,
                recorded_at TEXT NOT NULL
            );
            ",
        )
        .context("Failed to run local store migrations")?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT value FROM kv WHERE key = ?1")
            .context("Failed to prepare kv lookup")?;
        let mut rows = stmt
            .query_map(rusqlite::params![key], |row| row.get::<_, String>(0))
            .with_context(|| format!("Failed to read key '{}'", key))?;
        match rows.next() {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(e)) => Err(e).with_context(|| format!("Failed to decode key '{}'", key)),
            None => Ok(None),
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
            rusqlite::params![key, value],
        )
        .with_context(|| format!("Failed to write key '{}'", key))?;
        Ok(())
    }
}
