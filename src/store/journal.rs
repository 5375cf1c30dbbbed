use anyhow::{Context, Result};
use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::dispatch::envelope::normalize_recipient;
use crate::dispatch::{DispatchRequest, DispatchResult};

#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub id: String,
    pub action: String,
    pub recipient: String,
    pub role: String,
    pub channel: String,
    pub mode: String,
    pub success: bool,
    pub error: Option<String>,
    pub recorded_at: String,
}

/// Append-only audit trail of dispatch attempts.
#[derive(Clone)]
pub struct Journal {
    conn: Arc<Mutex<Connection>>,
}

impl Journal {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub async fn record(
        &self,
        request: &DispatchRequest,
        result: &DispatchResult,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let recorded_at = chrono::Utc::now().to_rfc3339();

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO dispatch_journal
             (id, action, recipient, role, channel, mode, success, error, recorded_at)
             VALUES (?1, 'DISPATCH', ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                id,
                normalize_recipient(&request.recipient),
                request.role.to_string(),
                request.channel.to_string(),
                result.mode.to_string(),
                result.success,
                result.error,
                recorded_at,
            ],
        )
        .context("Failed to record dispatch")?;
        Ok(id)
    }

    /// Most recent entries first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<JournalEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, action, recipient, role, channel, mode, success, error, recorded_at
                 FROM dispatch_journal ORDER BY seq DESC LIMIT ?1",
            )
            .context("Failed to prepare journal query")?;
        let entries = stmt
            .query_map(rusqlite::params![limit as i64], |row| {
                Ok(JournalEntry {
                    id: row.get(0)?,
                    action: row.get(1)?,
                    recipient: row.get(2)?,
                    role: row.get(3)?,
                    channel: row.get(4)?,
                    mode: row.get(5)?,
                    success: row.get(6)?,
                    error: row.get(7)?,
                    recorded_at: row.get(8)?,
                })
            })
            .context("Failed to map journal rows")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to collect journal rows")?;
        Ok(entries)
    }
}
