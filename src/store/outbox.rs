use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfflineKind {
    Analytics,
    ChatMsg,
    Alert,
}

impl OfflineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfflineKind::Analytics => "ANALYTICS",
            OfflineKind::ChatMsg => "CHAT_MSG",
            OfflineKind::Alert => "ALERT",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "ANALYTICS" => Some(OfflineKind::Analytics),
            "CHAT_MSG" => Some(OfflineKind::ChatMsg),
            "ALERT" => Some(OfflineKind::Alert),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OfflineItem {
    pub id: String,
    pub kind: OfflineKind,
    pub payload: serde_json::Value,
    pub queued_at_ms: i64,
}

/// Items captured while the gateway is unusable, held until the operator syncs.
#[derive(Clone)]
pub struct Outbox {
    conn: Arc<Mutex<Connection>>,
}

impl Outbox {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Queue an item and return the resulting queue length.
    pub async fn enqueue(&self, kind: OfflineKind, payload: &serde_json::Value) -> Result<usize> {
        let id = Uuid::new_v4().to_string();
        let payload = serde_json::to_string(payload).context("Failed to encode queue payload")?;
        let queued_at_ms = chrono::Utc::now().timestamp_millis();

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO offline_queue (id, kind, payload, queued_at_ms) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id, kind.as_str(), payload, queued_at_ms],
        )
        .context("Failed to queue offline item")?;

        Self::count_locked(&conn)
    }

    pub async fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        Self::count_locked(&conn)
    }

    /// Every queued item, oldest first. Items stay queued until removed.
    pub async fn pending(&self) -> Result<Vec<OfflineItem>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT id, kind, payload, queued_at_ms FROM offline_queue ORDER BY seq ASC")
            .context("Failed to prepare queue query")?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .context("Failed to read offline queue")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to collect offline queue")?;

        let mut items = Vec::with_capacity(raw.len());
        for (id, kind, payload, queued_at_ms) in raw {
            let kind = OfflineKind::parse(&kind)
                .with_context(|| format!("Unknown offline item kind '{}' for {}", kind, id))?;
            let payload = serde_json::from_str(&payload)
                .with_context(|| format!("Corrupt payload for offline item {}", id))?;
            items.push(OfflineItem {
                id,
                kind,
                payload,
                queued_at_ms,
            });
        }
        Ok(items)
    }

    /// Drop a single item once it has been handled.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM offline_queue WHERE id = ?1", rusqlite::params![id])
            .with_context(|| format!("Failed to remove offline item {}", id))?;
        Ok(())
    }

    fn count_locked(conn: &Connection) -> Result<usize> {
        let count: i64 = conn
            .query_row("SELECT count(*) FROM offline_queue", [], |row| row.get(0))
            .context("Failed to count offline queue")?;
        Ok(count as usize)
    }
}
