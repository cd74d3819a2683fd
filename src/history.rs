// Persisted download history: one SQLite table, newest first, observable
// through a watch channel that is re-published after every mutation.

use rusqlite::{params, Connection, OpenFlags, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;

use crate::errors::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS download_history (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  title TEXT NOT NULL,
  format TEXT NOT NULL,
  file_path TEXT NOT NULL,
  created_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_download_history_created
  ON download_history(created_at_ms DESC, id DESC);
"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub id: i64,
    pub title: String,
    /// "MP3" or "MP4"
    pub format: String,
    pub file_path: PathBuf,
    pub created_at_ms: i64,
}

impl DownloadItem {
    pub fn created_at(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp_nanos(self.created_at_ms as i128 * 1_000_000)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    /// `2024-10-22 18:04` (UTC)
    pub fn created_at_label(&self) -> String {
        let format = time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]");
        self.created_at()
            .format(&format)
            .unwrap_or_else(|_| self.created_at_ms.to_string())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let file_path: String = row.get(3)?;
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            format: row.get(2)?,
            file_path: PathBuf::from(file_path),
            created_at_ms: row.get(4)?,
        })
    }
}

pub fn now_ms() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    (nanos / 1_000_000) as i64
}

pub struct HistoryStore {
    conn: Mutex<Connection>,
    items: watch::Sender<Vec<DownloadItem>>,
}

impl HistoryStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        log::debug!("[history] Opened {}", path.display());
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        let items = query_all(&conn)?;
        let (tx, _rx) = watch::channel(items);
        Ok(Self {
            conn: Mutex::new(conn),
            items: tx,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-write leaves SQLite consistent; keep going.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, title: &str, format: &str, file_path: &Path) -> Result<DownloadItem> {
        self.insert_at(title, format, file_path, now_ms())
    }

    pub fn insert_at(
        &self,
        title: &str,
        format: &str,
        file_path: &Path,
        created_at_ms: i64,
    ) -> Result<DownloadItem> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO download_history (title, format, file_path, created_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![title, format, file_path.to_string_lossy(), created_at_ms],
        )?;
        let item = DownloadItem {
            id: conn.last_insert_rowid(),
            title: title.to_string(),
            format: format.to_string(),
            file_path: file_path.to_path_buf(),
            created_at_ms,
        };
        self.publish(&conn)?;
        log::info!("[history] Recorded #{} {}", item.id, item.title);
        Ok(item)
    }

    /// Returns whether a row was removed.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let conn = self.lock();
        let removed = conn.execute("DELETE FROM download_history WHERE id = ?1", params![id])?;
        self.publish(&conn)?;
        Ok(removed > 0)
    }

    /// Idempotent; returns the number of rows removed.
    pub fn clear_all(&self) -> Result<usize> {
        let conn = self.lock();
        let removed = conn.execute("DELETE FROM download_history", [])?;
        self.publish(&conn)?;
        if removed > 0 {
            log::info!("[history] Cleared {} entries", removed);
        }
        Ok(removed)
    }

    pub fn all(&self) -> Result<Vec<DownloadItem>> {
        let conn = self.lock();
        Ok(query_all(&conn)?)
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<DownloadItem>> {
        self.items.subscribe()
    }

    fn publish(&self, conn: &Connection) -> Result<()> {
        let items = query_all(conn)?;
        self.items.send_replace(items);
        Ok(())
    }
}

fn query_all(conn: &Connection) -> rusqlite::Result<Vec<DownloadItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, format, file_path, created_at_ms
         FROM download_history
         ORDER BY created_at_ms DESC, id DESC",
    )?;
    let rows = stmt.query_map([], DownloadItem::from_row)?;
    rows.collect()
}
