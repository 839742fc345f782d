//! Detection history: an append-only log of saved snapshot images.
//!
//! Writes (save, clear) go through a single lock per store, so a clear racing a
//! save leaves either both rows or neither, never a torn row.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::frame::Frame;

/// Snapshot timestamp format (local time).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A persisted still image from an explicit detect action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub id: i64,
    pub timestamp: String,
    /// PNG bytes.
    pub image: Vec<u8>,
}

/// Snapshot without its image, for listings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SnapshotMeta {
    pub id: i64,
    pub timestamp: String,
    pub bytes: usize,
}

impl From<&Snapshot> for SnapshotMeta {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            id: snapshot.id,
            timestamp: snapshot.timestamp.clone(),
            bytes: snapshot.image.len(),
        }
    }
}

pub trait SnapshotStore: Send + Sync {
    /// Append a snapshot; returns its id.
    fn save(&self, timestamp: &str, png: &[u8]) -> Result<i64>;

    /// Every snapshot, most recent first.
    fn list(&self) -> Result<Vec<Snapshot>>;

    fn get(&self, id: i64) -> Result<Option<Snapshot>>;

    /// Delete every snapshot; returns how many were removed.
    fn clear(&self) -> Result<usize>;

    fn list_meta(&self) -> Result<Vec<SnapshotMeta>> {
        Ok(self.list()?.iter().map(SnapshotMeta::from).collect())
    }
}

/// PNG-encode `frame` and save it stamped with the current local time.
pub fn save_frame(store: &dyn SnapshotStore, frame: &Frame) -> Result<i64> {
    let png = frame.encode_png()?;
    let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
    let id = store.save(&timestamp, &png)?;
    log::info!("snapshot {} saved at {} ({} bytes)", id, timestamp, png.len());
    Ok(id)
}

pub struct SqliteSnapshotStore {
    conn: Mutex<Connection>,
}

impl SqliteSnapshotStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("open snapshot database {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS detections (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              timestamp TEXT,
              image BLOB
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("snapshot store lock poisoned"))
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn save(&self, timestamp: &str, png: &[u8]) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO detections(timestamp, image) VALUES (?1, ?2)",
            params![timestamp, png],
        )
        .context("insert snapshot")?;
        Ok(conn.last_insert_rowid())
    }

    fn list(&self) -> Result<Vec<Snapshot>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, image FROM detections ORDER BY timestamp DESC, id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Snapshot {
                id: row.get(0)?,
                timestamp: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                image: row.get::<_, Option<Vec<u8>>>(2)?.unwrap_or_default(),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn get(&self, id: i64) -> Result<Option<Snapshot>> {
        let conn = self.conn()?;
        let snapshot = conn
            .query_row(
                "SELECT id, timestamp, image FROM detections WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Snapshot {
                        id: row.get(0)?,
                        timestamp: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        image: row.get::<_, Option<Vec<u8>>>(2)?.unwrap_or_default(),
                    })
                },
            )
            .optional()?;
        Ok(snapshot)
    }

    fn clear(&self) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn
            .execute("DELETE FROM detections", [])
            .context("clear snapshots")?;
        log::info!("cleared {} snapshots", removed);
        Ok(removed)
    }

    fn list_meta(&self) -> Result<Vec<SnapshotMeta>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, length(image) FROM detections ORDER BY timestamp DESC, id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SnapshotMeta {
                id: row.get(0)?,
                timestamp: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                bytes: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as usize,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[derive(Debug, Default)]
struct InMemoryRows {
    next_id: i64,
    rows: Vec<Snapshot>,
}

/// Store for tests and store-less deployments; ids keep increasing across clears.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    inner: Mutex<InMemoryRows>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> Result<std::sync::MutexGuard<'_, InMemoryRows>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("snapshot store lock poisoned"))
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn save(&self, timestamp: &str, png: &[u8]) -> Result<i64> {
        let mut rows = self.rows()?;
        rows.next_id += 1;
        let id = rows.next_id;
        rows.rows.push(Snapshot {
            id,
            timestamp: timestamp.to_string(),
            image: png.to_vec(),
        });
        Ok(id)
    }

    fn list(&self) -> Result<Vec<Snapshot>> {
        let rows = self.rows()?;
        let mut out = rows.rows.clone();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    fn get(&self, id: i64) -> Result<Option<Snapshot>> {
        Ok(self.rows()?.rows.iter().find(|s| s.id == id).cloned())
    }

    fn clear(&self) -> Result<usize> {
        let mut rows = self.rows()?;
        let removed = rows.rows.len();
        rows.rows.clear();
        Ok(removed)
    }
}
