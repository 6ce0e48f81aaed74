use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::message::Role;
use crate::provider::ProviderId;
use crate::store::{MessageId, StoredMessage, Store, Thread, ThreadId};

const THREAD_COLUMNS: &str = "id, provider, model, name, created_at, updated_at";

/// SQLite-backed [`Store`]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path`, creating parent directories
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        info!("Opening store at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    /// Fresh database that lives only as long as the store
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS threads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                name TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                meta JSON,
                created_at TEXT NOT NULL,
                FOREIGN KEY (thread_id) REFERENCES threads(id)
            );

            CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, id);
            CREATE INDEX IF NOT EXISTS idx_threads_latest ON threads(provider, model, updated_at);
            ",
        )?;
        Ok(Self { conn })
    }
}

/// Fixed-width UTC timestamps so text order matches time order
fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("Unreadable timestamp {:?}: {}", raw, e);
            DateTime::<Utc>::UNIX_EPOCH
        })
}

fn thread_from_row(row: &Row<'_>) -> rusqlite::Result<Thread> {
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(Thread {
        id: row.get(0)?,
        provider: row.get(1)?,
        model: row.get(2)?,
        name: row.get(3)?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

/// Raw message row; role and meta are decoded outside the rusqlite closure
struct MessageRow {
    id: MessageId,
    thread_id: ThreadId,
    role: String,
    content: String,
    meta: Option<String>,
    created_at: String,
}

impl MessageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            thread_id: row.get(1)?,
            role: row.get(2)?,
            content: row.get(3)?,
            meta: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn decode(self) -> Result<StoredMessage> {
        let meta = self.meta.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring unreadable meta on message {}: {}", self.id, e);
                None
            }
        });
        Ok(StoredMessage {
            id: self.id,
            thread_id: self.thread_id,
            role: self.role.parse()?,
            content: self.content,
            meta,
            created_at: parse_timestamp(&self.created_at),
        })
    }
}

impl Store for SqliteStore {
    fn create_thread(
        &self,
        provider: ProviderId,
        model: &str,
        name: Option<&str>,
    ) -> Result<ThreadId> {
        let ts = now();
        self.conn.execute(
            "INSERT INTO threads (provider, model, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
            params![provider.as_str(), model, name, ts],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!("Created thread {} for {}:{}", id, provider, model);
        Ok(id)
    }

    fn get_thread(&self, id: ThreadId) -> Result<Option<Thread>> {
        let sql = format!("SELECT {} FROM threads WHERE id = ?1", THREAD_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![id], thread_from_row)
            .optional()?)
    }

    fn get_latest_thread(
        &self,
        provider: ProviderId,
        model: Option<&str>,
    ) -> Result<Option<Thread>> {
        let thread = match model {
            Some(model) => {
                let sql = format!(
                    "SELECT {} FROM threads WHERE provider = ?1 AND model = ?2 COLLATE NOCASE \
                     ORDER BY updated_at DESC, id DESC LIMIT 1",
                    THREAD_COLUMNS
                );
                self.conn
                    .query_row(&sql, params![provider.as_str(), model], thread_from_row)
                    .optional()?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM threads WHERE provider = ?1 \
                     ORDER BY updated_at DESC, id DESC LIMIT 1",
                    THREAD_COLUMNS
                );
                self.conn
                    .query_row(&sql, params![provider.as_str()], thread_from_row)
                    .optional()?
            }
        };
        Ok(thread)
    }

    fn get_recent_threads(&self, limit: usize) -> Result<Vec<Thread>> {
        let sql = format!(
            "SELECT {} FROM threads ORDER BY updated_at DESC, id DESC LIMIT ?1",
            THREAD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let threads = stmt
            .query_map(params![limit as i64], thread_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(threads)
    }

    fn get_thread_messages(&self, thread_id: ThreadId, limit: usize) -> Result<Vec<StoredMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, thread_id, role, content, meta, created_at FROM messages \
             WHERE thread_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![thread_id, limit as i64], MessageRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().rev().map(MessageRow::decode).collect()
    }

    fn add_message(
        &self,
        thread_id: ThreadId,
        role: Role,
        content: &str,
        meta: Option<&Value>,
    ) -> Result<MessageId> {
        let meta = meta.map(serde_json::to_string).transpose()?;
        let ts = now();

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO messages (thread_id, role, content, meta, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![thread_id, role.as_str(), content, meta, ts],
        )?;
        let id = tx.last_insert_rowid();
        let touched = tx.execute(
            "UPDATE threads SET updated_at = ?1 WHERE id = ?2",
            params![ts, thread_id],
        )?;
        if touched == 0 {
            return Err(Error::ThreadResolution(format!("thread {} does not exist", thread_id)));
        }
        tx.commit()?;

        debug!("Added {} message {} to thread {}", role, id, thread_id);
        Ok(id)
    }
}
