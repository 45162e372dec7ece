//! Embedded relational cache backend.
//!
//! `rusqlite::Connection` is not Sync, so the connection lives behind
//! `Arc<Mutex<_>>` and every operation runs on the blocking pool. One
//! transaction per append keeps concurrent writers from interleaving
//! partial rows.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tokio::task::spawn_blocking;
use tracing::debug;

use super::{
    ActionLogEntry, CacheError, CacheRecord, ContextCache, ConversationEntry, DesignStateSnapshot,
    RecordKind,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    prompt TEXT NOT NULL,
    response TEXT NOT NULL,
    provider TEXT NOT NULL,
    model TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS design_states (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    context TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS actions_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    action TEXT NOT NULL,
    success INTEGER NOT NULL,
    error_message TEXT
);
";

/// SQLite backed [`ContextCache`].
pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCache {
    /// Opens or creates the database at `path`.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let conn = Connection::open(path).map_err(sqlite_err)?;
        Self::init(conn)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory().map_err(sqlite_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(sqlite_err)?;
        conn.execute_batch(SCHEMA).map_err(sqlite_err)?;
        debug!("initialized sqlite cache");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, CacheError>
    where
        F: FnOnce(&mut Connection) -> Result<T, CacheError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| CacheError::Background("connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|err| CacheError::Background(err.to_string()))?
    }
}

fn sqlite_err(err: rusqlite::Error) -> CacheError {
    CacheError::Sqlite(err.to_string())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| CacheError::Sqlite(format!("bad timestamp '{raw}': {err}")))
}

#[async_trait]
impl ContextCache for SqliteCache {
    async fn append(&self, record: CacheRecord) -> Result<(), CacheError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(sqlite_err)?;
            match &record {
                CacheRecord::Conversation(entry) => {
                    tx.execute(
                        "INSERT INTO conversations (timestamp, prompt, response, provider, model)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            entry.timestamp.to_rfc3339(),
                            entry.prompt,
                            entry.response,
                            entry.provider,
                            entry.model,
                        ],
                    )
                    .map_err(sqlite_err)?;
                }
                CacheRecord::DesignState(entry) => {
                    let context = serde_json::to_string(&entry.context)?;
                    tx.execute(
                        "INSERT INTO design_states (timestamp, context) VALUES (?1, ?2)",
                        params![entry.timestamp.to_rfc3339(), context],
                    )
                    .map_err(sqlite_err)?;
                }
                CacheRecord::ActionLog(entry) => {
                    let action = serde_json::to_string(&entry.action)?;
                    tx.execute(
                        "INSERT INTO actions_history (timestamp, action, success, error_message)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![
                            entry.timestamp.to_rfc3339(),
                            action,
                            entry.success,
                            entry.error_message,
                        ],
                    )
                    .map_err(sqlite_err)?;
                }
            }
            tx.commit().map_err(sqlite_err)
        })
        .await
    }

    async fn recent(&self, kind: RecordKind, limit: usize) -> Result<Vec<CacheRecord>, CacheError> {
        self.with_conn(move |conn| {
            let mut records = Vec::new();
            match kind {
                RecordKind::Conversation => {
                    let mut stmt = conn
                        .prepare(
                            "SELECT timestamp, prompt, response, provider, model
                             FROM conversations ORDER BY id DESC LIMIT ?1",
                        )
                        .map_err(sqlite_err)?;
                    let rows = stmt
                        .query_map(params![limit as i64], |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, String>(3)?,
                                row.get::<_, String>(4)?,
                            ))
                        })
                        .map_err(sqlite_err)?;
                    for row in rows {
                        let (timestamp, prompt, response, provider, model) =
                            row.map_err(sqlite_err)?;
                        records.push(CacheRecord::Conversation(ConversationEntry {
                            timestamp: parse_timestamp(&timestamp)?,
                            prompt,
                            response,
                            provider,
                            model,
                        }));
                    }
                }
                RecordKind::DesignState => {
                    let mut stmt = conn
                        .prepare(
                            "SELECT timestamp, context FROM design_states
                             ORDER BY id DESC LIMIT ?1",
                        )
                        .map_err(sqlite_err)?;
                    let rows = stmt
                        .query_map(params![limit as i64], |row| {
                            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                        })
                        .map_err(sqlite_err)?;
                    for row in rows {
                        let (timestamp, context) = row.map_err(sqlite_err)?;
                        records.push(CacheRecord::DesignState(DesignStateSnapshot {
                            timestamp: parse_timestamp(&timestamp)?,
                            context: serde_json::from_str(&context)?,
                        }));
                    }
                }
                RecordKind::ActionLog => {
                    let mut stmt = conn
                        .prepare(
                            "SELECT timestamp, action, success, error_message
                             FROM actions_history ORDER BY id DESC LIMIT ?1",
                        )
                        .map_err(sqlite_err)?;
                    let rows = stmt
                        .query_map(params![limit as i64], |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, bool>(2)?,
                                row.get::<_, Option<String>>(3)?,
                            ))
                        })
                        .map_err(sqlite_err)?;
                    for row in rows {
                        let (timestamp, action, success, error_message) =
                            row.map_err(sqlite_err)?;
                        records.push(CacheRecord::ActionLog(ActionLogEntry {
                            timestamp: parse_timestamp(&timestamp)?,
                            action: serde_json::from_str(&action)?,
                            success,
                            error_message,
                        }));
                    }
                }
            }
            Ok(records)
        })
        .await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(sqlite_err)?;
            tx.execute("DELETE FROM conversations", []).map_err(sqlite_err)?;
            tx.execute("DELETE FROM design_states", []).map_err(sqlite_err)?;
            tx.execute("DELETE FROM actions_history", [])
                .map_err(sqlite_err)?;
            tx.commit().map_err(sqlite_err)
        })
        .await
    }
}
