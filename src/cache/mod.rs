//! Durable, append-only context store.
//!
//! Two interchangeable backends implement [`ContextCache`]: a flat JSON
//! file rewritten via atomic rename, and an embedded SQLite store with one
//! transaction per append. Records are never mutated or deleted except by
//! an explicit `clear`.

pub mod json_file;
pub mod sqlite;

pub use json_file::JsonFileCache;
pub use sqlite::SqliteCache;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::action::CadAction;
use crate::schema::command::DesignContext;

/// The three record families the store keeps apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Conversation,
    DesignState,
    ActionLog,
}

/// One prompt/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub timestamp: DateTime<Utc>,
    pub prompt: String,
    pub response: String,
    pub provider: String,
    pub model: String,
}

/// Snapshot of the design context supplied with a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignStateSnapshot {
    pub timestamp: DateTime<Utc>,
    pub context: DesignContext,
}

/// One action handed to the host for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: CadAction,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// A single append-only record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheRecord {
    Conversation(ConversationEntry),
    DesignState(DesignStateSnapshot),
    ActionLog(ActionLogEntry),
}

impl CacheRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            CacheRecord::Conversation(_) => RecordKind::Conversation,
            CacheRecord::DesignState(_) => RecordKind::DesignState,
            CacheRecord::ActionLog(_) => RecordKind::ActionLog,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CacheRecord::Conversation(entry) => entry.timestamp,
            CacheRecord::DesignState(entry) => entry.timestamp,
            CacheRecord::ActionLog(entry) => entry.timestamp,
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("sqlite operation failed: {0}")]
    Sqlite(String),
    #[error("cache task failed: {0}")]
    Background(String),
}

/// Store contract shared by both backends.
///
/// `append` is atomic with respect to concurrent callers; `recent` returns
/// the newest records first and never blocks writers beyond one
/// transaction or file swap.
#[async_trait]
pub trait ContextCache: Send + Sync {
    async fn append(&self, record: CacheRecord) -> Result<(), CacheError>;

    async fn recent(&self, kind: RecordKind, limit: usize) -> Result<Vec<CacheRecord>, CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;
}
