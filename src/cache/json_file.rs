//! Flat-file cache backend.
//!
//! The whole store is one JSON document with three top-level arrays. Every
//! append rewrites the document to a temporary file in the same directory
//! and atomically renames it over the store, so readers observe either the
//! old document or the new one, never a partial write. An internal mutex
//! serializes writers; two concurrent appends both survive.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    ActionLogEntry, CacheError, CacheRecord, ContextCache, ConversationEntry, DesignStateSnapshot,
    RecordKind,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    conversations: Vec<ConversationEntry>,
    design_states: Vec<DesignStateSnapshot>,
    actions_history: Vec<ActionLogEntry>,
}

/// JSON-file backed [`ContextCache`].
pub struct JsonFileCache {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileCache {
    /// Opens the store, creating an empty document when none exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let cache = Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        };
        if tokio::fs::try_exists(&cache.path).await? {
            // Validate the existing document up front rather than on the
            // first append.
            cache.read_document().await?;
        } else {
            cache.write_document(&StoreDocument::default()).await?;
            debug!(path = %cache.path.display(), "created json cache");
        }
        Ok(cache)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<StoreDocument, CacheError> {
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write_document(&self, document: &StoreDocument) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec_pretty(document)?;
        let tmp = tmp_path(&self.path);
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

#[async_trait]
impl ContextCache for JsonFileCache {
    async fn append(&self, record: CacheRecord) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.read_document().await?;
        match record {
            CacheRecord::Conversation(entry) => document.conversations.push(entry),
            CacheRecord::DesignState(entry) => document.design_states.push(entry),
            CacheRecord::ActionLog(entry) => document.actions_history.push(entry),
        }
        self.write_document(&document).await
    }

    async fn recent(&self, kind: RecordKind, limit: usize) -> Result<Vec<CacheRecord>, CacheError> {
        let document = self.read_document().await?;
        let records: Vec<CacheRecord> = match kind {
            RecordKind::Conversation => document
                .conversations
                .into_iter()
                .rev()
                .take(limit)
                .map(CacheRecord::Conversation)
                .collect(),
            RecordKind::DesignState => document
                .design_states
                .into_iter()
                .rev()
                .take(limit)
                .map(CacheRecord::DesignState)
                .collect(),
            RecordKind::ActionLog => document
                .actions_history
                .into_iter()
                .rev()
                .take(limit)
                .map(CacheRecord::ActionLog)
                .collect(),
        };
        Ok(records)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        self.write_document(&StoreDocument::default()).await?;
        debug!(path = %self.path.display(), "cleared json cache");
        Ok(())
    }
}
