//! File-based memory store — persistent JSONL storage.
//!
//! Each line of `records.jsonl` is one JSON-encoded `MemoryRecord`.
//! Records are loaded into memory on open and flushed to disk on every
//! mutation. This gives fast reads with durable writes, and the file is
//! human-inspectable.

use crate::bank::MemoryBank;
use agentd_core::error::MemoryError;
use agentd_core::memory::{
    MemoryHit, MemoryKind, MemoryQuery, MemoryRecord, MemoryStats, MemoryStore, MemoryUpdate,
};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A file-backed memory store using JSONL (one JSON object per line).
pub struct FileStore {
    path: PathBuf,
    bank: RwLock<MemoryBank>,
}

impl FileStore {
    /// Open a store at the given path, loading any existing records.
    pub fn open(path: PathBuf) -> Self {
        let records = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = records.len(), "file memory store loaded");
        Self {
            path,
            bank: RwLock::new(MemoryBank::new(records)),
        }
    }

    /// Conventional location inside a session directory.
    pub fn session_path(session_dir: &std::path::Path) -> PathBuf {
        session_dir.join("memory").join("records.jsonl")
    }

    fn load_from_disk(path: &PathBuf) -> Vec<MemoryRecord> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Vec::new(), // not created yet
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<MemoryRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "skipping corrupted memory record");
                    None
                }
            })
            .collect()
    }

    async fn flush(&self) -> Result<(), MemoryError> {
        let bank = self.bank.read().await;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MemoryError::Storage(format!("failed to create memory directory: {e}"))
            })?;
        }

        let mut content = String::new();
        for record in &bank.records {
            let line = serde_json::to_string(record)
                .map_err(|e| MemoryError::Storage(format!("failed to serialize record: {e}")))?;
            content.push_str(&line);
            content.push('\n');
        }

        std::fs::write(&self.path, &content)
            .map_err(|e| MemoryError::Storage(format!("failed to write memory file: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl MemoryStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn store(&self, record: MemoryRecord) -> Result<String, MemoryError> {
        let id = self.bank.write().await.store(record);
        self.flush().await?;
        Ok(id)
    }

    async fn search(&self, query: MemoryQuery) -> Result<Vec<MemoryHit>, MemoryError> {
        // Searching mutates access counts, so it flushes too.
        let hits = self.bank.write().await.search(&query);
        self.flush().await?;
        Ok(hits)
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, MemoryError> {
        let record = self.bank.write().await.get(id);
        if record.is_some() {
            self.flush().await?;
        }
        Ok(record)
    }

    async fn recent(
        &self,
        limit: usize,
        kinds: &[MemoryKind],
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        Ok(self.bank.read().await.recent(limit, kinds))
    }

    async fn important(
        &self,
        limit: usize,
        min_importance: f64,
        kinds: &[MemoryKind],
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        Ok(self.bank.read().await.important(limit, min_importance, kinds))
    }

    async fn update(
        &self,
        id: &str,
        update: MemoryUpdate,
    ) -> Result<Option<MemoryRecord>, MemoryError> {
        let record = self.bank.write().await.update(id, update);
        if record.is_some() {
            self.flush().await?;
        }
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        let deleted = self.bank.write().await.delete(id);
        if deleted {
            self.flush().await?;
        }
        Ok(deleted)
    }

    async fn consolidate(&self) -> Result<usize, MemoryError> {
        let promoted = self.bank.write().await.consolidate();
        if promoted > 0 {
            self.flush().await?;
        }
        Ok(promoted)
    }

    async fn forget(&self, max_records: usize) -> Result<usize, MemoryError> {
        let evicted = self.bank.write().await.forget(max_records);
        if evicted > 0 {
            self.flush().await?;
        }
        Ok(evicted)
    }

    async fn stats(&self) -> Result<MemoryStats, MemoryError> {
        Ok(self.bank.read().await.stats())
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        Ok(self.bank.read().await.records.len())
    }

    async fn clear(&self) -> Result<(), MemoryError> {
        self.bank.write().await.records.clear();
        self.flush().await
    }
}
