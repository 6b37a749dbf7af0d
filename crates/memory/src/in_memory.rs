//! Volatile in-memory store — used in tests and for sessions that run
//! with persistence disabled.

use crate::bank::MemoryBank;
use agentd_core::error::MemoryError;
use agentd_core::memory::{
    MemoryHit, MemoryKind, MemoryQuery, MemoryRecord, MemoryStats, MemoryStore, MemoryUpdate,
};
use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryStore {
    bank: RwLock<MemoryBank>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn store(&self, record: MemoryRecord) -> Result<String, MemoryError> {
        Ok(self.bank.write().await.store(record))
    }

    async fn search(&self, query: MemoryQuery) -> Result<Vec<MemoryHit>, MemoryError> {
        Ok(self.bank.write().await.search(&query))
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, MemoryError> {
        Ok(self.bank.write().await.get(id))
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
        Ok(self.bank.write().await.update(id, update))
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        Ok(self.bank.write().await.delete(id))
    }

    async fn consolidate(&self) -> Result<usize, MemoryError> {
        Ok(self.bank.write().await.consolidate())
    }

    async fn forget(&self, max_records: usize) -> Result<usize, MemoryError> {
        Ok(self.bank.write().await.forget(max_records))
    }

    async fn stats(&self) -> Result<MemoryStats, MemoryError> {
        Ok(self.bank.read().await.stats())
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        Ok(self.bank.read().await.records.len())
    }

    async fn clear(&self) -> Result<(), MemoryError> {
        self.bank.write().await.records.clear();
        Ok(())
    }
}
