//! Thread-safe handle to a memory store.
//!
//! One `tokio::sync::RwLock` guards the whole store. Ingestion and
//! consolidation take the write lock for their full duration; queries take
//! the read lock and may run alongside each other, observing the knowledge
//! base either before or after a consolidation, never in between.

use std::sync::Arc;

use tokio::sync::{RwLock, RwLockReadGuard};

use super::consolidation::ConsolidationReport;
use super::store::{MemoryStore, ScoredArticle};
use super::MemoryStats;
use crate::error::Result;
use crate::persistence::{MemoryBackend, MemoryDocument};
use crate::types::{Role, TopicArticle};

/// Cloneable, shareable memory store
#[derive(Debug, Clone)]
pub struct SharedMemory {
    inner: Arc<RwLock<MemoryStore>>,
}

impl SharedMemory {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    /// Record a dialogue turn, consolidating when the window is full
    pub async fn add_log(&self, role: Role, content: impl Into<String>) -> Result<Option<ConsolidationReport>> {
        let mut store = self.inner.write().await;
        store.add_log(role, content).await
    }

    /// Force a consolidation of whatever is buffered
    pub async fn consolidate(&self) -> Result<Option<ConsolidationReport>> {
        let mut store = self.inner.write().await;
        store.consolidate().await
    }

    /// Closest topic article to `text`, cloned out of the lock
    pub async fn query(&self, text: &str) -> Result<Option<TopicArticle>> {
        let store = self.inner.read().await;
        Ok(store.query(text).await?.cloned())
    }

    pub async fn search(&self, text: &str, limit: usize) -> Result<Vec<ScoredArticle>> {
        let store = self.inner.read().await;
        store.search(text, limit).await
    }

    pub async fn stats(&self) -> MemoryStats {
        self.inner.read().await.stats()
    }

    pub async fn serialize(&self) -> MemoryDocument {
        self.inner.read().await.serialize()
    }

    /// Snapshot the store into `backend`
    pub async fn save(&self, backend: &dyn MemoryBackend) -> Result<()> {
        let document = self.serialize().await;
        backend.save(&document)
    }

    /// Read access for inspection
    pub async fn read(&self) -> RwLockReadGuard<'_, MemoryStore> {
        self.inner.read().await
    }
}

impl From<MemoryStore> for SharedMemory {
    fn from(store: MemoryStore) -> Self {
        Self::new(store)
    }
}
