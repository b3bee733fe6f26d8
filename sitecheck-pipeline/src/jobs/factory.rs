//! Backend selection for the job store

use super::{JobStore, MemoryJobStore, SqliteJobStore};
use crate::db;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Chooses and caches the job store backend
///
/// A configured database URL selects [`SqliteJobStore`]; otherwise the
/// bounded [`MemoryJobStore`] is used. The first call to [`get`](Self::get)
/// decides, later calls return the same instance until [`reset`](Self::reset).
pub struct JobStoreFactory {
    database_url: Option<String>,
    memory_capacity: usize,
    store: OnceCell<Arc<dyn JobStore>>,
}

impl JobStoreFactory {
    pub fn new(database_url: Option<String>, memory_capacity: usize) -> Self {
        Self {
            database_url: database_url.filter(|url| !url.trim().is_empty()),
            memory_capacity,
            store: OnceCell::new(),
        }
    }

    pub fn is_durable(&self) -> bool {
        self.database_url.is_some()
    }

    /// Shared store, created on first use
    pub async fn get(&self) -> anyhow::Result<Arc<dyn JobStore>> {
        let store = self
            .store
            .get_or_try_init(|| async { self.build().await })
            .await?;
        Ok(Arc::clone(store))
    }

    /// Forget the cached backend (tests switch configuration between cases)
    pub fn reset(&mut self) {
        self.store.take();
    }

    async fn build(&self) -> anyhow::Result<Arc<dyn JobStore>> {
        match &self.database_url {
            Some(url) => {
                let pool = db::connect(url).await?;
                let store = SqliteJobStore::new(pool);
                store.mark_interrupted_jobs().await?;
                tracing::info!("Job store: sqlite");
                Ok(Arc::new(store))
            }
            None => {
                tracing::info!(capacity = self.memory_capacity, "Job store: memory");
                Ok(Arc::new(MemoryJobStore::new(self.memory_capacity)))
            }
        }
    }
}
