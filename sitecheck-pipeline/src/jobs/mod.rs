//! Job persistence
//!
//! Two interchangeable backends behind [`JobStore`]: a bounded in-memory map
//! and a SQLite table. [`JobStoreFactory`] picks one at startup; nothing
//! else looks at which backend is in use.

mod factory;
mod memory;
mod sqlite;

pub use factory::JobStoreFactory;
pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

use crate::models::{JobUpdate, PipelineJob, RunOptions};
use async_trait::async_trait;
use sitecheck_common::Result;
use uuid::Uuid;

/// Default number of jobs kept by the in-memory backend
pub const DEFAULT_MEMORY_CAPACITY: usize = 100;

/// Durable or volatile storage of [`PipelineJob`] records
///
/// Every operation is independent and atomic. Updates against a terminal
/// job are accepted and ignored; updates against an unknown id return
/// `Error::NotFound`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a `pending` job
    async fn create(&self, file_names: Vec<String>, options: RunOptions) -> Result<PipelineJob>;

    async fn get(&self, job_id: Uuid) -> Result<Option<PipelineJob>>;

    /// Merge the supplied fields of `update` into the stored job
    async fn update_progress(&self, job_id: Uuid, update: JobUpdate) -> Result<()>;

    /// Terminal transition to `completed` with the transport-form result
    async fn complete(&self, job_id: Uuid, result: serde_json::Value) -> Result<()>;

    /// Terminal transition to `failed`
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()>;

    /// Backend name for health reporting
    fn backend_name(&self) -> &'static str;
}
