//! Bounded in-memory job store
//!
//! Loses every job on restart. When full, the oldest inserted job is evicted.

use super::{JobStore, DEFAULT_MEMORY_CAPACITY};
use crate::models::{JobUpdate, PipelineJob, RunOptions};
use async_trait::async_trait;
use chrono::Utc;
use sitecheck_common::{Error, Result};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<Uuid, PipelineJob>,
    /// Insertion order, oldest first
    order: VecDeque<Uuid>,
}

#[derive(Debug)]
pub struct MemoryJobStore {
    capacity: usize,
    inner: RwLock<Inner>,
}

impl MemoryJobStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn with_job<F>(&self, job_id: Uuid, f: F) -> Result<()>
    where
        F: FnOnce(&mut PipelineJob) -> bool,
    {
        let mut inner = self.inner.write().await;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::NotFound(format!("Job {}", job_id)))?;
        if !f(job) {
            tracing::debug!(job_id = %job_id, status = %job.status, "Ignoring update to terminal job");
        }
        Ok(())
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, file_names: Vec<String>, options: RunOptions) -> Result<PipelineJob> {
        let job = PipelineJob::new(file_names, options);
        let mut inner = self.inner.write().await;

        while inner.jobs.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.jobs.remove(&oldest);
                    tracing::debug!(job_id = %oldest, "Evicted oldest job from memory store");
                }
                None => break,
            }
        }

        inner.order.push_back(job.job_id);
        inner.jobs.insert(job.job_id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<PipelineJob>> {
        Ok(self.inner.read().await.jobs.get(&job_id).cloned())
    }

    async fn update_progress(&self, job_id: Uuid, update: JobUpdate) -> Result<()> {
        self.with_job(job_id, |job| job.apply_update(&update, Utc::now()))
            .await
    }

    async fn complete(&self, job_id: Uuid, result: serde_json::Value) -> Result<()> {
        self.with_job(job_id, |job| job.complete(result, Utc::now()))
            .await
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        self.with_job(job_id, |job| job.fail(error, Utc::now())).await
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobStatus, StageId};

    #[tokio::test]
    async fn test_evicts_oldest_inserted() {
        let store = MemoryJobStore::new(2);
        let a = store.create(vec![], RunOptions::default()).await.unwrap();
        let b = store.create(vec![], RunOptions::default()).await.unwrap();
        let c = store.create(vec![], RunOptions::default()).await.unwrap();

        assert!(store.get(a.job_id).await.unwrap().is_none());
        assert!(store.get(b.job_id).await.unwrap().is_some());
        assert!(store.get(c.job_id).await.unwrap().is_some());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let store = MemoryJobStore::default();
        let err = store
            .update_progress(Uuid::new_v4(), JobUpdate::new().progress(1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_then_complete() {
        let store = MemoryJobStore::default();
        let job = store
            .create(vec!["a.ifc".into()], RunOptions::default())
            .await
            .unwrap();

        store
            .update_progress(
                job.job_id,
                JobUpdate::new()
                    .stage(StageId::ModelParse)
                    .progress(15.0)
                    .completed(StageId::ModelParse),
            )
            .await
            .unwrap();
        store
            .complete(job.job_id, serde_json::json!({"ok": true}))
            .await
            .unwrap();
        // Ignored: already terminal
        store.fail(job.job_id, "late").await.unwrap();

        let stored = store.get(job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.stages_completed, vec![StageId::ModelParse]);
        assert!(stored.error.is_none());
    }
}
