//! SQLite-backed job store (`pipeline_jobs` table)
//!
//! One row per job. List and map fields live in JSON text columns and are
//! updated in place with SQLite's JSON functions, so a progress update only
//! touches the fields it carries.

use super::JobStore;
use crate::models::{JobStatus, JobUpdate, PipelineJob, RunOptions, StageId};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sitecheck_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

const ACTIVE_STATUSES: &str = "('pending', 'running')";

#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteJobStore {
    /// Wrap a pool whose tables are already initialised (see `db::connect`)
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn with_max_lock_wait(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Fail every job left `pending` or `running` by a previous process
    ///
    /// Returns the number of rows changed.
    pub async fn mark_interrupted_jobs(&self) -> Result<u64> {
        let now = Utc::now().to_rfc3339();
        let pool = &self.pool;
        let sql = format!(
            "UPDATE pipeline_jobs SET status = 'failed', \
             error = 'Interrupted: service restarted before the job finished', \
             updated_at = ?, completed_at = ? \
             WHERE status IN {}",
            ACTIVE_STATUSES
        );

        let affected = retry_on_lock("mark_interrupted_jobs", self.max_lock_wait_ms, || async {
            let done = sqlx::query(&sql)
                .bind(&now)
                .bind(&now)
                .execute(pool)
                .await?;
            Ok(done.rows_affected())
        })
        .await?;

        if affected > 0 {
            tracing::warn!(count = affected, "Marked interrupted jobs as failed");
        }
        Ok(affected)
    }

    /// Resolve a no-op write: unknown id is an error, terminal job is ignored
    async fn check_unchanged(&self, job_id: Uuid, operation: &str) -> Result<()> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM pipeline_jobs WHERE job_id = ?")
                .bind(job_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        match status {
            None => Err(Error::NotFound(format!("Job {}", job_id))),
            Some(status) => {
                tracing::debug!(job_id = %job_id, %status, operation, "Ignoring write to terminal job");
                Ok(())
            }
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize {}: {}", what, e)))
}

fn from_json<T: serde::de::DeserializeOwned>(text: &str, what: &str) -> Result<T> {
    serde_json::from_str(text)
        .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", what, e)))
}

fn parse_time(text: &str, what: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", what, e)))
}

fn parse_optional_time(text: Option<String>, what: &str) -> Result<Option<DateTime<Utc>>> {
    text.map(|t| parse_time(&t, what)).transpose()
}

fn row_to_job(row: &SqliteRow) -> Result<PipelineJob> {
    let job_id: String = row.get("job_id");
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|e| Error::Internal(format!("Invalid job id {}: {}", job_id, e)))?;

    let status: String = row.get("status");
    let status: JobStatus = status.parse().map_err(Error::Internal)?;

    let current_stage: Option<String> = row.get("current_stage");
    let current_stage = current_stage
        .map(|s| s.parse::<StageId>())
        .transpose()
        .map_err(Error::Internal)?;

    let result: Option<String> = row.get("result");
    let result = result.map(|r| from_json(&r, "result")).transpose()?;

    Ok(PipelineJob {
        job_id,
        status,
        current_stage,
        progress: row.get("progress"),
        stage_progress: from_json(row.get("stage_progress"), "stage_progress")?,
        stages_completed: from_json(row.get("stages_completed"), "stages_completed")?,
        file_names: from_json(row.get("file_names"), "file_names")?,
        options: from_json(row.get("options"), "options")?,
        result,
        error: row.get("error"),
        warnings: from_json(row.get("warnings"), "warnings")?,
        created_at: parse_time(row.get("created_at"), "created_at")?,
        updated_at: parse_time(row.get("updated_at"), "updated_at")?,
        started_at: parse_optional_time(row.get("started_at"), "started_at")?,
        completed_at: parse_optional_time(row.get("completed_at"), "completed_at")?,
    })
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, file_names: Vec<String>, options: RunOptions) -> Result<PipelineJob> {
        let job = PipelineJob::new(file_names, options);

        // Prepare all data before touching the pool
        let job_id = job.job_id.to_string();
        let file_names = to_json(&job.file_names, "file_names")?;
        let options = to_json(&job.options, "options")?;
        let created_at = job.created_at.to_rfc3339();
        let pool = &self.pool;

        retry_on_lock("create_job", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO pipeline_jobs (
                    job_id, status, progress, stage_progress, stages_completed,
                    file_names, options, warnings, created_at, updated_at
                ) VALUES (?, 'pending', 0.0, '{}', '[]', ?, ?, '[]', ?, ?)
                "#,
            )
            .bind(&job_id)
            .bind(&file_names)
            .bind(&options)
            .bind(&created_at)
            .bind(&created_at)
            .execute(pool)
            .await?;
            Ok(())
        })
        .await?;

        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<PipelineJob>> {
        let row = sqlx::query("SELECT * FROM pipeline_jobs WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn update_progress(&self, job_id: Uuid, update: JobUpdate) -> Result<()> {
        let id = job_id.to_string();
        let now = Utc::now().to_rfc3339();
        let current_stage = update.current_stage.map(|s| s.to_string());
        let progress = update.progress.map(|p| p.clamp(0.0, 100.0));
        let (sub_stage, sub_progress) = match &update.stage_progress {
            Some((stage, sub)) => (Some(stage.to_string()), Some(to_json(sub, "stage_progress")?)),
            None => (None, None),
        };
        let stage_completed = update.stage_completed.map(|s| s.to_string());
        let warnings = &update.warnings;
        let pool = &self.pool;

        let sql = format!(
            r#"
            UPDATE pipeline_jobs SET
                status = 'running',
                started_at = COALESCE(started_at, ?),
                current_stage = COALESCE(?, current_stage),
                progress = MAX(progress, COALESCE(?, progress)),
                stage_progress = CASE WHEN ? IS NULL THEN stage_progress
                    ELSE json_set(stage_progress, '$.' || ?, json(?)) END,
                stages_completed = CASE
                    WHEN ? IS NULL THEN stages_completed
                    WHEN EXISTS (SELECT 1 FROM json_each(stages_completed) WHERE value = ?)
                        THEN stages_completed
                    ELSE json_insert(stages_completed, '$[#]', ?) END,
                updated_at = ?
            WHERE job_id = ? AND status IN {}
            "#,
            ACTIVE_STATUSES
        );

        let changed = retry_on_lock("update_job_progress", self.max_lock_wait_ms, || async {
            let mut tx = pool.begin().await?;

            let done = sqlx::query(&sql)
                .bind(&now)
                .bind(&current_stage)
                .bind(progress)
                .bind(&sub_stage)
                .bind(&sub_stage)
                .bind(&sub_progress)
                .bind(&stage_completed)
                .bind(&stage_completed)
                .bind(&stage_completed)
                .bind(&now)
                .bind(&id)
                .execute(&mut *tx)
                .await?;

            if done.rows_affected() > 0 {
                for warning in warnings {
                    sqlx::query(
                        "UPDATE pipeline_jobs SET warnings = json_insert(warnings, '$[#]', ?) \
                         WHERE job_id = ?",
                    )
                    .bind(warning)
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;
                }
            }

            tx.commit().await?;
            Ok(done.rows_affected())
        })
        .await?;

        if changed == 0 {
            self.check_unchanged(job_id, "update_progress").await?;
        }
        Ok(())
    }

    async fn complete(&self, job_id: Uuid, result: serde_json::Value) -> Result<()> {
        let id = job_id.to_string();
        let now = Utc::now().to_rfc3339();
        let result = to_json(&result, "result")?;
        let pool = &self.pool;
        let sql = format!(
            r#"
            UPDATE pipeline_jobs SET
                status = 'completed',
                progress = 100.0,
                current_stage = NULL,
                result = ?,
                started_at = COALESCE(started_at, ?),
                updated_at = ?,
                completed_at = ?
            WHERE job_id = ? AND status IN {}
            "#,
            ACTIVE_STATUSES
        );

        let changed = retry_on_lock("complete_job", self.max_lock_wait_ms, || async {
            let done = sqlx::query(&sql)
                .bind(&result)
                .bind(&now)
                .bind(&now)
                .bind(&now)
                .bind(&id)
                .execute(pool)
                .await?;
            Ok(done.rows_affected())
        })
        .await?;

        if changed == 0 {
            self.check_unchanged(job_id, "complete").await?;
        }
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        let id = job_id.to_string();
        let now = Utc::now().to_rfc3339();
        let pool = &self.pool;
        let sql = format!(
            "UPDATE pipeline_jobs SET status = 'failed', error = ?, updated_at = ?, completed_at = ? \
             WHERE job_id = ? AND status IN {}",
            ACTIVE_STATUSES
        );

        let changed = retry_on_lock("fail_job", self.max_lock_wait_ms, || async {
            let done = sqlx::query(&sql)
                .bind(error)
                .bind(&now)
                .bind(&now)
                .bind(&id)
                .execute(pool)
                .await?;
            Ok(done.rows_affected())
        })
        .await?;

        if changed == 0 {
            self.check_unchanged(job_id, "fail").await?;
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
