//! SQLite access for job persistence and the result cache
//!
//! Tables are created in code on connect; there is no separate migration step.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Connect to a SQLite database URL (`sqlite://path?mode=rwc`, `sqlite::memory:`)
///
/// In-memory databases are private to a connection, so their pool is
/// limited to a single connection.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("Invalid database URL: {}", url))?
        .create_if_missing(true);

    let in_memory = url.contains(":memory:") || url.contains("mode=memory");
    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 5 })
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", url))?;

    init_tables(&pool).await?;
    Ok(pool)
}

/// Open (creating if needed) a database file
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);
    connect(&db_url).await
}

/// Create the `pipeline_jobs` and `result_cache` tables if missing
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_jobs (
            job_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            current_stage TEXT,
            progress REAL NOT NULL DEFAULT 0.0,
            stage_progress TEXT NOT NULL DEFAULT '{}',
            stages_completed TEXT NOT NULL DEFAULT '[]',
            file_names TEXT NOT NULL DEFAULT '[]',
            options TEXT NOT NULL,
            result TEXT,
            error TEXT,
            warnings TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS result_cache (
            fingerprint TEXT PRIMARY KEY,
            result TEXT NOT NULL,
            summary TEXT NOT NULL DEFAULT '',
            cached_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_result_cache_cached_at ON result_cache(cached_at)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (pipeline_jobs, result_cache)");
    Ok(())
}
