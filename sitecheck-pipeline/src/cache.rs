//! Result cache keyed by content fingerprint
//!
//! Full results are stored in transport form with raw source bytes removed.
//! The cache lives in the `result_cache` SQLite table; when that store cannot
//! be opened the cache silently degrades to an in-process list.

use crate::models::{FileContent, InputFile, RunOptions};
use crate::serializer::strip_source_bytes;
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sitecheck_common::Result;
use sqlx::SqlitePool;
use std::path::Path;
use tokio::sync::Mutex;

pub const DEFAULT_MAX_ENTRIES: usize = 20;

/// Third part of a file's fingerprint triple
///
/// The modification time when known. In-memory uploads without one use a
/// SHA-256 of their bytes, so an edit that keeps the size still changes the
/// fingerprint.
fn version_tag(file: &InputFile) -> String {
    match (&file.modified_at, &file.content) {
        (Some(t), _) => t.to_rfc3339_opts(SecondsFormat::Secs, true),
        (None, FileContent::Bytes(bytes)) => format!("{:x}", Sha256::digest(bytes.as_slice())),
        (None, FileContent::Path(_)) => String::new(),
    }
}

/// Hex SHA-256 over the sorted `name|size|version` triples of `files` plus
/// the canonical encoding of `options`. Independent of upload order.
pub fn compute_fingerprint(files: &[InputFile], options: &RunOptions) -> String {
    let mut triples: Vec<String> = files
        .iter()
        .map(|f| format!("{}|{}|{}", f.name, f.size, version_tag(f)))
        .collect();
    triples.sort();

    let mut hasher = Sha256::new();
    for triple in &triples {
        hasher.update(triple.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(options.canonical_encoding().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Human readable description of a run, stored next to the cached result
pub fn summarize(files: &[InputFile], options: &RunOptions) -> String {
    let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
    format!(
        "{} file{} ({}), depth={}",
        files.len(),
        if files.len() == 1 { "" } else { "s" },
        names.join(", "),
        options.depth
    )
}

/// One cached result
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub result: Value,
    pub summary: String,
    pub cached_at: DateTime<Utc>,
}

enum Backend {
    Sqlite(SqlitePool),
    Memory(Mutex<Vec<CacheEntry>>),
}

pub struct ResultCache {
    backend: Backend,
    max_entries: usize,
}

impl ResultCache {
    /// Cache over an initialised pool
    pub fn with_pool(pool: SqlitePool, max_entries: usize) -> Self {
        Self {
            backend: Backend::Sqlite(pool),
            max_entries: max_entries.max(1),
        }
    }

    /// Volatile cache
    pub fn in_memory(max_entries: usize) -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(Vec::new())),
            max_entries: max_entries.max(1),
        }
    }

    /// Open the cache database at `path`, falling back to memory on failure
    pub async fn open(path: &Path, max_entries: usize) -> Self {
        match crate::db::init_database_pool(path).await {
            Ok(pool) => {
                tracing::info!(path = %path.display(), max_entries, "Result cache opened");
                Self::with_pool(pool, max_entries)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Result cache store unavailable, using in-memory cache"
                );
                Self::in_memory(max_entries)
            }
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, Backend::Sqlite(_))
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Cached result for `fingerprint`
    ///
    /// Read errors and corrupt rows are logged and treated as a miss.
    pub async fn get(&self, fingerprint: &str) -> Option<Value> {
        match &self.backend {
            Backend::Memory(entries) => entries
                .lock()
                .await
                .iter()
                .find(|e| e.fingerprint == fingerprint)
                .map(|e| e.result.clone()),
            Backend::Sqlite(pool) => {
                let row: std::result::Result<Option<String>, sqlx::Error> =
                    sqlx::query_scalar("SELECT result FROM result_cache WHERE fingerprint = ?")
                        .bind(fingerprint)
                        .fetch_optional(pool)
                        .await;
                match row {
                    Ok(Some(text)) => match serde_json::from_str(&text) {
                        Ok(value) => Some(value),
                        Err(e) => {
                            tracing::warn!(fingerprint, error = %e, "Corrupt cache entry ignored");
                            None
                        }
                    },
                    Ok(None) => None,
                    Err(e) => {
                        tracing::warn!(fingerprint, error = %e, "Cache lookup failed");
                        None
                    }
                }
            }
        }
    }

    /// Store a result and evict the oldest entries beyond capacity
    pub async fn put(&self, fingerprint: &str, mut result: Value, summary: &str) -> Result<()> {
        let stripped = strip_source_bytes(&mut result);
        let cached_at = Utc::now();

        match &self.backend {
            Backend::Memory(entries) => {
                let mut entries = entries.lock().await;
                entries.retain(|e| e.fingerprint != fingerprint);
                entries.push(CacheEntry {
                    fingerprint: fingerprint.to_string(),
                    result,
                    summary: summary.to_string(),
                    cached_at,
                });
                let excess = entries.len().saturating_sub(self.max_entries);
                entries.drain(..excess);
            }
            Backend::Sqlite(pool) => {
                let text = serde_json::to_string(&result)?;
                let cached_at = cached_at.to_rfc3339_opts(SecondsFormat::Nanos, true);
                let max_entries = self.max_entries as i64;

                retry_on_lock("cache_put", DEFAULT_MAX_LOCK_WAIT_MS, || async {
                    let mut tx = pool.begin().await?;
                    sqlx::query(
                        "INSERT OR REPLACE INTO result_cache (fingerprint, result, summary, cached_at) \
                         VALUES (?, ?, ?, ?)",
                    )
                    .bind(fingerprint)
                    .bind(&text)
                    .bind(summary)
                    .bind(&cached_at)
                    .execute(&mut *tx)
                    .await?;

                    sqlx::query(
                        r#"
                        DELETE FROM result_cache WHERE fingerprint IN (
                            SELECT fingerprint FROM result_cache
                            ORDER BY cached_at DESC, rowid DESC
                            LIMIT -1 OFFSET ?
                        )
                        "#,
                    )
                    .bind(max_entries)
                    .execute(&mut *tx)
                    .await?;

                    tx.commit().await?;
                    Ok(())
                })
                .await?;
            }
        }

        tracing::debug!(fingerprint, stripped, summary, "Result cached");
        Ok(())
    }

    /// Entries, newest first
    pub async fn entries(&self) -> Result<Vec<CacheEntry>> {
        match &self.backend {
            Backend::Memory(entries) => Ok(entries.lock().await.iter().rev().cloned().collect()),
            Backend::Sqlite(pool) => {
                let rows: Vec<(String, String, String, String)> = sqlx::query_as(
                    "SELECT fingerprint, result, summary, cached_at FROM result_cache \
                     ORDER BY cached_at DESC, rowid DESC",
                )
                .fetch_all(pool)
                .await?;

                rows.into_iter()
                    .map(|(fingerprint, result, summary, cached_at)| -> Result<CacheEntry> {
                        let cached_at = DateTime::parse_from_rfc3339(&cached_at)
                            .map_err(|e| {
                                sitecheck_common::Error::Internal(format!(
                                    "Failed to parse cached_at: {}",
                                    e
                                ))
                            })?
                            .with_timezone(&Utc);
                        Ok(CacheEntry {
                            fingerprint,
                            result: serde_json::from_str(&result)?,
                            summary,
                            cached_at,
                        })
                    })
                    .collect()
            }
        }
    }

    pub async fn len(&self) -> Result<usize> {
        match &self.backend {
            Backend::Memory(entries) => Ok(entries.lock().await.len()),
            Backend::Sqlite(pool) => {
                let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM result_cache")
                    .fetch_one(pool)
                    .await?;
                Ok(count as usize)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DepthMode;
    use serde_json::json;

    fn files() -> Vec<InputFile> {
        vec![
            InputFile::from_bytes("a.ifc", vec![1; 10]),
            InputFile::from_bytes("b.ifc", vec![2; 20]),
            InputFile::from_bytes("boq.csv", vec![3; 5]),
        ]
    }

    #[test]
    fn test_fingerprint_ignores_upload_order() {
        let options = RunOptions::default();
        let mut reversed = files();
        reversed.reverse();
        assert_eq!(
            compute_fingerprint(&files(), &options),
            compute_fingerprint(&reversed, &options)
        );
    }

    #[test]
    fn test_fingerprint_depends_on_size_and_options() {
        let options = RunOptions::default();
        let base = compute_fingerprint(&files(), &options);

        let mut resized = files();
        resized[0] = InputFile::from_bytes("a.ifc", vec![1; 11]);
        assert_ne!(base, compute_fingerprint(&resized, &options));

        let deep = RunOptions::with_depth(DepthMode::Deep);
        assert_ne!(base, compute_fingerprint(&files(), &deep));

        let forced = RunOptions {
            force_refresh: true,
            ..RunOptions::default()
        };
        assert_eq!(base, compute_fingerprint(&files(), &forced));
        assert_eq!(base.len(), 64);
    }

    #[test]
    fn test_fingerprint_detects_same_size_edit() {
        let options = RunOptions::default();
        let original = vec![InputFile::from_bytes("m.ifc", b"#1=IFCWALL('a');".to_vec())];
        let edited = vec![InputFile::from_bytes("m.ifc", b"#1=IFCSLAB('a');".to_vec())];
        assert_eq!(original[0].size, edited[0].size);
        assert_ne!(
            compute_fingerprint(&original, &options),
            compute_fingerprint(&edited, &options)
        );
        assert_eq!(
            compute_fingerprint(&original, &options),
            compute_fingerprint(
                &[InputFile::from_bytes("m.ifc", b"#1=IFCWALL('a');".to_vec())],
                &options
            )
        );
    }

    #[test]
    fn test_summary() {
        assert_eq!(
            summarize(&files(), &RunOptions::default()),
            "3 files (a.ifc, b.ifc, boq.csv), depth=standard"
        );
    }

    fn result_with_bytes() -> Value {
        json!({"source_files": [{"name": "a.ifc", "size": 3, "data": "AAEC"}], "ok": true})
    }

    #[tokio::test]
    async fn test_memory_put_strips_and_evicts_oldest() {
        let cache = ResultCache::in_memory(2);
        cache.put("fp1", result_with_bytes(), "one").await.unwrap();
        cache.put("fp2", json!({}), "two").await.unwrap();
        cache.put("fp3", json!({}), "three").await.unwrap();

        assert!(cache.get("fp1").await.is_none());
        assert!(cache.get("fp3").await.is_some());
        assert_eq!(cache.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_put_strips_and_evicts_oldest() {
        let pool = crate::db::connect("sqlite::memory:").await.unwrap();
        let cache = ResultCache::with_pool(pool, 2);
        assert!(cache.is_persistent());

        cache.put("fp1", result_with_bytes(), "one").await.unwrap();
        let stored = cache.get("fp1").await.unwrap();
        assert!(stored["source_files"][0]["data"].is_null());
        assert_eq!(stored["ok"], true);

        cache.put("fp2", json!({}), "two").await.unwrap();
        cache.put("fp3", json!({}), "three").await.unwrap();

        assert!(cache.get("fp1").await.is_none());
        let fingerprints: Vec<String> = cache
            .entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.fingerprint)
            .collect();
        assert_eq!(fingerprints, vec!["fp3", "fp2"]);
    }

    #[tokio::test]
    async fn test_open_falls_back_to_memory() {
        let dir = tempfile::TempDir::new().unwrap();
        // A directory cannot be opened as a database file
        let cache = ResultCache::open(dir.path(), 5).await;
        assert!(!cache.is_persistent());
        cache.put("fp", json!({"x": 1}), "s").await.unwrap();
        assert_eq!(cache.get("fp").await, Some(json!({"x": 1})));
    }
}
