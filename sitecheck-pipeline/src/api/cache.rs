//! Result cache inspection

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{error::ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct CacheEntrySummary {
    pub fingerprint: String,
    pub summary: String,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CacheListResponse {
    pub persistent: bool,
    pub max_entries: usize,
    pub entries: Vec<CacheEntrySummary>,
}

/// GET /cache - cached results, newest first (without the result bodies)
pub async fn list_cache(State(state): State<AppState>) -> ApiResult<Json<CacheListResponse>> {
    let entries = state
        .cache
        .entries()
        .await?
        .into_iter()
        .map(|e| CacheEntrySummary {
            fingerprint: e.fingerprint,
            summary: e.summary,
            cached_at: e.cached_at,
        })
        .collect();

    Ok(Json(CacheListResponse {
        persistent: state.cache.is_persistent(),
        max_entries: state.cache.max_entries(),
        entries,
    }))
}

pub fn cache_routes() -> Router<AppState> {
    Router::new().route("/cache", get(list_cache))
}
