//! sitecheck-pipeline library interface
//!
//! Exposes the pipeline, its stores and the HTTP router for integration testing.

pub mod ai;
pub mod api;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod jobs;
pub mod models;
pub mod progress;
pub mod serializer;
pub mod services;
pub mod stages;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::cache::ResultCache;
use crate::context::ServiceContext;
use crate::jobs::JobStore;
use crate::services::PipelineOrchestrator;
use sitecheck_common::events::EventBus;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub cache: Arc<ResultCache>,
    pub orchestrator: Arc<PipelineOrchestrator>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub reasoning_enabled: bool,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(context: &ServiceContext) -> Self {
        Self {
            jobs: Arc::clone(&context.jobs),
            cache: Arc::clone(&context.cache),
            orchestrator: Arc::clone(&context.orchestrator),
            event_bus: context.event_bus.clone(),
            reasoning_enabled: context.settings.reasoning_enabled(),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::job_routes())
        .route("/jobs/:id/events", get(api::job_event_stream))
        .route("/events", get(api::event_stream))
        .merge(api::cache_routes())
        .merge(api::health_routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
