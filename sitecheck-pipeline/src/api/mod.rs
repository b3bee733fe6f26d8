//! HTTP API handlers
//!
//! REST endpoints for job submission and polling plus SSE progress streams.

pub mod cache;
pub mod health;
pub mod jobs;
pub mod sse;

pub use cache::cache_routes;
pub use health::health_routes;
pub use jobs::job_routes;
pub use sse::{event_stream, job_event_stream};
