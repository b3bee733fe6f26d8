//! Server-Sent Events for pipeline progress

use super::jobs::load_job;
use crate::error::ApiResult;
use crate::models::{JobStatus, PipelineJob};
use crate::AppState;
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde_json::Value;
use sitecheck_common::events::PipelineEvent;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

fn to_sse(event: &PipelineEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event.event_type()).data(json)),
        Err(e) => {
            warn!("SSE: Failed to serialize event {}: {}", event.event_type(), e);
            None
        }
    }
}

/// GET /events - every pipeline event
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to pipeline events");
    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(sse) = to_sse(&event) {
                        yield Ok(sse);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("SSE: client lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

/// Terminal event replayed to a client that subscribes after the job ended
fn terminal_event(job: &PipelineJob) -> Option<PipelineEvent> {
    let timestamp = job.completed_at.unwrap_or(job.updated_at);
    match job.status {
        JobStatus::Completed => Some(PipelineEvent::JobCompleted {
            job_id: job.job_id,
            from_cache: job
                .result
                .as_ref()
                .and_then(|r| r.get("from_cache"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            warning_count: job.warnings.len(),
            timestamp,
        }),
        JobStatus::Failed => Some(PipelineEvent::JobFailed {
            job_id: job.job_id,
            error: job.error.clone().unwrap_or_default(),
            timestamp,
        }),
        _ => None,
    }
}

/// GET /jobs/:id/events - events of one job, closed after its terminal event
///
/// A job that already finished gets its terminal event once and the stream
/// closes.
pub async fn job_event_stream(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // Subscribe before loading so a run finishing in between is not missed
    let mut rx = state.event_bus.subscribe();
    let finished = terminal_event(&load_job(&state, job_id).await?);
    info!(job_id = %job_id, finished = finished.is_some(), "New SSE client connected to job events");

    let stream = async_stream::stream! {
        if let Some(event) = finished {
            if let Some(sse) = to_sse(&event) {
                yield Ok(sse);
            }
            return;
        }
        loop {
            match rx.recv().await {
                Ok(event) if event.job_id() == job_id => {
                    let terminal = matches!(
                        event,
                        PipelineEvent::JobCompleted { .. } | PipelineEvent::JobFailed { .. }
                    );
                    if let Some(sse) = to_sse(&event) {
                        yield Ok(sse);
                    }
                    if terminal {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(job_id = %job_id, "SSE: client lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    ))
}
