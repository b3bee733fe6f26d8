//! Event types for the sitecheck event system
//!
//! Progress of every pipeline run is broadcast on an [`EventBus`] so that
//! SSE clients can follow a job without polling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline event types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Job accepted and queued
    JobSubmitted {
        job_id: Uuid,
        file_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Stage-level progress update
    StageProgress {
        job_id: Uuid,
        stage: String,
        /// Overall job percentage (0.0 - 100.0)
        percent: f64,
        message: String,
        stages_completed: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// Job finished with a result
    JobCompleted {
        job_id: Uuid,
        from_cache: bool,
        warning_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Job terminated with an error
    JobFailed {
        job_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::JobSubmitted { .. } => "JobSubmitted",
            PipelineEvent::StageProgress { .. } => "StageProgress",
            PipelineEvent::JobCompleted { .. } => "JobCompleted",
            PipelineEvent::JobFailed { .. } => "JobFailed",
        }
    }

    /// Job this event belongs to
    pub fn job_id(&self) -> Uuid {
        match self {
            PipelineEvent::JobSubmitted { job_id, .. }
            | PipelineEvent::StageProgress { job_id, .. }
            | PipelineEvent::JobCompleted { job_id, .. }
            | PipelineEvent::JobFailed { job_id, .. } => *job_id,
        }
    }
}

/// Broadcast bus for [`PipelineEvent`]s
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
