//! Weighted progress reporting
//!
//! Overall progress is the sum of the weights of completed stages plus a
//! fraction of the running stage's weight. Every event is broadcast on the
//! [`EventBus`] and handed back to the caller for persistence.
//!
//! The reporter and every handle it gives out share one high-water mark, so
//! emitted percentages never decrease within a run, even when a background
//! stage reports from a base taken before later stages completed.

use crate::models::StageId;
use chrono::Utc;
use sitecheck_common::events::{EventBus, PipelineEvent};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Progress snapshot for one stage transition
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub stage: StageId,
    /// Overall percentage, never above 100
    pub percent: f64,
    pub message: String,
    pub stages_completed: Vec<StageId>,
}

impl ProgressEvent {
    fn to_pipeline_event(&self) -> PipelineEvent {
        PipelineEvent::StageProgress {
            job_id: self.job_id,
            stage: self.stage.to_string(),
            percent: self.percent,
            message: self.message.clone(),
            stages_completed: self.stages_completed.iter().map(|s| s.to_string()).collect(),
            timestamp: Utc::now(),
        }
    }
}

fn clamp_fraction(fraction: f64) -> f64 {
    if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Highest percentage emitted so far in a run
///
/// The lock is held across the broadcast so concurrent emitters publish in
/// percent order.
#[derive(Debug, Clone, Default)]
struct HighWater(Arc<Mutex<f64>>);

impl HighWater {
    fn publish(&self, event_bus: &EventBus, mut event: ProgressEvent) -> ProgressEvent {
        let mut high = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        event.percent = event.percent.clamp(0.0, 100.0).max(*high);
        *high = event.percent;
        event_bus.emit_lossy(event.to_pipeline_event());
        event
    }
}

/// Tracks cumulative weighted progress of one run
#[derive(Debug)]
pub struct ProgressReporter {
    job_id: Uuid,
    cumulative: f64,
    completed: Vec<StageId>,
    event_bus: EventBus,
    high_water: HighWater,
}

impl ProgressReporter {
    pub fn new(job_id: Uuid, event_bus: EventBus) -> Self {
        Self {
            job_id,
            cumulative: 0.0,
            completed: Vec::new(),
            event_bus,
            high_water: HighWater::default(),
        }
    }

    pub fn cumulative(&self) -> f64 {
        self.cumulative.min(100.0)
    }

    pub fn completed(&self) -> &[StageId] {
        &self.completed
    }

    /// Event at the current cumulative percentage. No state change.
    pub fn report(&self, stage: StageId, message: impl Into<String>) -> ProgressEvent {
        self.emit(stage, self.cumulative, message.into())
    }

    /// Event at `cumulative + weight × fraction`. No state change.
    ///
    /// `fraction` is clamped to `[0, 1]`. The emitted percentage is raised to
    /// the run's high-water mark when it would fall below it.
    pub fn report_partial(
        &self,
        stage: StageId,
        fraction: f64,
        message: impl Into<String>,
    ) -> ProgressEvent {
        let percent = self.cumulative + f64::from(stage.weight()) * clamp_fraction(fraction);
        self.emit(stage, percent, message.into())
    }

    /// Mark a stage complete and add its weight
    ///
    /// Not idempotent: completing the same stage twice counts its weight twice.
    /// Callers complete each stage exactly once.
    pub fn complete_stage(&mut self, stage: StageId) -> ProgressEvent {
        self.completed.push(stage);
        self.cumulative += f64::from(stage.weight());
        let message = format!("{} complete", stage.label());
        self.emit(stage, self.cumulative, message)
    }

    /// Sub-progress handle given to a running stage
    pub fn stage_handle(&self, stage: StageId) -> StageProgressHandle {
        StageProgressHandle {
            job_id: self.job_id,
            stage,
            base: self.cumulative,
            completed: self.completed.clone(),
            event_bus: self.event_bus.clone(),
            high_water: self.high_water.clone(),
        }
    }

    fn emit(&self, stage: StageId, percent: f64, message: String) -> ProgressEvent {
        self.high_water.publish(
            &self.event_bus,
            ProgressEvent {
                job_id: self.job_id,
                stage,
                percent,
                message,
                stages_completed: self.completed.clone(),
            },
        )
    }
}

/// Broadcast-only partial progress for the stage currently running
#[derive(Debug, Clone)]
pub struct StageProgressHandle {
    job_id: Uuid,
    stage: StageId,
    base: f64,
    completed: Vec<StageId>,
    event_bus: EventBus,
    high_water: HighWater,
}

impl StageProgressHandle {
    /// Detached handle for running a stage outside a job (tests, one-off calls)
    pub fn detached(stage: StageId) -> Self {
        Self {
            job_id: Uuid::nil(),
            stage,
            base: 0.0,
            completed: Vec::new(),
            event_bus: EventBus::new(1),
            high_water: HighWater::default(),
        }
    }

    pub fn stage(&self) -> StageId {
        self.stage
    }

    /// Report `fraction` of this stage done, returning the emitted percentage
    pub fn report(&self, fraction: f64, message: impl Into<String>) -> f64 {
        let percent = self.base + f64::from(self.stage.weight()) * clamp_fraction(fraction);
        self.high_water
            .publish(
                &self.event_bus,
                ProgressEvent {
                    job_id: self.job_id,
                    stage: self.stage,
                    percent,
                    message: message.into(),
                    stages_completed: self.completed.clone(),
                },
            )
            .percent
    }
}
