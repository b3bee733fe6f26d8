//! Pipeline job state machine
//!
//! A job progresses `pending → running → completed | failed`:
//! - created `pending` at submission
//! - the first progress update moves it to `running` (`started_at` set once)
//! - exactly one terminal transition; terminal jobs ignore further updates
//!
//! `progress` never decreases and `stages_completed` never shrinks.

use super::options::RunOptions;
use super::stage::StageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("Unknown job status: {}", other)),
        }
    }
}

/// Sub-progress of a single stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageProgress {
    /// Stage-local percentage (0.0 - 100.0)
    pub percent: f64,
    pub message: String,
}

/// One record per pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineJob {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub current_stage: Option<StageId>,
    /// Overall percentage (0.0 - 100.0)
    pub progress: f64,
    pub stage_progress: BTreeMap<StageId, StageProgress>,
    pub stages_completed: Vec<StageId>,
    pub file_names: Vec<String>,
    pub options: RunOptions,
    /// Transport form of the `PipelineResult`
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Partial update applied by `JobStore::update_progress`
///
/// Every field is optional; supplied fields are merged, absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub current_stage: Option<StageId>,
    /// Lower values than the stored one are ignored
    pub progress: Option<f64>,
    pub stage_progress: Option<(StageId, StageProgress)>,
    /// Appended to `stages_completed` unless already present
    pub stage_completed: Option<StageId>,
    /// Appended to the warnings log
    pub warnings: Vec<String>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: StageId) -> Self {
        self.current_stage = Some(stage);
        self
    }

    pub fn progress(mut self, percent: f64) -> Self {
        self.progress = Some(percent);
        self
    }

    pub fn stage_progress(mut self, stage: StageId, percent: f64, message: impl Into<String>) -> Self {
        self.stage_progress = Some((
            stage,
            StageProgress {
                percent: percent.clamp(0.0, 100.0),
                message: message.into(),
            },
        ));
        self
    }

    pub fn completed(mut self, stage: StageId) -> Self {
        self.stage_completed = Some(stage);
        self
    }

    pub fn warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

impl PipelineJob {
    /// Create new job in `pending`
    pub fn new(file_names: Vec<String>, options: RunOptions) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            status: JobStatus::Pending,
            current_stage: None,
            progress: 0.0,
            stage_progress: BTreeMap::new(),
            stages_completed: Vec::new(),
            file_names,
            options,
            result: None,
            error: None,
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge a partial update. Returns false (and changes nothing) for terminal jobs.
    pub fn apply_update(&mut self, update: &JobUpdate, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }

        if self.status == JobStatus::Pending {
            self.status = JobStatus::Running;
            self.started_at = Some(now);
        }

        if let Some(stage) = update.current_stage {
            self.current_stage = Some(stage);
        }
        if let Some(progress) = update.progress {
            self.progress = self.progress.max(progress.clamp(0.0, 100.0));
        }
        if let Some((stage, sub)) = &update.stage_progress {
            self.stage_progress.insert(*stage, sub.clone());
        }
        if let Some(stage) = update.stage_completed {
            if !self.stages_completed.contains(&stage) {
                self.stages_completed.push(stage);
            }
        }
        self.warnings.extend(update.warnings.iter().cloned());
        self.updated_at = now;
        true
    }

    /// Terminal transition into `completed`. Returns false if already terminal.
    pub fn complete(&mut self, result: serde_json::Value, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.status = JobStatus::Completed;
        self.progress = 100.0;
        self.current_stage = None;
        self.result = Some(result);
        self.updated_at = now;
        self.completed_at = Some(now);
        true
    }

    /// Terminal transition into `failed`. Returns false if already terminal.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = now;
        self.completed_at = Some(now);
        true
    }
}
