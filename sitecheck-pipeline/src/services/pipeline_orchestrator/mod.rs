//! Pipeline orchestrator
//!
//! Drives one job through its run:
//! cache lookup → classification → stages in plan order → cache → completion.
//!
//! Stages run strictly one after another on the job's task. The only overlap
//! is the background review, spawned once prices are known and joined at its
//! own position in the plan. A stage that errors or panics becomes a warning;
//! only an empty batch or an unencodable result fails the job.

mod stage_plan;

pub use stage_plan::StagePlan;

use crate::cache::{compute_fingerprint, summarize, ResultCache};
use crate::classifier::{classify, ClassifiedFiles};
use crate::jobs::JobStore;
use crate::models::{
    ArtifactSet, FileContent, InputFile, JobUpdate, PipelineJob, PipelineResult, ProjectRecord,
    RunOptions, SourceFile, StageId, TokenUsage,
};
use crate::progress::ProgressReporter;
use crate::serializer::{from_transport, to_transport};
use crate::stages::{Stage, StageInput, StageOutput, StageRegistry};
use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use sitecheck_common::events::{EventBus, PipelineEvent};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Failures that end a run without a result
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No files to process")]
    NothingToProcess,

    #[error("Job record could not be created: {0}")]
    JobCreation(String),

    #[error("Result could not be encoded: {0}")]
    Encoding(String),
}

/// Stage outcome with errors and panics flattened to a message
type StageResult = Result<StageOutput, String>;

/// Mutable state of one run, owned by the job task
struct RunState {
    job_id: Uuid,
    project: Arc<ProjectRecord>,
    files: Arc<ClassifiedFiles>,
    options: RunOptions,
    cancel: CancellationToken,
    artifacts: ArtifactSet,
    warnings: Vec<String>,
    skipped: Vec<StageId>,
    token_usage: TokenUsage,
    stage_usage: BTreeMap<StageId, TokenUsage>,
    reporter: ProgressReporter,
    background: Vec<BackgroundStage>,
}

impl RunState {
    fn input_for(&self, stage: &dyn Stage) -> StageInput {
        StageInput {
            job_id: self.job_id,
            project: Arc::clone(&self.project),
            files: Arc::clone(&self.files),
            artifacts: self.artifacts.subset(stage.dependencies()),
            options: self.options.clone(),
            cancel: self.cancel.clone(),
            progress: self.reporter.stage_handle(stage.id()),
        }
    }
}

/// Spawned background stage, aborted if dropped before it is joined
///
/// Dropping the run future drops the run state and with it every task still
/// in flight, so no background stage outlives its run.
struct BackgroundStage {
    stage: StageId,
    handle: JoinHandle<StageResult>,
}

impl BackgroundStage {
    fn spawn(stage: Arc<dyn Stage>, input: StageInput) -> Self {
        Self {
            stage: stage.id(),
            handle: tokio::spawn(execute(stage, input)),
        }
    }

    async fn join(mut self) -> StageResult {
        (&mut self.handle)
            .await
            .unwrap_or_else(|e| Err(e.to_string()))
    }
}

impl Drop for BackgroundStage {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Run a stage inside the failure boundary
async fn execute(stage: Arc<dyn Stage>, input: StageInput) -> StageResult {
    match AssertUnwindSafe(stage.run(input)).catch_unwind().await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}

/// Project name from the options, else the first model file's stem
fn project_name(files: &ClassifiedFiles, options: &RunOptions) -> String {
    options
        .project_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .or_else(|| {
            files.models.first().and_then(|f| {
                Path::new(&f.name)
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
            })
        })
        .unwrap_or_else(|| "Untitled project".to_string())
}

fn source_files(files: &[InputFile]) -> Vec<SourceFile> {
    files
        .iter()
        .map(|f| SourceFile {
            name: f.name.clone(),
            size: f.size,
            data: match &f.content {
                FileContent::Bytes(bytes) => Some(bytes.as_ref().clone()),
                FileContent::Path(_) => None,
            },
        })
        .collect()
}

/// Coordinates stage execution, progress, caching and job records
pub struct PipelineOrchestrator {
    registry: StageRegistry,
    jobs: Arc<dyn JobStore>,
    cache: Arc<ResultCache>,
    event_bus: EventBus,
    shutdown: CancellationToken,
    /// Cancellation tokens of submitted runs still in flight
    active: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl PipelineOrchestrator {
    pub fn new(
        registry: StageRegistry,
        jobs: Arc<dyn JobStore>,
        cache: Arc<ResultCache>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            registry,
            jobs,
            cache,
            event_bus,
            shutdown: CancellationToken::new(),
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Parent token of every submitted run
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Create the job record and run the pipeline on its own task
    pub async fn submit(
        self: &Arc<Self>,
        files: Vec<InputFile>,
        options: RunOptions,
    ) -> Result<PipelineJob, PipelineError> {
        let file_names = files.iter().map(|f| f.name.clone()).collect();
        let job = self
            .jobs
            .create(file_names, options.clone())
            .await
            .map_err(|e| PipelineError::JobCreation(e.to_string()))?;

        self.event_bus.emit_lossy(PipelineEvent::JobSubmitted {
            job_id: job.job_id,
            file_count: files.len(),
            timestamp: Utc::now(),
        });

        let orchestrator = Arc::clone(self);
        let job_id = job.job_id;
        let cancel = self.shutdown.child_token();
        self.active.write().await.insert(job_id, cancel.clone());
        tokio::spawn(async move {
            if let Err(e) = orchestrator.run(job_id, files, options, cancel).await {
                tracing::warn!(job_id = %job_id, error = %e, "Pipeline run failed");
            }
            orchestrator.active.write().await.remove(&job_id);
        });

        Ok(job)
    }

    /// Request cancellation of a submitted run
    ///
    /// Stages not yet started fail with "cancelled"; the job still completes
    /// with whatever was produced. Returns false when the run is not in flight.
    pub async fn cancel(&self, job_id: Uuid) -> bool {
        match self.active.read().await.get(&job_id) {
            Some(token) => {
                tracing::info!(job_id = %job_id, "Cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of submitted runs still in flight
    pub async fn active_runs(&self) -> usize {
        self.active.read().await.len()
    }

    /// Execute a run for an existing job record
    pub async fn run(
        &self,
        job_id: Uuid,
        files: Vec<InputFile>,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        let started = Instant::now();
        tracing::info!(
            job_id = %job_id,
            files = files.len(),
            depth = %options.depth,
            "Starting pipeline run"
        );

        if files.is_empty() {
            let err = PipelineError::NothingToProcess;
            self.fail_job(job_id, &err).await;
            return Err(err);
        }

        let fingerprint = compute_fingerprint(&files, &options);
        if !options.force_refresh {
            if let Some(mut result) = self.cached_result(job_id, &fingerprint).await {
                result.duration_ms = started.elapsed().as_millis() as u64;
                let transport = match to_transport(&result) {
                    Ok(value) => value,
                    Err(e) => {
                        let err = PipelineError::Encoding(e.to_string());
                        self.fail_job(job_id, &err).await;
                        return Err(err);
                    }
                };
                tracing::info!(job_id = %job_id, fingerprint = %fingerprint, "Served from cache");
                self.complete_job(job_id, transport, true, result.warnings.len())
                    .await;
                return Ok(result);
            }
        }

        let classified = classify(&files);
        tracing::info!(job_id = %job_id, files = %classified.summary(), "Files classified");

        let mut state = RunState {
            job_id,
            project: Arc::new(ProjectRecord::new(project_name(&classified, &options))),
            files: Arc::new(classified),
            options: options.clone(),
            cancel,
            artifacts: ArtifactSet::new(),
            warnings: Vec::new(),
            skipped: Vec::new(),
            token_usage: TokenUsage::default(),
            stage_usage: BTreeMap::new(),
            reporter: ProgressReporter::new(job_id, self.event_bus.clone()),
            background: Vec::new(),
        };

        if !state.files.has_typed_input() {
            let warning = format!(
                "None of the {} uploaded files has a recognised type; nothing to analyse",
                files.len()
            );
            state.warnings.push(warning.clone());
            self.persist(job_id, JobUpdate::new().warnings(vec![warning]))
                .await;
        }

        let plan = StagePlan::for_depth(options.depth);
        for &stage_id in plan.stages() {
            self.run_stage(&mut state, stage_id).await;
        }
        // Background stages outside the plan are still joined exactly once
        for background in std::mem::take(&mut state.background) {
            let stage_id = background.stage;
            let outcome = background.join().await;
            self.record(&mut state, stage_id, outcome).await;
        }

        tracing::info!(
            job_id = %job_id,
            input_tokens = state.token_usage.input_tokens,
            output_tokens = state.token_usage.output_tokens,
            "Token usage"
        );

        let result = PipelineResult {
            job_id,
            project: (*state.project).clone(),
            artifacts: state.artifacts,
            warnings: state.warnings,
            stage_order: plan.stages().to_vec(),
            stages_completed: state.reporter.completed().to_vec(),
            skipped_stages: state.skipped,
            depth: options.depth,
            token_usage: state.token_usage,
            stage_usage: state.stage_usage,
            source_files: source_files(&files),
            fingerprint: fingerprint.clone(),
            from_cache: false,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        let transport = match to_transport(&result) {
            Ok(value) => value,
            Err(e) => {
                let err = PipelineError::Encoding(e.to_string());
                self.fail_job(job_id, &err).await;
                return Err(err);
            }
        };

        if let Err(e) = self
            .cache
            .put(&fingerprint, transport.clone(), &summarize(&files, &options))
            .await
        {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to cache result");
        }
        self.complete_job(job_id, transport, false, result.warnings.len())
            .await;

        tracing::info!(
            job_id = %job_id,
            duration_ms = result.duration_ms,
            warnings = result.warnings.len(),
            skipped = result.skipped_stages.len(),
            "Pipeline run completed"
        );
        Ok(result)
    }

    async fn cached_result(&self, job_id: Uuid, fingerprint: &str) -> Option<PipelineResult> {
        let value = self.cache.get(fingerprint).await?;
        match from_transport(value) {
            Ok(mut result) => {
                result.job_id = job_id;
                result.from_cache = true;
                Some(result)
            }
            Err(e) => {
                tracing::warn!(fingerprint, error = %e, "Cached result unreadable, running pipeline");
                None
            }
        }
    }

    async fn run_stage(&self, state: &mut RunState, stage_id: StageId) {
        let Some(stage) = self.registry.get(stage_id) else {
            tracing::warn!(job_id = %state.job_id, stage = %stage_id, "No strategy registered");
            state.skipped.push(stage_id);
            self.complete_stage(state, stage_id, Vec::new(), "Skipped: no strategy")
                .await;
            return;
        };

        if let Some(pos) = state.background.iter().position(|b| b.stage == stage_id) {
            let background = state.background.remove(pos);
            tracing::debug!(job_id = %state.job_id, stage = %stage_id, "Joining background stage");
            let outcome = background.join().await;
            self.record(state, stage_id, outcome).await;
            return;
        }

        let start = state.reporter.report(stage_id, stage_id.label());
        self.persist(
            state.job_id,
            JobUpdate::new()
                .stage(stage_id)
                .progress(start.percent)
                .stage_progress(stage_id, 0.0, stage_id.label()),
        )
        .await;

        let input = state.input_for(stage.as_ref());
        if !stage.has_input(&input) {
            tracing::info!(job_id = %state.job_id, stage = %stage_id, "Stage skipped: no input");
            state.skipped.push(stage_id);
            self.complete_stage(state, stage_id, Vec::new(), "Skipped: no input")
                .await;
            return;
        }

        let outcome = if state.cancel.is_cancelled() {
            Err("cancelled".to_string())
        } else {
            execute(stage, input).await
        };
        let succeeded = self.record(state, stage_id, outcome).await;

        if succeeded {
            for background in StagePlan::launched_by(stage_id) {
                self.launch_background(state, background);
            }
        }
    }

    /// Spawn a background stage; a non-viable one is left for its inline slot
    fn launch_background(&self, state: &mut RunState, stage_id: StageId) {
        let Some(stage) = self.registry.get(stage_id) else {
            return;
        };
        let input = state.input_for(stage.as_ref());
        if !stage.has_input(&input) {
            return;
        }
        tracing::debug!(job_id = %state.job_id, stage = %stage_id, "Launching background stage");
        state.background.push(BackgroundStage::spawn(stage, input));
    }

    /// Fold a stage outcome into the run and mark the stage complete
    async fn record(&self, state: &mut RunState, stage_id: StageId, outcome: StageResult) -> bool {
        let (succeeded, warnings) = match outcome {
            Ok(output) => {
                if let Some(project) = output.project {
                    state.project = Arc::new(project);
                }
                for artifact in output.artifacts {
                    state.artifacts.insert(artifact);
                }
                if !output.token_usage.is_zero() {
                    state.token_usage += output.token_usage;
                    state.stage_usage.insert(stage_id, output.token_usage);
                }
                (true, output.warnings)
            }
            Err(message) => {
                tracing::warn!(
                    job_id = %state.job_id,
                    stage = %stage_id,
                    error = %message,
                    "Stage failed"
                );
                (false, vec![format!("{} failed: {}", stage_id, message)])
            }
        };

        state.warnings.extend(warnings.iter().cloned());
        let message = if succeeded { "Complete" } else { "Failed" };
        self.complete_stage(state, stage_id, warnings, message).await;
        succeeded
    }

    async fn complete_stage(
        &self,
        state: &mut RunState,
        stage_id: StageId,
        warnings: Vec<String>,
        message: &str,
    ) {
        let event = state.reporter.complete_stage(stage_id);
        self.persist(
            state.job_id,
            JobUpdate::new()
                .stage(stage_id)
                .progress(event.percent)
                .stage_progress(stage_id, 100.0, message)
                .completed(stage_id)
                .warnings(warnings),
        )
        .await;
    }

    async fn persist(&self, job_id: Uuid, update: JobUpdate) {
        if let Err(e) = self.jobs.update_progress(job_id, update).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to persist job progress");
        }
    }

    async fn complete_job(&self, job_id: Uuid, result: Value, from_cache: bool, warning_count: usize) {
        if let Err(e) = self.jobs.complete(job_id, result).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to store job result");
        }
        self.event_bus.emit_lossy(PipelineEvent::JobCompleted {
            job_id,
            from_cache,
            warning_count,
            timestamp: Utc::now(),
        });
    }

    async fn fail_job(&self, job_id: Uuid, err: &PipelineError) {
        tracing::error!(job_id = %job_id, error = %err, "Pipeline run failed");
        if let Err(e) = self.jobs.fail(job_id, &err.to_string()).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to record job failure");
        }
        self.event_bus.emit_lossy(PipelineEvent::JobFailed {
            job_id,
            error: err.to_string(),
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_name_precedence() {
        let files = classify(&[InputFile::from_bytes("Tower B.ifc", vec![])]);
        let mut options = RunOptions::default();
        assert_eq!(project_name(&files, &options), "Tower B");

        options.project_name = Some("  Harbour ".into());
        assert_eq!(project_name(&files, &options), "Harbour");

        let none = classify(&[InputFile::from_bytes("boq.csv", vec![])]);
        assert_eq!(project_name(&none, &RunOptions::default()), "Untitled project");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "panic: boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "panic: bang");
    }

    use std::sync::atomic::{AtomicBool, Ordering};

    /// Never finishes; flags when it starts and when its future is dropped
    struct Endless {
        started: Arc<AtomicBool>,
        dropped: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl Stage for Endless {
        fn id(&self) -> StageId {
            StageId::Review
        }

        fn has_input(&self, _input: &StageInput) -> bool {
            true
        }

        async fn run(&self, _input: StageInput) -> anyhow::Result<StageOutput> {
            let _guard = DropFlag(Arc::clone(&self.dropped));
            self.started.store(true, Ordering::SeqCst);
            std::future::pending::<()>().await;
            Ok(StageOutput::new())
        }
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    async fn wait_for(flag: &AtomicBool) -> bool {
        for _ in 0..200 {
            if flag.load(Ordering::SeqCst) {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_dropped_background_stage_is_aborted() {
        let started = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicBool::new(false));
        let stage: Arc<dyn Stage> = Arc::new(Endless {
            started: Arc::clone(&started),
            dropped: Arc::clone(&dropped),
        });
        let input = StageInput::detached(StageId::Review, ProjectRecord::new("Test"), classify(&[]));

        let background = BackgroundStage::spawn(stage, input);
        assert!(wait_for(&started).await);
        assert!(!dropped.load(Ordering::SeqCst));

        drop(background);
        assert!(wait_for(&dropped).await);
    }

    #[test]
    fn test_source_files_keep_in_memory_bytes() {
        let files = vec![InputFile::from_bytes("a.ifc", vec![1, 2, 3])];
        let sources = source_files(&files);
        assert_eq!(sources[0].data.as_deref(), Some(&[1u8, 2, 3][..]));
        assert_eq!(sources[0].size, 3);
    }
}
