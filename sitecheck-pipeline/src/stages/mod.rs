//! Stage strategies
//!
//! Each of the eleven pipeline stages is a [`Stage`] registered in a
//! [`StageRegistry`] under its [`StageId`]. The orchestrator owns ordering,
//! progress and failure handling; a stage only transforms its input.

pub mod boq_parse;
pub mod compliance;
pub mod document_context;
pub mod exports;
pub mod ifc;
pub mod model_parse;
pub mod price_matching;
pub mod quantity_takeoff;
pub mod review;
pub mod scheduling;
pub mod sequencing;

use crate::ai::ReasoningClient;
use crate::classifier::ClassifiedFiles;
use crate::models::{
    Artifact, ArtifactKind, ArtifactSet, ProjectRecord, RunOptions, StageId, TokenUsage,
};
use crate::progress::StageProgressHandle;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Everything a stage may read
///
/// `artifacts` holds only the kinds the stage declared as dependencies.
#[derive(Debug, Clone)]
pub struct StageInput {
    pub job_id: Uuid,
    pub project: Arc<ProjectRecord>,
    pub files: Arc<ClassifiedFiles>,
    pub artifacts: ArtifactSet,
    pub options: RunOptions,
    pub cancel: CancellationToken,
    pub progress: StageProgressHandle,
}

impl StageInput {
    /// Standalone input for running a single stage
    pub fn detached(stage: StageId, project: ProjectRecord, files: ClassifiedFiles) -> Self {
        Self {
            job_id: Uuid::nil(),
            project: Arc::new(project),
            files: Arc::new(files),
            artifacts: ArtifactSet::new(),
            options: RunOptions::default(),
            cancel: CancellationToken::new(),
            progress: StageProgressHandle::detached(stage),
        }
    }

    pub fn with_artifacts(mut self, artifacts: ArtifactSet) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }
}

/// What a stage hands back
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    /// Whole replacement for the project record (never a partial patch)
    pub project: Option<ProjectRecord>,
    pub artifacts: Vec<Artifact>,
    pub warnings: Vec<String>,
    pub token_usage: TokenUsage,
}

impl StageOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, project: ProjectRecord) -> Self {
        self.project = Some(project);
        self
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.token_usage = usage;
        self
    }
}

/// One unit of pipeline work
///
/// `run` may fail or even panic; the orchestrator turns either into a
/// warning and moves on.
#[async_trait]
pub trait Stage: Send + Sync {
    fn id(&self) -> StageId;

    /// Artifact kinds copied into `StageInput::artifacts`
    fn dependencies(&self) -> &'static [ArtifactKind] {
        &[]
    }

    /// False when there is nothing for this stage to work on (stage is skipped)
    fn has_input(&self, input: &StageInput) -> bool;

    async fn run(&self, input: StageInput) -> anyhow::Result<StageOutput>;
}

/// Static table of stage strategies keyed by id
#[derive(Clone, Default)]
pub struct StageRegistry {
    stages: HashMap<StageId, Arc<dyn Stage>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All eleven built-in strategies
    ///
    /// Without a reasoning client, sequencing and review fall back to
    /// deterministic heuristics.
    pub fn builtin(client: Option<Arc<dyn ReasoningClient>>, max_output_tokens: u32) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(model_parse::ModelParseStage));
        registry.register(Arc::new(quantity_takeoff::QuantityTakeoffStage));
        registry.register(Arc::new(compliance::ComplianceCheckStage::new()));
        registry.register(Arc::new(sequencing::SequencingStage::new(
            client.clone(),
            max_output_tokens,
        )));
        registry.register(Arc::new(document_context::DocumentContextStage));
        registry.register(Arc::new(boq_parse::BoqParseStage));
        registry.register(Arc::new(price_matching::PriceMatchingStage::new()));
        registry.register(Arc::new(scheduling::SchedulingStage));
        registry.register(Arc::new(exports::SpreadsheetExportStage));
        registry.register(Arc::new(exports::XmlExportStage));
        registry.register(Arc::new(review::ReviewStage::new(client)));
        registry
    }

    /// Add or replace the strategy for `stage.id()`
    pub fn register(&mut self, stage: Arc<dyn Stage>) -> &mut Self {
        self.stages.insert(stage.id(), stage);
        self
    }

    pub fn get(&self, id: StageId) -> Option<Arc<dyn Stage>> {
        self.stages.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
