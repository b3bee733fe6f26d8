//! Pipeline services

pub mod pipeline_orchestrator;

pub use pipeline_orchestrator::{PipelineError, PipelineOrchestrator, StagePlan};
