//! Data models for the pipeline

pub mod artifacts;
pub mod files;
pub mod findings;
pub mod job;
pub(crate) mod lenient;
pub mod options;
pub mod project;
pub mod result;
pub mod sequence;
pub mod stage;

pub use artifacts::{Artifact, ArtifactKind, ArtifactSet};
pub use files::{FileContent, InputFile};
pub use findings::{Severity, ValidationFinding};
pub use job::{JobStatus, JobUpdate, PipelineJob, StageProgress};
pub use options::{DepthMode, RunOptions};
pub use project::{BoqItem, BuildingElement, DocumentNote, ProjectRecord, QuantityLine};
pub use result::{PipelineResult, SourceFile, TokenUsage};
pub use sequence::{ConstructionPhase, RawStep, Sequence, Step};
pub use stage::{StageId, STAGE_WEIGHTS};
