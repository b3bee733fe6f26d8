//! Final result of a pipeline run

use super::artifacts::ArtifactSet;
use super::options::DepthMode;
use super::project::ProjectRecord;
use super::stage::StageId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};
use uuid::Uuid;

/// Input/output unit counts reported by the reasoning service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: TokenUsage) {
        *self = *self + rhs;
    }
}

/// Uploaded file as carried in the result
///
/// `data` holds the raw bytes; it is stripped before a result is cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub size: u64,
    #[serde(default, with = "crate::serializer::base64_bytes_opt")]
    pub data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub job_id: Uuid,
    pub project: ProjectRecord,
    pub artifacts: ArtifactSet,
    pub warnings: Vec<String>,
    pub stage_order: Vec<StageId>,
    pub stages_completed: Vec<StageId>,
    pub skipped_stages: Vec<StageId>,
    pub depth: DepthMode,
    pub token_usage: TokenUsage,
    pub stage_usage: BTreeMap<StageId, TokenUsage>,
    pub source_files: Vec<SourceFile>,
    pub fingerprint: String,
    pub from_cache: bool,
    pub duration_ms: u64,
}
