//! Run options supplied with a job submission

use serde::{Deserialize, Serialize};
use std::fmt;

/// Run-wide depth setting
///
/// Controls stage ordering and how much reasoning-service work is performed:
/// - `Quick`: no reasoning-service calls, heuristic sequencing only
/// - `Standard`: one generation call, declared stage order
/// - `Deep`: generate + validate + refine, document and tabular context pulled
///   ahead of sequencing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthMode {
    Quick,
    #[default]
    Standard,
    Deep,
}

impl DepthMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DepthMode::Quick => "quick",
            DepthMode::Standard => "standard",
            DepthMode::Deep => "deep",
        }
    }

    /// Whether this depth performs reasoning-service calls at all
    pub fn uses_reasoning(self) -> bool {
        !matches!(self, DepthMode::Quick)
    }
}

impl fmt::Display for DepthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for a single pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    pub depth: DepthMode,
    pub project_name: Option<String>,
    /// Rule set used by the compliance stage
    pub regulation_profile: String,
    /// Skip the cache lookup (the result is still cached afterwards)
    pub force_refresh: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            depth: DepthMode::Standard,
            project_name: None,
            regulation_profile: "generic".to_string(),
            force_refresh: false,
        }
    }
}

/// Subset of options that influence the result, in a fixed field order
#[derive(Serialize)]
struct FingerprintMaterial<'a> {
    depth: DepthMode,
    project_name: Option<&'a str>,
    regulation_profile: &'a str,
}

impl RunOptions {
    pub fn with_depth(depth: DepthMode) -> Self {
        Self {
            depth,
            ..Self::default()
        }
    }

    /// Canonical encoding of the result-relevant options
    ///
    /// `force_refresh` is excluded: it changes how a run is served, not what it produces.
    pub fn canonical_encoding(&self) -> String {
        let material = FingerprintMaterial {
            depth: self.depth,
            project_name: self.project_name.as_deref(),
            regulation_profile: &self.regulation_profile,
        };
        // Serializing a plain struct of strings cannot fail
        serde_json::to_string(&material).unwrap_or_default()
    }
}
