//! Severity-graded findings (validation and compliance)
//!
//! Findings are output data, never errors.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    /// Lenient parse for reasoning-service output ("ERROR", "critical", "warn", ...)
    pub fn from_loose(s: &str) -> Severity {
        match s.trim().to_lowercase().as_str() {
            "error" | "critical" | "blocker" | "high" => Severity::Error,
            "warning" | "warn" | "medium" | "major" => Severity::Warning,
            _ => Severity::Info,
        }
    }

    /// Whether a finding of this severity justifies a refinement pass
    pub fn is_actionable(self) -> bool {
        matches!(self, Severity::Error | Severity::Warning)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        f.write_str(s)
    }
}

/// Issue raised against a candidate sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFinding {
    pub severity: Severity,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub affected_ids: Vec<String>,
    #[serde(default)]
    pub suggested_fix: String,
}

/// Sort findings error → warning → info, keeping relative order within a severity
pub fn sort_findings(findings: &mut [ValidationFinding]) {
    findings.sort_by_key(|f| f.severity);
}

/// Findings that should drive a refinement pass (info excluded)
pub fn actionable(findings: &[ValidationFinding]) -> Vec<ValidationFinding> {
    findings
        .iter()
        .filter(|f| f.severity.is_actionable())
        .cloned()
        .collect()
}
