//! Instruction texts and reply shapes for reasoning-service calls

use crate::models::artifacts::{ComplianceReport, PricedBoq};
use crate::models::lenient;
use crate::models::{RawStep, ValidationFinding};
use serde::{Deserialize, Serialize};

pub const GENERATE_SYSTEM: &str = "\
You are a construction planner. Given a building element inventory, produce a \
construction sequence. Reply with a single JSON object of the form \
{\"steps\": [{\"id\", \"name\", \"phase\", \"element_ids\", \"group\", \
\"predecessors\", \"rationale\", \"duration_days\"}]}. \
Phases: site_preparation, foundation, structure, envelope, services, finishes, \
external_works. Use only element ids from the inventory and assign each id to \
at most one step. Predecessors must reference earlier step ids.";

pub const VALIDATE_SYSTEM: &str = "\
You are a construction planning reviewer. Check the candidate sequence against \
the element inventory for ordering errors, missing elements, unsafe phase \
transitions and implausible durations. Reply with a single JSON object \
{\"findings\": [{\"severity\": \"error|warning|info\", \"category\", \
\"description\", \"affected_ids\", \"suggested_fix\"}]}. Reply with an empty \
list when the sequence is sound.";

pub const REFINE_SYSTEM: &str = "\
You are a construction planner revising a sequence. Apply the listed findings \
and return the complete corrected sequence as a single JSON object \
{\"steps\": [...]} using the same step shape as the input. Use only element \
ids from the inventory and assign each id to at most one step.";

pub const REVIEW_SYSTEM: &str = "\
You are reviewing a construction plan and its priced bill of quantities. \
Point out risks, gaps and pricing anomalies. Reply with a single JSON object \
{\"notes\": [\"...\"]}.";

/// `{"steps": [...]}`
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StepsReply {
    pub steps: Vec<RawStep>,
}

/// Finding as emitted by the service (severity not yet normalised)
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawFinding {
    #[serde(deserialize_with = "lenient::string")]
    pub severity: String,
    #[serde(deserialize_with = "lenient::string")]
    pub category: String,
    #[serde(deserialize_with = "lenient::string")]
    pub description: String,
    #[serde(
        alias = "affected_elements",
        alias = "ids",
        deserialize_with = "lenient::string_list"
    )]
    pub affected_ids: Vec<String>,
    #[serde(
        alias = "fix",
        alias = "suggestion",
        deserialize_with = "lenient::string"
    )]
    pub suggested_fix: String,
}

impl From<RawFinding> for ValidationFinding {
    fn from(raw: RawFinding) -> Self {
        ValidationFinding {
            severity: crate::models::Severity::from_loose(&raw.severity),
            category: if raw.category.trim().is_empty() {
                "general".to_string()
            } else {
                raw.category
            },
            description: raw.description,
            affected_ids: raw.affected_ids,
            suggested_fix: raw.suggested_fix,
        }
    }
}

/// `{"findings": [...]}`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FindingsReply {
    pub findings: Vec<RawFinding>,
}

/// `{"notes": [...]}`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NotesReply {
    #[serde(deserialize_with = "lenient::string_list")]
    pub notes: Vec<String>,
}

/// Payload for validation: inventory plus candidate
pub fn validate_payload(inventory: &str, candidate: &[RawStep]) -> String {
    format!(
        "INVENTORY:\n{}\n\nCANDIDATE SEQUENCE:\n{}",
        inventory,
        serde_json::to_string_pretty(&StepsRef { steps: candidate }).unwrap_or_default()
    )
}

/// Payload for refinement: inventory, candidate and actionable findings
pub fn refine_payload(
    inventory: &str,
    candidate: &[RawStep],
    findings: &[ValidationFinding],
) -> String {
    format!(
        "INVENTORY:\n{}\n\nCURRENT SEQUENCE:\n{}\n\nFINDINGS TO ADDRESS:\n{}",
        inventory,
        serde_json::to_string_pretty(&StepsRef { steps: candidate }).unwrap_or_default(),
        serde_json::to_string_pretty(findings).unwrap_or_default()
    )
}

/// Payload for review: plan, priced bill and compliance findings (each optional)
pub fn review_payload(
    project_name: &str,
    sequence: Option<&[RawStep]>,
    priced: Option<&PricedBoq>,
    compliance: Option<&ComplianceReport>,
) -> String {
    let mut payload = format!("PROJECT: {}", project_name);
    if let Some(steps) = sequence {
        payload.push_str("\n\nSEQUENCE:\n");
        payload.push_str(&serde_json::to_string_pretty(&StepsRef { steps }).unwrap_or_default());
    }
    if let Some(priced) = priced {
        payload.push_str("\n\nPRICED BILL:\n");
        payload.push_str(&serde_json::to_string_pretty(priced).unwrap_or_default());
    }
    if let Some(compliance) = compliance {
        payload.push_str("\n\nCOMPLIANCE FINDINGS:\n");
        payload.push_str(&serde_json::to_string_pretty(&compliance.findings).unwrap_or_default());
    }
    payload
}

#[derive(Serialize)]
struct StepsRef<'a> {
    steps: &'a [RawStep],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;

    #[test]
    fn test_raw_finding_normalised() {
        let reply: FindingsReply = serde_json::from_str(
            r#"{"findings": [{"severity": "CRITICAL", "description": "x", "fix": "y"}]}"#,
        )
        .unwrap();
        let finding: ValidationFinding = reply.findings.into_iter().next().unwrap().into();
        assert_eq!(finding.severity, Severity::Error);
        assert_eq!(finding.category, "general");
        assert_eq!(finding.suggested_fix, "y");
    }

    #[test]
    fn test_null_finding_fields_are_tolerated() {
        let reply: FindingsReply = serde_json::from_str(
            r#"{"findings": [{"severity": "warning", "category": null, "description": "gap",
                "affected_ids": [3], "suggested_fix": null}]}"#,
        )
        .unwrap();
        let finding: ValidationFinding = reply.findings.into_iter().next().unwrap().into();
        assert_eq!(finding.severity, Severity::Warning);
        assert_eq!(finding.category, "general");
        assert_eq!(finding.affected_ids, vec!["3"]);
        assert_eq!(finding.suggested_fix, "");
    }

    #[test]
    fn test_refine_payload_lists_findings() {
        let finding = ValidationFinding {
            severity: Severity::Warning,
            category: "ordering".into(),
            description: "roof before walls".into(),
            affected_ids: vec![],
            suggested_fix: String::new(),
        };
        let payload = refine_payload("[]", &[], &[finding]);
        assert!(payload.contains("roof before walls"));
        assert!(payload.contains("FINDINGS TO ADDRESS"));
    }
}
