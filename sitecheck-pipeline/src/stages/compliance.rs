//! `compliance_check`: built-in regulation rules per profile
//!
//! Rules produce findings, never errors. The rule table is built on first use.

use super::{Stage, StageInput, StageOutput};
use crate::models::artifacts::{ComplianceFinding, ComplianceReport};
use crate::models::{Artifact, ProjectRecord, Severity, StageId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::OnceCell;

pub const DEFAULT_PROFILE: &str = "generic";

type Check = fn(&ProjectRecord) -> Option<(Severity, String, Vec<String>)>;

/// One regulation rule
#[derive(Clone, Copy)]
pub struct Rule {
    pub id: &'static str,
    check: Check,
}

impl Rule {
    fn evaluate(&self, project: &ProjectRecord) -> Option<ComplianceFinding> {
        (self.check)(project).map(|(severity, description, element_ids)| ComplianceFinding {
            rule_id: self.id.to_string(),
            severity,
            description,
            element_ids,
        })
    }
}

const STRUCTURAL: &[&str] = &[
    "IFCCOLUMN",
    "IFCBEAM",
    "IFCSLAB",
    "IFCWALL",
    "IFCWALLSTANDARDCASE",
    "IFCMEMBER",
];
const FOUNDATIONS: &[&str] = &["IFCFOOTING", "IFCPILE"];
const VERTICAL_CIRCULATION: &[&str] = &["IFCSTAIR", "IFCSTAIRFLIGHT", "IFCRAMP"];
const SERVICES: &[&str] = &[
    "IFCPIPESEGMENT",
    "IFCDUCTSEGMENT",
    "IFCCABLESEGMENT",
    "IFCFLOWSEGMENT",
    "IFCFLOWTERMINAL",
    "IFCSANITARYTERMINAL",
    "IFCLIGHTFIXTURE",
];

fn has_any(project: &ProjectRecord, types: &[&str]) -> bool {
    project
        .elements
        .iter()
        .any(|e| types.contains(&e.ifc_type.as_str()))
}

fn storey_count(project: &ProjectRecord) -> usize {
    project
        .elements
        .iter()
        .filter_map(|e| e.storey.as_deref())
        .collect::<HashSet<_>>()
        .len()
}

fn structure_present(p: &ProjectRecord) -> Option<(Severity, String, Vec<String>)> {
    (!has_any(p, STRUCTURAL)).then(|| {
        (
            Severity::Error,
            "No load-bearing structural elements (columns, beams, slabs, walls) in the model"
                .to_string(),
            vec![],
        )
    })
}

fn foundation_present(p: &ProjectRecord) -> Option<(Severity, String, Vec<String>)> {
    (!has_any(p, FOUNDATIONS)).then(|| {
        (
            Severity::Warning,
            "No foundation elements (footings, piles) in the model".to_string(),
            vec![],
        )
    })
}

fn storey_assignment(p: &ProjectRecord) -> Option<(Severity, String, Vec<String>)> {
    let unassigned: Vec<String> = p
        .elements
        .iter()
        .filter(|e| e.storey.is_none())
        .map(|e| e.id.clone())
        .collect();
    (!unassigned.is_empty()).then(|| {
        (
            Severity::Warning,
            format!("{} elements are not assigned to a storey", unassigned.len()),
            unassigned,
        )
    })
}

fn named_elements(p: &ProjectRecord) -> Option<(Severity, String, Vec<String>)> {
    let unnamed: Vec<String> = p
        .elements
        .iter()
        .filter(|e| e.name.is_none())
        .map(|e| e.id.clone())
        .collect();
    (!unnamed.is_empty()).then(|| {
        (
            Severity::Info,
            format!("{} elements have no name", unnamed.len()),
            unnamed,
        )
    })
}

fn vertical_circulation(p: &ProjectRecord) -> Option<(Severity, String, Vec<String>)> {
    (storey_count(p) > 1 && !has_any(p, VERTICAL_CIRCULATION)).then(|| {
        (
            Severity::Error,
            "Multi-storey building without stairs or ramps".to_string(),
            vec![],
        )
    })
}

fn stair_railings(p: &ProjectRecord) -> Option<(Severity, String, Vec<String>)> {
    (has_any(p, VERTICAL_CIRCULATION) && !has_any(p, &["IFCRAILING"])).then(|| {
        (
            Severity::Warning,
            "Stairs or ramps without railings".to_string(),
            vec![],
        )
    })
}

fn doors_present(p: &ProjectRecord) -> Option<(Severity, String, Vec<String>)> {
    (!has_any(p, &["IFCDOOR"])).then(|| {
        (
            Severity::Error,
            "No doors in the model; egress cannot be assessed".to_string(),
            vec![],
        )
    })
}

fn services_present(p: &ProjectRecord) -> Option<(Severity, String, Vec<String>)> {
    (!has_any(p, SERVICES)).then(|| {
        (
            Severity::Warning,
            "No building services elements in the model".to_string(),
            vec![],
        )
    })
}

fn build_rule_sets() -> HashMap<&'static str, Vec<Rule>> {
    let generic = vec![
        Rule { id: "GEN-01", check: structure_present },
        Rule { id: "GEN-02", check: foundation_present },
        Rule { id: "GEN-03", check: storey_assignment },
        Rule { id: "GEN-04", check: named_elements },
    ];

    let mut residential = generic.clone();
    residential.push(Rule { id: "RES-01", check: vertical_circulation });
    residential.push(Rule { id: "RES-02", check: stair_railings });

    let mut commercial = generic.clone();
    commercial.push(Rule { id: "COM-01", check: doors_present });
    commercial.push(Rule { id: "COM-02", check: services_present });
    commercial.push(Rule { id: "COM-03", check: vertical_circulation });

    HashMap::from([
        (DEFAULT_PROFILE, generic),
        ("residential", residential),
        ("commercial", commercial),
    ])
}

pub struct ComplianceCheckStage {
    rule_sets: OnceCell<HashMap<&'static str, Vec<Rule>>>,
}

impl ComplianceCheckStage {
    pub fn new() -> Self {
        Self {
            rule_sets: OnceCell::new(),
        }
    }

    async fn rule_sets(&self) -> &HashMap<&'static str, Vec<Rule>> {
        self.rule_sets
            .get_or_init(|| async {
                let sets = build_rule_sets();
                tracing::debug!(profiles = sets.len(), "Compliance rule sets loaded");
                sets
            })
            .await
    }

    /// Evaluate the rule set of `profile` (unknown profiles use the generic set)
    pub async fn evaluate(&self, project: &ProjectRecord, profile: &str) -> (ComplianceReport, bool) {
        let sets = self.rule_sets().await;
        let key = profile.trim().to_lowercase();
        let (profile_name, rules, known) = match sets.get(key.as_str()) {
            Some(rules) => (key.clone(), rules, true),
            None => (
                DEFAULT_PROFILE.to_string(),
                &sets[DEFAULT_PROFILE],
                false,
            ),
        };

        let mut findings: Vec<ComplianceFinding> =
            rules.iter().filter_map(|r| r.evaluate(project)).collect();
        findings.sort_by_key(|f| f.severity);

        (
            ComplianceReport {
                profile: profile_name,
                rules_evaluated: rules.len(),
                findings,
            },
            known,
        )
    }
}

impl Default for ComplianceCheckStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for ComplianceCheckStage {
    fn id(&self) -> StageId {
        StageId::ComplianceCheck
    }

    fn has_input(&self, input: &StageInput) -> bool {
        !input.project.elements.is_empty()
    }

    async fn run(&self, input: StageInput) -> anyhow::Result<StageOutput> {
        let (report, known) = self
            .evaluate(&input.project, &input.options.regulation_profile)
            .await;
        tracing::info!(
            profile = %report.profile,
            findings = report.findings.len(),
            "Compliance evaluated"
        );

        let mut output = StageOutput::new();
        if !known {
            output.warnings.push(format!(
                "Unknown regulation profile '{}', generic rules applied",
                input.options.regulation_profile
            ));
        }
        Ok(output.with_artifact(Artifact::Compliance(report)))
    }
}
