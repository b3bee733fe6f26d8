//! `sequencing`: construction sequence over the element universe
//!
//! Quick runs, and runs without a reasoning client, use a deterministic
//! phase/storey heuristic. Otherwise the generate/validate/refine loop runs.

use super::ifc::phase_for;
use super::{Stage, StageInput, StageOutput};
use crate::ai::{ReasoningClient, RefinementLoop, SequencingContext};
use crate::models::{Artifact, ConstructionPhase, DepthMode, ProjectRecord, Sequence, StageId, Step};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Elements per day assumed by the heuristic
const ELEMENTS_PER_DAY: usize = 10;

/// One step per (phase, storey), phases in construction order, each step
/// following the previous one
pub fn heuristic_sequence(project: &ProjectRecord) -> Sequence {
    let mut groups: BTreeMap<(ConstructionPhase, Option<String>), Vec<String>> = BTreeMap::new();
    for element in &project.elements {
        groups
            .entry((phase_for(&element.ifc_type), element.storey.clone()))
            .or_default()
            .push(element.id.clone());
    }

    let mut steps: Vec<Step> = Vec::with_capacity(groups.len());
    for (index, ((phase, storey), element_ids)) in groups.into_iter().enumerate() {
        let name = match &storey {
            Some(storey) => format!("{} - {}", phase.as_str().replace('_', " "), storey),
            None => phase.as_str().replace('_', " "),
        };
        let days = element_ids.len().div_ceil(ELEMENTS_PER_DAY).max(1);
        steps.push(Step {
            id: format!("step-{}", index + 1),
            name,
            phase,
            predecessors: steps.last().map(|s| vec![s.id.clone()]).unwrap_or_default(),
            rationale: "Phase order, then storey".to_string(),
            duration_days: Some(days as f64),
            group: storey,
            element_ids,
        });
    }

    Sequence {
        steps,
        unmapped: Vec::new(),
    }
}

pub struct SequencingStage {
    client: Option<Arc<dyn ReasoningClient>>,
    max_output_tokens: u32,
}

impl SequencingStage {
    pub fn new(client: Option<Arc<dyn ReasoningClient>>, max_output_tokens: u32) -> Self {
        Self {
            client,
            max_output_tokens,
        }
    }
}

#[async_trait]
impl Stage for SequencingStage {
    fn id(&self) -> StageId {
        StageId::Sequencing
    }

    fn has_input(&self, input: &StageInput) -> bool {
        !input.project.elements.is_empty()
    }

    async fn run(&self, input: StageInput) -> anyhow::Result<StageOutput> {
        let mut project = (*input.project).clone();
        let mut output = StageOutput::new();

        let client = match &self.client {
            Some(client) if input.options.depth != DepthMode::Quick => client.clone(),
            _ => {
                let sequence = heuristic_sequence(&project);
                tracing::info!(steps = sequence.steps.len(), "Heuristic sequence built");
                project.sequence = Some(sequence.clone());
                return Ok(output
                    .with_project(project)
                    .with_artifact(Artifact::Sequence(sequence)));
            }
        };

        input.progress.report(0.1, "Generating sequence");
        let context = SequencingContext::from_project(&project);
        let outcome = RefinementLoop::new(client)
            .with_max_output_tokens(self.max_output_tokens)
            .run(&context, input.options.depth, &input.cancel)
            .await?;

        tracing::info!(
            steps = outcome.sequence.steps.len(),
            unmapped = outcome.sequence.unmapped.len(),
            refined = outcome.refined,
            findings = outcome.findings.len(),
            "Sequence ready"
        );
        if !outcome.sequence.unmapped.is_empty() {
            output.warnings.push(format!(
                "{} elements were not assigned to any construction step",
                outcome.sequence.unmapped.len()
            ));
        }
        output.warnings.extend(outcome.warnings);

        project.sequence = Some(outcome.sequence.clone());
        Ok(output
            .with_project(project)
            .with_artifact(Artifact::Sequence(outcome.sequence))
            .with_usage(outcome.usage.total()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{ReasoningError, ScriptedReasoningClient};
    use crate::classifier::ClassifiedFiles;
    use crate::models::{BuildingElement, RunOptions, TokenUsage};

    fn project() -> ProjectRecord {
        let mut project = ProjectRecord::new("T");
        for (id, ifc_type, storey) in [
            ("w1", "IFCWALL", Some("L1")),
            ("f1", "IFCFOOTING", Some("L0")),
            ("w2", "IFCWALL", Some("L0")),
            ("d1", "IFCDOOR", Some("L0")),
        ] {
            project.elements.push(BuildingElement {
                id: id.into(),
                ifc_type: ifc_type.into(),
                name: None,
                storey: storey.map(str::to_string),
                source_file: "a.ifc".into(),
            });
        }
        project
    }

    fn input(depth: DepthMode) -> StageInput {
        StageInput::detached(StageId::Sequencing, project(), ClassifiedFiles::default())
            .with_options(RunOptions::with_depth(depth))
    }

    #[test]
    fn test_heuristic_orders_by_phase_then_storey() {
        let sequence = heuristic_sequence(&project());
        let names: Vec<&str> = sequence.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["foundation - L0", "structure - L0", "structure - L1", "envelope - L0"]
        );
        assert_eq!(sequence.steps[2].predecessors, vec!["step-2"]);
        assert!(sequence.is_partition_of(&project().element_ids()));
    }

    #[tokio::test]
    async fn test_quick_depth_never_calls_client() {
        let client = Arc::new(ScriptedReasoningClient::new());
        let stage = SequencingStage::new(Some(client.clone()), 1024);

        let output = stage.run(input(DepthMode::Quick)).await.unwrap();
        assert_eq!(client.call_count(), 0);
        assert!(output.token_usage.is_zero());
        assert_eq!(output.project.unwrap().sequence.unwrap().steps.len(), 4);
    }

    #[tokio::test]
    async fn test_standard_depth_uses_reasoning() {
        let client = Arc::new(ScriptedReasoningClient::new());
        client.push_reply(
            r#"{"steps": [{"id": "s", "name": "All", "phase": "structure", "element_ids": ["w1", "w2", "f1"]}]}"#,
        );
        let stage = SequencingStage::new(Some(client.clone()), 1024);

        let output = stage.run(input(DepthMode::Standard)).await.unwrap();
        assert_eq!(client.call_count(), 1);
        assert_eq!(output.token_usage, TokenUsage::new(100, 50));
        assert_eq!(output.warnings.len(), 1);
        let sequence = output.project.unwrap().sequence.unwrap();
        assert_eq!(sequence.unmapped, vec!["d1"]);
    }

    #[tokio::test]
    async fn test_reasoning_failure_is_stage_error() {
        let client = Arc::new(ScriptedReasoningClient::new());
        client.push_error(ReasoningError::Network("refused".into()));
        let stage = SequencingStage::new(Some(client), 1024);

        assert!(stage.run(input(DepthMode::Deep)).await.is_err());
    }
}
