//! `review`: closing notes on the plan and the priced bill
//!
//! Runs in the background once prices are known. Uses the reasoning service
//! when one is configured and the depth allows it, deterministic checks
//! otherwise or when the service fails.

use super::{Stage, StageInput, StageOutput};
use crate::ai::client::DEFAULT_MAX_OUTPUT_TOKENS;
use crate::ai::json::extract_typed;
use crate::ai::prompts::{self, NotesReply};
use crate::ai::{ReasoningClient, ReasoningError, ReasoningRequest};
use crate::models::artifacts::ReviewReport;
use crate::models::{Artifact, ArtifactKind, ArtifactSet, Severity, StageId};
use async_trait::async_trait;
use std::sync::Arc;

const MAX_LISTED_CODES: usize = 10;

/// Notes derived from the artifacts alone
pub fn heuristic_notes(artifacts: &ArtifactSet) -> Vec<String> {
    let mut notes = Vec::new();

    if let Some(sequence) = artifacts.sequence() {
        if !sequence.unmapped.is_empty() {
            notes.push(format!(
                "{} elements are missing from the construction sequence",
                sequence.unmapped.len()
            ));
        }
        let unestimated = sequence
            .steps
            .iter()
            .filter(|s| s.duration_days.is_none())
            .count();
        if unestimated > 0 {
            notes.push(format!(
                "{} steps have no duration estimate; default durations were assumed",
                unestimated
            ));
        }
    }

    if let Some(priced) = artifacts.priced_boq() {
        if !priced.unpriced.is_empty() {
            let listed: Vec<&str> = priced
                .unpriced
                .iter()
                .take(MAX_LISTED_CODES)
                .map(String::as_str)
                .collect();
            notes.push(format!(
                "{} bill items are unpriced ({})",
                priced.unpriced.len(),
                listed.join(", ")
            ));
        }
        let catalogue_priced = priced
            .lines
            .iter()
            .filter(|l| l.catalogue_match.is_some())
            .count();
        if catalogue_priced > 0 {
            notes.push(format!(
                "{} prices come from the reference catalogue and should be confirmed",
                catalogue_priced
            ));
        }
    }

    if let Some(compliance) = artifacts.compliance() {
        let errors = compliance
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .count();
        if errors > 0 {
            notes.push(format!(
                "{} compliance errors under the {} profile must be resolved",
                errors, compliance.profile
            ));
        }
    }

    if notes.is_empty() {
        notes.push("No issues detected".to_string());
    }
    notes
}

pub struct ReviewStage {
    client: Option<Arc<dyn ReasoningClient>>,
}

impl ReviewStage {
    pub fn new(client: Option<Arc<dyn ReasoningClient>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Stage for ReviewStage {
    fn id(&self) -> StageId {
        StageId::Review
    }

    fn dependencies(&self) -> &'static [ArtifactKind] {
        &[
            ArtifactKind::Sequence,
            ArtifactKind::PricedBoq,
            ArtifactKind::Compliance,
        ]
    }

    fn has_input(&self, input: &StageInput) -> bool {
        !input.artifacts.is_empty() || input.project.sequence.is_some()
    }

    async fn run(&self, input: StageInput) -> anyhow::Result<StageOutput> {
        let mut output = StageOutput::new();

        let client = match &self.client {
            Some(client) if input.options.depth.uses_reasoning() => client,
            _ => {
                return Ok(output.with_artifact(Artifact::Review(ReviewReport {
                    source: "heuristic".to_string(),
                    notes: heuristic_notes(&input.artifacts),
                })));
            }
        };

        let steps = input
            .artifacts
            .sequence()
            .or(input.project.sequence.as_ref())
            .map(|s| s.to_raw());
        let payload = prompts::review_payload(
            &input.project.name,
            steps.as_deref(),
            input.artifacts.priced_boq(),
            input.artifacts.compliance(),
        );
        let request = ReasoningRequest::new(prompts::REVIEW_SYSTEM, payload)
            .with_max_output_tokens(DEFAULT_MAX_OUTPUT_TOKENS);

        let reply = match client.complete(request, &input.cancel).await {
            Ok(response) => {
                output.token_usage = response.usage;
                extract_typed::<NotesReply>(&response.text).filter(|r| !r.notes.is_empty())
            }
            Err(ReasoningError::Cancelled) => return Err(ReasoningError::Cancelled.into()),
            Err(e) => {
                tracing::warn!(error = %e, "Review request failed");
                output
                    .warnings
                    .push(format!("Review by reasoning service failed: {}", e));
                None
            }
        };

        let report = match reply {
            Some(reply) => ReviewReport {
                source: "reasoning".to_string(),
                notes: reply.notes,
            },
            None => {
                if output.warnings.is_empty() {
                    output
                        .warnings
                        .push("Review returned no usable notes".to_string());
                }
                ReviewReport {
                    source: "heuristic".to_string(),
                    notes: heuristic_notes(&input.artifacts),
                }
            }
        };
        Ok(output.with_artifact(Artifact::Review(report)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ScriptedReasoningClient;
    use crate::classifier::ClassifiedFiles;
    use crate::models::artifacts::PricedBoq;
    use crate::models::{DepthMode, ProjectRecord, RunOptions, Sequence};

    fn artifacts() -> ArtifactSet {
        let mut set = ArtifactSet::new();
        set.insert(Artifact::Sequence(Sequence {
            steps: vec![],
            unmapped: vec!["w1".into()],
        }));
        set.insert(Artifact::PricedBoq(PricedBoq {
            currency: "EUR".into(),
            lines: vec![],
            unpriced: vec!["X1".into(), "X2".into()],
            total: 0.0,
        }));
        set
    }

    fn input(depth: DepthMode) -> StageInput {
        StageInput::detached(StageId::Review, ProjectRecord::new("T"), ClassifiedFiles::default())
            .with_artifacts(artifacts())
            .with_options(RunOptions::with_depth(depth))
    }

    fn report(output: &StageOutput) -> &ReviewReport {
        match &output.artifacts[0] {
            Artifact::Review(report) => report,
            other => panic!("unexpected artifact {:?}", other.kind()),
        }
    }

    #[test]
    fn test_heuristic_notes() {
        let notes = heuristic_notes(&artifacts());
        assert_eq!(notes.len(), 2);
        assert!(notes[1].contains("(X1, X2)"));
        assert_eq!(heuristic_notes(&ArtifactSet::new()), vec!["No issues detected"]);
    }

    #[tokio::test]
    async fn test_reasoning_notes_with_usage() {
        let client = Arc::new(ScriptedReasoningClient::new());
        client.push_reply(r#"{"notes": ["Sequence misses element w1"]}"#);
        let stage = ReviewStage::new(Some(client.clone()));

        let output = stage.run(input(DepthMode::Standard)).await.unwrap();
        assert_eq!(report(&output).source, "reasoning");
        assert!(!output.token_usage.is_zero());
        assert!(client.requests()[0].user.contains("X2"));
    }

    #[tokio::test]
    async fn test_service_failure_falls_back_to_heuristics() {
        let client = Arc::new(ScriptedReasoningClient::new());
        client.push_error(ReasoningError::Timeout);
        let stage = ReviewStage::new(Some(client));

        let output = stage.run(input(DepthMode::Deep)).await.unwrap();
        assert_eq!(report(&output).source, "heuristic");
        assert_eq!(output.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_quick_depth_is_heuristic() {
        let client = Arc::new(ScriptedReasoningClient::new());
        let stage = ReviewStage::new(Some(client.clone()));

        let output = stage.run(input(DepthMode::Quick)).await.unwrap();
        assert_eq!(client.call_count(), 0);
        assert_eq!(report(&output).source, "heuristic");
    }
}
