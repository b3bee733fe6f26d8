//! Generate → validate → refine loop over the reasoning service
//!
//! 1. Generate (always). Transport failure is returned as an error;
//!    unparseable output yields an empty sequence plus a warning.
//! 2. Validate (deep only). Failure becomes a warning and skips refinement.
//! 3. Refine, exactly once, iff validation produced an error or warning
//!    finding. Failure keeps the candidate and adds a warning.
//!
//! Every sequence that leaves this module went through `Sequence::sanitize`
//! against the original element universe.

use super::client::{ReasoningClient, ReasoningError, ReasoningRequest, DEFAULT_MAX_OUTPUT_TOKENS};
use super::context::SequencingContext;
use super::json::extract_typed;
use super::prompts::{self, FindingsReply, StepsReply};
use crate::models::findings::{actionable, sort_findings};
use crate::models::{DepthMode, Sequence, TokenUsage, ValidationFinding};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Usage per loop phase
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseUsage {
    pub generate: TokenUsage,
    pub validate: Option<TokenUsage>,
    pub refine: Option<TokenUsage>,
}

impl PhaseUsage {
    pub fn total(&self) -> TokenUsage {
        self.generate + self.validate.unwrap_or_default() + self.refine.unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefinementOutcome {
    pub sequence: Sequence,
    /// Validation findings, error → warning → info
    pub findings: Vec<ValidationFinding>,
    pub refined: bool,
    pub usage: PhaseUsage,
    pub warnings: Vec<String>,
}

pub struct RefinementLoop {
    client: Arc<dyn ReasoningClient>,
    max_output_tokens: u32,
}

impl RefinementLoop {
    pub fn new(client: Arc<dyn ReasoningClient>) -> Self {
        Self {
            client,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    fn request(
        &self,
        system: &str,
        user: String,
        context: &SequencingContext,
        depth: DepthMode,
    ) -> ReasoningRequest {
        let request =
            ReasoningRequest::new(system, user).with_max_output_tokens(self.max_output_tokens);
        match context.thinking_budget(depth) {
            Some(budget) => request.with_thinking_budget(budget),
            None => request,
        }
    }

    pub async fn run(
        &self,
        context: &SequencingContext,
        depth: DepthMode,
        cancel: &CancellationToken,
    ) -> Result<RefinementOutcome, ReasoningError> {
        let mut warnings = Vec::new();
        let mut usage = PhaseUsage::default();

        // Generate
        let request = self.request(
            prompts::GENERATE_SYSTEM,
            context.inventory.clone(),
            context,
            depth,
        );
        let response = self.client.complete(request, cancel).await?;
        usage.generate = response.usage;

        let candidate = match extract_typed::<StepsReply>(&response.text) {
            Some(reply) => {
                let (sequence, dropped) = Sequence::sanitize(reply.steps, &context.universe);
                if dropped > 0 {
                    tracing::debug!(dropped, "Dropped invalid element claims from generated sequence");
                }
                sequence
            }
            None => {
                warnings.push(
                    "Sequence generation returned unparseable output; all elements left unmapped"
                        .to_string(),
                );
                Sequence::empty(&context.universe)
            }
        };

        tracing::info!(
            steps = candidate.steps.len(),
            unmapped = candidate.unmapped.len(),
            "Sequence generated"
        );

        if depth != DepthMode::Deep {
            return Ok(RefinementOutcome {
                sequence: candidate,
                findings: Vec::new(),
                refined: false,
                usage,
                warnings,
            });
        }

        // Validate
        let candidate_raw = candidate.to_raw();
        let request = self.request(
            prompts::VALIDATE_SYSTEM,
            prompts::validate_payload(&context.inventory, &candidate_raw),
            context,
            depth,
        );
        let findings = match self.client.complete(request, cancel).await {
            Ok(response) => {
                usage.validate = Some(response.usage);
                match extract_typed::<FindingsReply>(&response.text) {
                    Some(reply) => {
                        let mut findings: Vec<ValidationFinding> =
                            reply.findings.into_iter().map(Into::into).collect();
                        sort_findings(&mut findings);
                        Some(findings)
                    }
                    None => {
                        warnings.push("Sequence validation returned unparseable output".to_string());
                        None
                    }
                }
            }
            Err(ReasoningError::Cancelled) => return Err(ReasoningError::Cancelled),
            Err(e) => {
                warnings.push(format!("Sequence validation failed: {}", e));
                None
            }
        };

        let Some(findings) = findings else {
            return Ok(RefinementOutcome {
                sequence: candidate,
                findings: Vec::new(),
                refined: false,
                usage,
                warnings,
            });
        };

        let to_address = actionable(&findings);
        if to_address.is_empty() {
            return Ok(RefinementOutcome {
                sequence: candidate,
                findings,
                refined: false,
                usage,
                warnings,
            });
        }

        // Refine (single pass)
        tracing::info!(findings = to_address.len(), "Refining sequence");
        let request = self.request(
            prompts::REFINE_SYSTEM,
            prompts::refine_payload(&context.inventory, &candidate_raw, &to_address),
            context,
            depth,
        );
        let (sequence, refined) = match self.client.complete(request, cancel).await {
            Ok(response) => {
                usage.refine = Some(response.usage);
                match extract_typed::<StepsReply>(&response.text) {
                    Some(reply) => {
                        let (sequence, _) = Sequence::sanitize(reply.steps, &context.universe);
                        (sequence, true)
                    }
                    None => {
                        warnings.push(
                            "Sequence refinement returned unparseable output; keeping generated sequence"
                                .to_string(),
                        );
                        (candidate, false)
                    }
                }
            }
            Err(ReasoningError::Cancelled) => return Err(ReasoningError::Cancelled),
            Err(e) => {
                warnings.push(format!(
                    "Sequence refinement failed: {}; keeping generated sequence",
                    e
                ));
                (candidate, false)
            }
        };

        Ok(RefinementOutcome {
            sequence,
            findings,
            refined,
            usage,
            warnings,
        })
    }
}
