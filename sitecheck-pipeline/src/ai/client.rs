//! Reasoning-service client abstraction

use crate::models::TokenUsage;
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Longest user payload sent in one request (characters)
pub const MAX_USER_PAYLOAD_CHARS: usize = 120_000;

/// Appended when a payload was cut at [`MAX_USER_PAYLOAD_CHARS`]
pub const TRUNCATION_MARKER: &str = "\n\n[... input truncated ...]";

pub const MIN_THINKING_BUDGET: u32 = 1024;
pub const MAX_THINKING_BUDGET: u32 = 16_000;

pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;

/// Errors from the external reasoning service
#[derive(Debug, Clone, Error)]
pub enum ReasoningError {
    /// Non-success HTTP status
    #[error("Reasoning service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Reasoning service request failed: {0}")]
    Network(String),

    #[error("Reasoning service request timed out")]
    Timeout,

    #[error("Reasoning service response malformed: {0}")]
    Malformed(String),

    #[error("Reasoning request cancelled")]
    Cancelled,

    #[error("Reasoning service not configured: {0}")]
    NotConfigured(String),
}

/// One request: instruction, bounded payload and output limits
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningRequest {
    pub system: String,
    /// Never longer than [`MAX_USER_PAYLOAD_CHARS`] plus the marker
    pub user: String,
    /// Extended reasoning budget, always within
    /// [`MIN_THINKING_BUDGET`]..=[`MAX_THINKING_BUDGET`]
    pub thinking_budget: Option<u32>,
    pub max_output_tokens: u32,
}

impl ReasoningRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: truncate_payload(user.into()),
            thinking_budget: None,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }

    pub fn with_thinking_budget(mut self, budget: u32) -> Self {
        self.thinking_budget = Some(budget.clamp(MIN_THINKING_BUDGET, MAX_THINKING_BUDGET));
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens.max(1);
        self
    }
}

/// Cut `payload` to the character limit, marking the cut
pub fn truncate_payload(payload: String) -> String {
    match payload.char_indices().nth(MAX_USER_PAYLOAD_CHARS) {
        Some((byte_index, _)) => {
            let mut cut = payload[..byte_index].to_string();
            cut.push_str(TRUNCATION_MARKER);
            cut
        }
        None => payload,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningResponse {
    pub text: String,
    pub usage: TokenUsage,
}

impl ReasoningResponse {
    pub fn new(text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            text: text.into(),
            usage,
        }
    }
}

/// Suspending request/response call to the reasoning service
///
/// Implementations must return [`ReasoningError::Cancelled`] promptly once
/// `cancel` fires.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn complete(
        &self,
        request: ReasoningRequest,
        cancel: &CancellationToken,
    ) -> Result<ReasoningResponse, ReasoningError>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_payload_untouched() {
        let request = ReasoningRequest::new("sys", "hello");
        assert_eq!(request.user, "hello");
    }

    #[test]
    fn test_long_payload_truncated_with_marker() {
        let payload = "é".repeat(MAX_USER_PAYLOAD_CHARS + 10);
        let request = ReasoningRequest::new("sys", payload);
        assert!(request.user.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            request.user.chars().count(),
            MAX_USER_PAYLOAD_CHARS + TRUNCATION_MARKER.chars().count()
        );
    }

    #[test]
    fn test_thinking_budget_clamped() {
        let low = ReasoningRequest::new("s", "u").with_thinking_budget(10);
        assert_eq!(low.thinking_budget, Some(MIN_THINKING_BUDGET));
        let high = ReasoningRequest::new("s", "u").with_thinking_budget(1_000_000);
        assert_eq!(high.thinking_budget, Some(MAX_THINKING_BUDGET));
    }
}
