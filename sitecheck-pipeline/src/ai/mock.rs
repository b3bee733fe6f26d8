//! Scripted reasoning client for tests and offline runs

use super::client::{ReasoningClient, ReasoningError, ReasoningRequest, ReasoningResponse};
use crate::models::TokenUsage;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

type Responder = Box<dyn Fn(&ReasoningRequest) -> Result<String, ReasoningError> + Send + Sync>;

/// Replays queued replies in order, then falls back to an optional responder
///
/// Every request is recorded for later inspection.
pub struct ScriptedReasoningClient {
    replies: Mutex<VecDeque<Result<String, ReasoningError>>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<ReasoningRequest>>,
    usage_per_call: TokenUsage,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedReasoningClient {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            responder: None,
            requests: Mutex::new(Vec::new()),
            usage_per_call: TokenUsage::new(100, 50),
        }
    }

    /// Client answering every request through `responder`
    pub fn responding<F>(responder: F) -> Self
    where
        F: Fn(&ReasoningRequest) -> Result<String, ReasoningError> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new()
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage_per_call = usage;
        self
    }

    pub fn push_reply(&self, text: impl Into<String>) -> &Self {
        lock(&self.replies).push_back(Ok(text.into()));
        self
    }

    pub fn push_error(&self, error: ReasoningError) -> &Self {
        lock(&self.replies).push_back(Err(error));
        self
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<ReasoningRequest> {
        lock(&self.requests).clone()
    }

    /// Requests whose system instruction equals `system`
    pub fn requests_for(&self, system: &str) -> Vec<ReasoningRequest> {
        lock(&self.requests)
            .iter()
            .filter(|r| r.system == system)
            .cloned()
            .collect()
    }

    pub fn remaining_replies(&self) -> usize {
        lock(&self.replies).len()
    }
}

impl Default for ScriptedReasoningClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReasoningClient for ScriptedReasoningClient {
    async fn complete(
        &self,
        request: ReasoningRequest,
        cancel: &CancellationToken,
    ) -> Result<ReasoningResponse, ReasoningError> {
        if cancel.is_cancelled() {
            return Err(ReasoningError::Cancelled);
        }

        lock(&self.requests).push(request.clone());
        let queued = lock(&self.replies).pop_front();
        let reply = match (queued, &self.responder) {
            (Some(reply), _) => reply,
            (None, Some(responder)) => responder(&request),
            (None, None) => Err(ReasoningError::Api {
                status: 503,
                message: "no scripted reply".to_string(),
            }),
        };

        reply.map(|text| ReasoningResponse::new(text, self.usage_per_call))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
