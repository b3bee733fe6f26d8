//! HTTP reasoning client (Messages-style JSON API)
//!
//! `POST {base_url}/v1/messages` with the API key header. Extended reasoning
//! is requested through the `thinking` block when the request carries a budget.

use super::client::{ReasoningClient, ReasoningError, ReasoningRequest, ReasoningResponse};
use crate::models::TokenUsage;
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use sitecheck_common::config::ReasoningConfig;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const API_VERSION: &str = "2023-06-01";
const USER_AGENT: &str = concat!("sitecheck-pipeline/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<Thinking>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct Thinking {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: u32,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

pub struct HttpReasoningClient {
    http_client: Client,
    base_url: String,
    model: String,
}

impl HttpReasoningClient {
    /// Build a client from configuration. Requires an API key.
    pub fn new(config: &ReasoningConfig) -> Result<Self, ReasoningError> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ReasoningError::NotConfigured("no API key".to_string()))?;

        let mut headers = header::HeaderMap::new();
        headers.insert(header::USER_AGENT, header::HeaderValue::from_static(USER_AGENT));
        headers.insert(
            "anthropic-version",
            header::HeaderValue::from_static(API_VERSION),
        );
        let mut key = header::HeaderValue::from_str(api_key)
            .map_err(|e| ReasoningError::NotConfigured(format!("invalid API key: {}", e)))?;
        key.set_sensitive(true);
        headers.insert("x-api-key", key);

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .default_headers(headers)
            .build()
            .map_err(|e| ReasoningError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    async fn send(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, ReasoningError> {
        let thinking = request.thinking_budget.map(|budget| Thinking {
            kind: "enabled",
            budget_tokens: budget,
        });
        // The thinking budget counts against max_tokens
        let max_tokens = request.max_output_tokens + request.thinking_budget.unwrap_or(0);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens,
            system: &request.system,
            messages: vec![Message {
                role: "user",
                content: &request.user,
            }],
            thinking,
        };

        let response = self
            .http_client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ReasoningError::Api {
                status: status.as_u16(),
                message: message.chars().take(500).collect(),
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ReasoningError::Malformed(e.to_string()))?;

        let text = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(ReasoningResponse {
            text,
            usage: TokenUsage::new(parsed.usage.input_tokens, parsed.usage.output_tokens),
        })
    }
}

fn map_transport_error(err: reqwest::Error) -> ReasoningError {
    if err.is_timeout() {
        ReasoningError::Timeout
    } else {
        ReasoningError::Network(err.to_string())
    }
}

#[async_trait]
impl ReasoningClient for HttpReasoningClient {
    async fn complete(
        &self,
        request: ReasoningRequest,
        cancel: &CancellationToken,
    ) -> Result<ReasoningResponse, ReasoningError> {
        tracing::debug!(
            model = %self.model,
            payload_chars = request.user.len(),
            thinking_budget = ?request.thinking_budget,
            "Sending reasoning request"
        );

        tokio::select! {
            _ = cancel.cancelled() => Err(ReasoningError::Cancelled),
            result = self.send(&request) => result,
        }
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_key: Option<&str>) -> ReasoningConfig {
        ReasoningConfig {
            api_key: api_key.map(str::to_string),
            base_url: "http://127.0.0.1:9/".to_string(),
            ..ReasoningConfig::default()
        }
    }

    #[test]
    fn test_requires_api_key() {
        assert!(matches!(
            HttpReasoningClient::new(&config(None)),
            Err(ReasoningError::NotConfigured(_))
        ));
        assert!(HttpReasoningClient::new(&config(Some(""))).is_err());
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client = HttpReasoningClient::new(&config(Some("key"))).unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:9/v1/messages");
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let client = HttpReasoningClient::new(&config(Some("key"))).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = client
            .complete(ReasoningRequest::new("s", "u"), &cancel)
            .await;
        assert!(matches!(result, Err(ReasoningError::Cancelled)));
    }

    #[test]
    fn test_request_body_shape() {
        let body = MessagesRequest {
            model: "m",
            max_tokens: 10,
            system: "sys",
            messages: vec![Message {
                role: "user",
                content: "hi",
            }],
            thinking: Some(Thinking {
                kind: "enabled",
                budget_tokens: 2048,
            }),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["thinking"]["type"], "enabled");
        assert_eq!(json["thinking"]["budget_tokens"], 2048);
    }
}
