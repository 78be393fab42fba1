use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::models::chat::Turn;
use crate::utils::error::{RelayError, UpstreamFailure};

/// Body of `POST /v1/messages`
#[derive(Debug, Serialize)]
pub struct MessagesRequest<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
    pub temperature: f32,
    pub messages: &'a [Turn],
}

/// Anything that can turn a conversation into the next assistant reply
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Whether credentials are present. Checked before any call is attempted.
    fn is_configured(&self) -> bool;

    async fn complete(&self, turns: &[Turn]) -> Result<String, RelayError>;
}

#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
    endpoint: String,
    timeout: Duration,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Result<Self, RelayError> {
        let timeout = config.timeout();
        Self::with_timeout(config, timeout)
    }

    pub fn with_timeout(config: LlmConfig, timeout: Duration) -> Result<Self, RelayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        let endpoint = format!("{}/v1/messages", config.base_url.trim_end_matches('/'));

        Ok(Self {
            client,
            config,
            endpoint,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn classify_transport_error(&self, err: reqwest::Error) -> RelayError {
        // A connect attempt that runs out the clock reports both; timeout wins
        if err.is_timeout() {
            RelayError::Timeout(self.timeout)
        } else if err.is_connect() {
            RelayError::Connection(err.to_string())
        } else {
            RelayError::Request(err.to_string())
        }
    }
}

#[async_trait]
impl LlmProvider for LlmService {
    fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    async fn complete(&self, turns: &[Turn]) -> Result<String, RelayError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(RelayError::MissingApiKey)?;

        debug!("Sending {} turns to {}", turns.len(), self.endpoint);

        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            messages: turns,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", &self.config.api_version)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.classify_transport_error(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.classify_transport_error(e))?;

        if !status.is_success() {
            return Err(RelayError::UpstreamStatus {
                status: status.as_u16(),
                kind: UpstreamFailure::from_status(status.as_u16()),
                body,
            });
        }

        extract_reply(&body)
    }
}

/// Pulls `content[0].text` out of a Messages API response body
pub fn extract_reply(body: &str) -> Result<String, RelayError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| RelayError::InvalidJson(e.to_string()))?;

    let content = value.get("content").ok_or(RelayError::MissingContent)?;

    let is_empty = match content {
        Value::Null => true,
        Value::Array(blocks) => blocks.is_empty(),
        Value::String(text) => text.is_empty(),
        _ => false,
    };
    if is_empty {
        return Err(RelayError::EmptyContent);
    }

    content
        .get(0)
        .and_then(|block| block.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(RelayError::Extraction)
}
