//! OpenAI-compatible chat-completions provider

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::{ModelHealth, ModelProvider, OptimizationRequest, ProviderError};
use crate::config::ProviderConfig;

const USER_AGENT: &str = concat!("polish-optimizer/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Provider backed by `POST {base_url}/chat/completions`
pub struct ChatCompletionsProvider {
    name: String,
    model: String,
    base_url: String,
    api_key: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl ChatCompletionsProvider {
    /// Build from config; the API key is read from `api_key_env` if set
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = match &config.api_key_env {
            Some(var) => match std::env::var(var) {
                Ok(key) if !key.trim().is_empty() => Some(key.trim().to_string()),
                _ => {
                    tracing::warn!(
                        provider = %config.name,
                        env = %var,
                        "API key environment variable not set; calling without credentials"
                    );
                    None
                }
            },
            None => None,
        };

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self {
            name: config.name.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: config.timeout(),
            http_client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn transport_error(&self, error: reqwest::Error) -> ProviderError {
        if error.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Transport(error.to_string())
        }
    }
}

#[async_trait]
impl ModelProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn optimize(&self, request: &OptimizationRequest) -> Result<String, ProviderError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.text,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        tracing::debug!(
            provider = %self.name,
            session_id = %request.session_id,
            segment_index = request.segment_index,
            attempt = request.attempt,
            chars = request.text.chars().count(),
            "Calling chat completions"
        );

        let response = self
            .authorized(self.http_client.post(self.endpoint("chat/completions")))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::BadResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ProviderError::BadResponse("response has no content".to_string()))
    }

    async fn probe(&self) -> ModelHealth {
        let started = Instant::now();
        let result = self
            .authorized(self.http_client.get(self.endpoint("models")))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                ModelHealth::available(started.elapsed())
            }
            Ok(response) => ModelHealth::unavailable(format!("HTTP {}", response.status())),
            Err(e) => ModelHealth::unavailable(self.transport_error(e).to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProviderConfig {
        ProviderConfig {
            name: "local".to_string(),
            base_url: "http://127.0.0.1:9/v1/".to_string(),
            model: "test-model".to_string(),
            api_key_env: None,
            timeout_secs: 5,
            temperature: Some(0.2),
            max_tokens: None,
        }
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let provider = ChatCompletionsProvider::from_config(&config()).unwrap();
        assert_eq!(
            provider.endpoint("chat/completions"),
            "http://127.0.0.1:9/v1/chat/completions"
        );
        assert_eq!(provider.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_request_body_shape() {
        let body = ChatRequest {
            model: "m",
            messages: [
                ChatMessage {
                    role: "system",
                    content: "polish",
                },
                ChatMessage {
                    role: "user",
                    content: "text",
                },
            ],
            temperature: None,
            max_tokens: Some(100),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][1]["content"], "text");
        assert_eq!(json["max_tokens"], 100);
        assert!(json.get("temperature").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_probe_is_unavailable() {
        let provider = ChatCompletionsProvider::from_config(&config()).unwrap();
        let health = provider.probe().await;
        assert_eq!(health.status, super::super::ModelStatus::Unavailable);
        assert!(health.error.is_some());
    }
}
