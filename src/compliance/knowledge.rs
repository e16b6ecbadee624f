//! Knowledge source used for regional regulatory and tax research
//!
//! Answers are untrusted free text; callers run them through
//! [`crate::compliance::parser`] before using any of the content.

use crate::config::{env_parse, ConfigError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub type KnowledgeResult<T> = Result<T, KnowledgeError>;

#[derive(Debug, Clone, Error)]
pub enum KnowledgeError {
    #[error("Knowledge source network error: {message}")]
    Network { message: String },

    #[error("Knowledge source timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Knowledge source returned an invalid response: {message}")]
    InvalidResponse { message: String },
}

impl KnowledgeError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, KnowledgeError::InvalidResponse { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeAnswer {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
}

#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn answer_question(&self, prompt: &str) -> KnowledgeResult<KnowledgeAnswer>;

    async fn generate_completion(&self, prompt: &str) -> KnowledgeResult<Completion>;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct KnowledgeSourceConfig {
    pub api_url: String,
    pub model: String,
    pub request_timeout: Duration,
}

impl Default for KnowledgeSourceConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            request_timeout: Duration::from_secs(20),
        }
    }
}

impl KnowledgeSourceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            api_url: std::env::var("KNOWLEDGE_API_URL").unwrap_or(defaults.api_url),
            model: std::env::var("KNOWLEDGE_MODEL").unwrap_or(defaults.model),
            request_timeout: Duration::from_secs(env_parse(
                "KNOWLEDGE_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
        })
    }
}

const RESEARCH_SYSTEM_PROMPT: &str = "You are a payments compliance analyst. \
Answer with a single JSON object and no commentary.";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for an Ollama-compatible `/api/generate` endpoint.
#[derive(Clone)]
pub struct OllamaKnowledgeSource {
    client: Client,
    config: KnowledgeSourceConfig,
}

impl OllamaKnowledgeSource {
    pub fn new(config: KnowledgeSourceConfig) -> KnowledgeResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| KnowledgeError::Network {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;
        Ok(Self { client, config })
    }

    async fn generate(&self, prompt: &str) -> KnowledgeResult<String> {
        let url = format!("{}/api/generate", self.config.api_url.trim_end_matches('/'));
        let body = GenerateRequest {
            model: &self.config.model,
            prompt,
            system: RESEARCH_SYSTEM_PROMPT,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    KnowledgeError::Timeout {
                        timeout_ms: self.config.request_timeout.as_millis() as u64,
                    }
                } else {
                    KnowledgeError::Network {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(KnowledgeError::Network {
                message: format!("knowledge source returned HTTP {}", status.as_u16()),
            });
        }

        let parsed: GenerateResponse =
            response
                .json()
                .await
                .map_err(|e| KnowledgeError::InvalidResponse {
                    message: e.to_string(),
                })?;

        debug!(
            model = %self.config.model,
            chars = parsed.response.len(),
            "Knowledge source completion received"
        );
        Ok(parsed.response)
    }
}

#[async_trait]
impl KnowledgeSource for OllamaKnowledgeSource {
    async fn answer_question(&self, prompt: &str) -> KnowledgeResult<KnowledgeAnswer> {
        let answer = self.generate(prompt).await?;
        Ok(KnowledgeAnswer {
            answer,
            sources: vec![format!("{}:{}", self.name(), self.config.model)],
        })
    }

    async fn generate_completion(&self, prompt: &str) -> KnowledgeResult<Completion> {
        Ok(Completion {
            text: self.generate(prompt).await?,
        })
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_response_is_not_retryable() {
        assert!(!KnowledgeError::InvalidResponse {
            message: "bad".to_string()
        }
        .is_retryable());
        assert!(KnowledgeError::Timeout { timeout_ms: 10 }.is_retryable());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_network_error() {
        let source = OllamaKnowledgeSource::new(KnowledgeSourceConfig {
            api_url: "http://127.0.0.1:1".to_string(),
            model: "test".to_string(),
            request_timeout: Duration::from_secs(2),
        })
        .unwrap();
        let result = source.generate_completion("hello").await;
        assert!(matches!(
            result,
            Err(KnowledgeError::Network { .. }) | Err(KnowledgeError::Timeout { .. })
        ));
    }
}
