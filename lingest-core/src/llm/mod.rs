//! Text-completion endpoint client. The pipeline talks to the model
//! through the [`TextGenerator`] seam so coordinators can be exercised
//! against scripted fakes.

pub mod repair;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("llm endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("llm response carries no text content")]
    EmptyResponse,
}

impl LlmError {
    /// True for HTTP 429 and resource-exhausted signals, which warrant the
    /// long backoff instead of the per-attempt one.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            LlmError::Status { status, body } => {
                *status == 429 || body.contains("RESOURCE_EXHAUSTED")
            }
            LlmError::Transport(err) => err
                .status()
                .map(|status| status.as_u16() == 429)
                .unwrap_or(false),
            LlmError::EmptyResponse => false,
        }
    }
}

pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.4,
            top_p: 0.95,
            max_output_tokens: 8192,
        }
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> LlmResult<String>;
}

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// HTTP client for a Gemini-style `generateContent` endpoint.
pub struct GeminiClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> LlmResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent("lingest/1.0")
            .build()?;
        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> LlmResult<String> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            self.endpoint.trim_end_matches('/'),
            self.model,
            self.api_key
        );
        let payload = serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": prompt}],
            }],
            "generationConfig": {
                "temperature": config.temperature,
                "topP": config.top_p,
                "maxOutputTokens": config.max_output_tokens,
            },
        });

        let response = self.client.post(&url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        let text = body
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.pointer("/content/parts"))
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .filter(|text| !text.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)?;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_detection() {
        let err = LlmError::Status {
            status: 429,
            body: String::new(),
        };
        assert!(err.is_rate_limited());

        let err = LlmError::Status {
            status: 500,
            body: "RESOURCE_EXHAUSTED".into(),
        };
        assert!(err.is_rate_limited());

        let err = LlmError::Status {
            status: 500,
            body: "internal".into(),
        };
        assert!(!err.is_rate_limited());
    }
}
