//! Local Ollama server (`/api/generate`, non-streaming).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::{LlmProvider, http_client, non_empty};

const PROVIDER: &str = "ollama";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

/// Ollama HTTP backend.
pub struct OllamaProvider {
    http: reqwest::Client,
    host: String,
    default_model: String,
}

impl OllamaProvider {
    pub fn new(host: &str, default_model: &str) -> Result<Self, LlmError> {
        Ok(Self {
            http: http_client(PROVIDER)?,
            host: host.trim_end_matches('/').to_string(),
            default_model: default_model.to_string(),
        })
    }

    pub fn generate_url(&self) -> String {
        format!("{}/api/generate", self.host)
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, prompt: &str, model: Option<&str>) -> Result<String, LlmError> {
        let model = model.unwrap_or(&self.default_model);
        tracing::info!(model, host = %self.host, "Sending prompt to Ollama");

        let body = GenerateRequest {
            model,
            prompt,
            stream: false,
        };
        let response = self
            .http
            .post(self.generate_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("HTTP {status}: {}", text.chars().take(500).collect::<String>()),
            });
        }

        let parsed: GenerateResponse =
            response.json().await.map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;
        non_empty(PROVIDER, parsed.response)
    }
}
