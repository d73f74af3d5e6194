//! OpenAI-compatible chat-completions backends over plain REST.
//!
//! OpenRouter and Azure OpenAI speak the same request/response shape and
//! differ only in URL and auth header.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::{LlmProvider, http_client, non_empty};

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const OPENROUTER_TEMPERATURE: f32 = 0.8;
const AZURE_TEMPERATURE: f32 = 1.0;

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    pub messages: Vec<ChatMessage<'a>>,
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatResponse {
    /// Content of the first choice.
    pub fn into_text(self) -> Option<String> {
        self.choices.into_iter().next().and_then(|c| c.message.content)
    }
}

/// POST a chat request and pull the first choice's text out.
async fn post_chat(
    provider: &str,
    request: reqwest::RequestBuilder,
    body: &ChatRequest<'_>,
) -> Result<String, LlmError> {
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|e| LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: e.to_string(),
        })?;

    let status = response.status();
    let text = response.text().await.map_err(|e| LlmError::RequestFailed {
        provider: provider.to_string(),
        reason: e.to_string(),
    })?;

    if !status.is_success() {
        return Err(LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: format!("HTTP {status}: {}", truncate(&text, 500)),
        });
    }

    let parsed: ChatResponse =
        serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason: format!("{e}: {}", truncate(&text, 200)),
        })?;
    non_empty(provider, parsed.into_text())
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// ── OpenRouter ──────────────────────────────────────────────────────

/// OpenRouter chat completions.
pub struct OpenRouterProvider {
    http: reqwest::Client,
    api_key: SecretString,
    default_model: String,
    url: String,
}

impl OpenRouterProvider {
    pub fn new(api_key: SecretString, default_model: &str) -> Result<Self, LlmError> {
        Ok(Self {
            http: http_client("openrouter")?,
            api_key,
            default_model: default_model.to_string(),
            url: OPENROUTER_URL.to_string(),
        })
    }

    /// Point at a different endpoint (proxies, tests).
    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, prompt: &str, model: Option<&str>) -> Result<String, LlmError> {
        let model = model.unwrap_or(&self.default_model);
        tracing::info!(model, chars = prompt.len(), "Sending prompt to OpenRouter");

        let body = ChatRequest {
            model: Some(model),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: OPENROUTER_TEMPERATURE,
        };
        let request = self
            .http
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret())
            .header("X-Title", "taskmailer");
        post_chat(self.name(), request, &body).await
    }
}

// ── Azure OpenAI ────────────────────────────────────────────────────

/// Azure OpenAI; the model name is the deployment name.
pub struct AzureProvider {
    http: reqwest::Client,
    api_key: SecretString,
    endpoint: String,
    api_version: String,
    default_model: String,
}

impl AzureProvider {
    pub fn new(
        api_key: SecretString,
        endpoint: &str,
        api_version: &str,
        default_model: &str,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            http: http_client("azure")?,
            api_key,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_version: api_version.to_string(),
            default_model: default_model.to_string(),
        })
    }

    /// Chat-completions URL for a deployment.
    pub fn deployment_url(&self, deployment: &str) -> String {
        format!(
            "{}/openai/deployments/{deployment}/chat/completions?api-version={}",
            self.endpoint, self.api_version
        )
    }
}

#[async_trait]
impl LlmProvider for AzureProvider {
    fn name(&self) -> &str {
        "azure"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, prompt: &str, model: Option<&str>) -> Result<String, LlmError> {
        let deployment = model.unwrap_or(&self.default_model);
        tracing::info!(deployment, chars = prompt.len(), "Sending prompt to Azure OpenAI");

        let body = ChatRequest {
            model: None,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: AZURE_TEMPERATURE,
        };
        let request = self
            .http
            .post(self.deployment_url(deployment))
            .header("api-key", self.api_key.expose_secret());
        post_chat(self.name(), request, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_serializes_openai_shape() {
        let body = ChatRequest {
            model: Some("gpt-4o"),
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            temperature: 0.8,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hi");
    }

    #[test]
    fn azure_request_omits_model() {
        let body = ChatRequest {
            model: None,
            messages: vec![],
            temperature: 1.0,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("model").is_none());
    }

    #[test]
    fn response_takes_first_choice() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"first"}},{"message":{"content":"second"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.into_text().as_deref(), Some("first"));
    }

    #[test]
    fn response_without_choices_is_none() {
        let parsed: ChatResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.into_text().is_none());
    }

    #[test]
    fn azure_deployment_url() {
        let p = AzureProvider::new(
            SecretString::from("k".to_string()),
            "https://acme.openai.azure.com/",
            "2024-06-01",
            "gpt-4o-mini",
        )
        .unwrap();
        assert_eq!(
            p.deployment_url("gpt-4o"),
            "https://acme.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-06-01"
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_request_failure() {
        let p = OpenRouterProvider::new(SecretString::from("k".to_string()), "m")
            .unwrap()
            .with_url("http://127.0.0.1:9/v1/chat/completions");
        let err = p.complete("hello", None).await.unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed { .. }));
    }
}
