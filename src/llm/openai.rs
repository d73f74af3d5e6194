//! OpenAI backend through the rig-core SDK.

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;

use crate::error::LlmError;
use crate::llm::{LlmProvider, non_empty};

const PROVIDER: &str = "openai";

/// OpenAI chat completions via rig-core.
pub struct OpenAiProvider {
    client: rig::client::Client<openai::client::OpenAIResponsesExt>,
    default_model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: &str, default_model: &str) -> Result<Self, LlmError> {
        let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
            openai::Client::new(api_key).map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to create OpenAI client: {e}"),
            })?;
        Ok(Self {
            client,
            default_model: default_model.to_string(),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, prompt: &str, model: Option<&str>) -> Result<String, LlmError> {
        let model = model.unwrap_or(&self.default_model);
        tracing::info!(model, chars = prompt.len(), "Sending prompt to OpenAI");

        let agent = self.client.agent(model).temperature(1.0).build();
        let reply = agent
            .prompt(prompt)
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(chars = reply.len(), "OpenAI reply received");
        non_empty(PROVIDER, Some(reply))
    }
}
