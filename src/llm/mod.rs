//! LLM integration for taskmailer.
//!
//! Supports:
//! - **OpenAI**: vendor SDK via rig-core
//! - **OpenRouter**: OpenAI-compatible REST
//! - **Azure OpenAI**: OpenAI-compatible REST with deployment URLs
//! - **Ollama**: local HTTP server
//!
//! Backends are built once at startup into a [`ProviderRegistry`]; the
//! dispatcher picks one by [`LlmBackend`] rather than by string matching.

pub mod compat;
pub mod ollama;
pub mod openai;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::config::AppConfig;
use crate::error::LlmError;

pub use compat::{AzureProvider, OpenRouterProvider};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Timeout for a single backend request.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    OpenAi,
    OpenRouter,
    #[serde(alias = "azure_openai")]
    Azure,
    Ollama,
}

impl LlmBackend {
    pub const ALL: [LlmBackend; 4] = [Self::OpenAi, Self::OpenRouter, Self::Azure, Self::Ollama];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::OpenRouter => "openrouter",
            Self::Azure => "azure",
            Self::Ollama => "ollama",
        }
    }
}

impl fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmBackend {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "openrouter" => Ok(Self::OpenRouter),
            "azure" | "azure_openai" => Ok(Self::Azure),
            "ollama" => Ok(Self::Ollama),
            other => Err(LlmError::UnknownProvider(other.to_string())),
        }
    }
}

/// A text-completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Model used when the caller passes none.
    fn default_model(&self) -> &str;

    /// Send `prompt` as a single user message and return the reply text.
    async fn complete(&self, prompt: &str, model: Option<&str>) -> Result<String, LlmError>;
}

/// Enabled backends, keyed by [`LlmBackend`].
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<LlmBackend, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every backend that is enabled and fully configured.
    pub fn from_config(config: &AppConfig) -> Result<Self, LlmError> {
        let mut registry = Self::new();
        for backend in LlmBackend::ALL {
            match create_provider(backend, config) {
                Ok(Some(provider)) => {
                    tracing::info!(
                        backend = %backend,
                        model = provider.default_model(),
                        "Backend enabled"
                    );
                    registry.insert(backend, provider);
                }
                Ok(None) => tracing::debug!(backend = %backend, "Backend disabled"),
                Err(e) => return Err(e),
            }
        }
        if registry.is_empty() {
            tracing::warn!("No AI backend is enabled; every task will fail");
        }
        Ok(registry)
    }

    pub fn insert(&mut self, backend: LlmBackend, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(backend, provider);
    }

    pub fn with(mut self, backend: LlmBackend, provider: Arc<dyn LlmProvider>) -> Self {
        self.insert(backend, provider);
        self
    }

    /// The provider for `backend`, or `ProviderDisabled`.
    pub fn get(&self, backend: LlmBackend) -> Result<Arc<dyn LlmProvider>, LlmError> {
        self.providers
            .get(&backend)
            .cloned()
            .ok_or_else(|| LlmError::ProviderDisabled {
                provider: backend.to_string(),
            })
    }

    pub fn enabled(&self) -> Vec<LlmBackend> {
        LlmBackend::ALL
            .into_iter()
            .filter(|b| self.providers.contains_key(b))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Create one backend from configuration. `Ok(None)` means disabled or
/// missing credentials.
pub fn create_provider(
    backend: LlmBackend,
    config: &AppConfig,
) -> Result<Option<Arc<dyn LlmProvider>>, LlmError> {
    match backend {
        LlmBackend::OpenAi => {
            let s = &config.openai;
            let Some(key) = s.api_key.as_ref().filter(|_| s.enabled) else {
                return Ok(None);
            };
            let provider = OpenAiProvider::new(key.expose_secret(), &s.default_model)?;
            Ok(Some(Arc::new(provider)))
        }
        LlmBackend::OpenRouter => {
            let s = &config.openrouter;
            let Some(key) = s.api_key.as_ref().filter(|_| s.enabled) else {
                return Ok(None);
            };
            let provider = OpenRouterProvider::new(key.clone(), &s.default_model)?;
            Ok(Some(Arc::new(provider)))
        }
        LlmBackend::Azure => {
            let s = &config.azure_openai;
            let (Some(key), Some(endpoint)) = (s.api_key.as_ref(), s.endpoint.as_deref()) else {
                return Ok(None);
            };
            if !s.enabled {
                return Ok(None);
            }
            let provider =
                AzureProvider::new(key.clone(), endpoint, &s.api_version, &s.default_model)?;
            Ok(Some(Arc::new(provider)))
        }
        LlmBackend::Ollama => {
            let s = &config.ollama;
            if !s.enabled {
                return Ok(None);
            }
            let provider = OllamaProvider::new(&s.host, &s.default_model)?;
            Ok(Some(Arc::new(provider)))
        }
    }
}

/// Shared HTTP client builder for the REST backends.
pub(crate) fn http_client(provider: &str) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: format!("Failed to build HTTP client: {e}"),
        })
}

/// Reject empty completions so callers never deliver a blank reply.
pub(crate) fn non_empty(provider: &str, text: Option<String>) -> Result<String, LlmError> {
    match text {
        Some(t) if !t.trim().is_empty() => Ok(t),
        _ => Err(LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason: "empty completion".to_string(),
        }),
    }
}
