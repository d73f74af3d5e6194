//! Configuration types.
//!
//! Two YAML files drive the process: `config.yaml` (mail account, backends,
//! quotas, allow-list) and `tasks.yaml` (the task catalog, see
//! [`crate::pipeline::catalog`]). Secrets can be overridden from the
//! environment so they need not live in the file.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use tracing::info;

use crate::error::ConfigError;
use crate::llm::LlmBackend;
use crate::store::QuotaPolicy;

/// Default location of the application config.
pub const DEFAULT_CONFIG_PATH: &str = "./config/config.yaml";
/// Default location of the task catalog.
pub const DEFAULT_TASKS_PATH: &str = "./config/tasks.yaml";

const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[".txt", ".md", ".csv", ".json", ".pdf", ".docx"];

/// Whole application config (`config.yaml`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Mail account. Only required for the mail loop.
    pub email: Option<MailSettings>,
    pub app_settings: AppSettings,
    pub logging: LoggingSettings,
    pub rate_limit_defaults: RateLimitSettings,
    pub allowed_users: Vec<AllowedUser>,
    pub openai: OpenAiSettings,
    pub openrouter: OpenRouterSettings,
    pub azure_openai: AzureSettings,
    pub ollama: OllamaSettings,
}

/// IMAP/SMTP account.
#[derive(Debug, Clone, Deserialize)]
pub struct MailSettings {
    pub imap_server: String,
    #[serde(default = "default_imap_port")]
    pub imap_port: u16,
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub email_address: String,
    #[serde(default, deserialize_with = "secret")]
    pub password: Option<SecretString>,
}

/// General runtime settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Seconds between mailbox polls.
    pub check_interval: u64,
    pub max_attachments: usize,
    /// Per-attachment byte ceiling.
    pub max_attachment_size: usize,
    pub allowed_extensions: Vec<String>,
    /// Backend used when the subject names none.
    pub default_api: LlmBackend,
    /// Delivery attempts for each outbound email.
    pub send_retries: u32,
    /// Seconds between delivery attempts.
    pub send_retry_delay: u64,
    /// File name for rendered documents.
    pub result_filename: String,
    pub rate_limit_store: PathBuf,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            check_interval: 60,
            max_attachments: 5,
            max_attachment_size: 5 * 1024 * 1024,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_api: LlmBackend::OpenAi,
            send_retries: 3,
            send_retry_delay: 5,
            result_filename: "result.pdf".to_string(),
            rate_limit_store: PathBuf::from("rate_limit_stats.json"),
        }
    }
}

/// Logging settings. `RUST_LOG` takes precedence over `level`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    /// Write logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Global quota defaults.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    /// Window length in seconds.
    pub time_window: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 10,
            time_window: 3600,
        }
    }
}

/// Per-user quota override; each missing field uses the global default.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct RateLimitOverride {
    pub max_requests: Option<u32>,
    pub time_window: Option<u64>,
}

/// One allow-list entry.
///
/// `email` is an exact address, `@domain` / `domain` for a whole domain,
/// or `*` for everyone.
#[derive(Debug, Clone, Deserialize)]
pub struct AllowedUser {
    pub email: String,
    #[serde(default)]
    pub rate_limit: Option<RateLimitOverride>,
}

impl AllowedUser {
    pub fn new(email: &str) -> Self {
        Self {
            email: email.to_string(),
            rate_limit: None,
        }
    }

    pub fn with_limit(mut self, max_requests: Option<u32>, time_window: Option<u64>) -> Self {
        self.rate_limit = Some(RateLimitOverride {
            max_requests,
            time_window,
        });
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub enabled: bool,
    #[serde(deserialize_with = "secret")]
    pub api_key: Option<SecretString>,
    pub default_model: String,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            default_model: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenRouterSettings {
    pub enabled: bool,
    #[serde(deserialize_with = "secret")]
    pub api_key: Option<SecretString>,
    pub default_model: String,
}

impl Default for OpenRouterSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            default_model: "openai/gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AzureSettings {
    pub enabled: bool,
    #[serde(deserialize_with = "secret")]
    pub api_key: Option<SecretString>,
    pub endpoint: Option<String>,
    pub api_version: String,
    /// Deployment name used when no model is given.
    pub default_model: String,
}

impl Default for AzureSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            endpoint: None,
            api_version: "2024-06-01".to_string(),
            default_model: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub enabled: bool,
    pub host: String,
    pub default_model: String,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "http://localhost:11434".to_string(),
            default_model: "deepseek-coder:8b".to_string(),
        }
    }
}

impl AppConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        let yaml = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&yaml, path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Override secrets from the environment (`lookup` is `std::env::var` in production).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from)
        };

        if let Some(mail) = self.email.as_mut()
            && let Some(pw) = get("TASKMAILER_EMAIL_PASSWORD")
        {
            mail.password = Some(pw);
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.openai.api_key = Some(key);
        }
        if let Some(key) = get("OPENROUTER_API_KEY") {
            self.openrouter.api_key = Some(key);
        }
        if let Some(key) = get("AZURE_OPENAI_API_KEY") {
            self.azure_openai.api_key = Some(key);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.app_settings.send_retries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "app_settings.send_retries".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.app_settings.result_filename.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "app_settings.result_filename".into(),
                message: "must not be empty".into(),
            });
        }
        if let Some(user) = self.allowed_users.iter().find(|u| u.email.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                key: "allowed_users".into(),
                message: format!("entry with empty email: {user:?}"),
            });
        }
        Ok(())
    }

    /// Mail account, required by the mail loop.
    pub fn mail(&self) -> Result<&MailSettings, ConfigError> {
        self.email.as_ref().ok_or_else(|| ConfigError::MissingRequired {
            key: "email".into(),
            hint: "Add an `email` section with imap_server, smtp_server, email_address and password."
                .into(),
        })
    }

    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy::new(self.allowed_users.clone(), self.rate_limit_defaults)
    }
}

// ── Access policy ───────────────────────────────────────────────────

/// Static allow-list plus quota resolution.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    users: Vec<AllowedUser>,
    defaults: RateLimitSettings,
}

impl AccessPolicy {
    pub fn new(users: Vec<AllowedUser>, defaults: RateLimitSettings) -> Self {
        Self { users, defaults }
    }

    /// Quota for `sender`, or `None` when the sender is not allowed.
    ///
    /// An exact address entry beats a domain or wildcard entry.
    pub fn quota_for(&self, sender: &str) -> Option<QuotaPolicy> {
        let exact = self.users.iter().find(|u| {
            let entry = u.email.trim();
            entry.contains('@') && !entry.starts_with('@') && entry.eq_ignore_ascii_case(sender.trim())
        });
        let user = exact.or_else(|| {
            self.users
                .iter()
                .find(|u| is_sender_allowed(std::slice::from_ref(&u.email), sender))
        })?;

        let over = user.rate_limit.unwrap_or_default();
        Some(QuotaPolicy {
            max_requests: over.max_requests.unwrap_or(self.defaults.max_requests),
            window_secs: over.time_window.unwrap_or(self.defaults.time_window),
        })
    }

    pub fn is_allowed(&self, sender: &str) -> bool {
        self.quota_for(sender).is_some()
    }
}

/// Check if a sender email matches an allow-list.
///
/// - Empty list → deny all
/// - `*` in list → allow all
/// - `@domain.com` or `domain.com` → domain match
/// - `user@domain.com` → exact email match
pub fn is_sender_allowed(allowed: &[String], email: &str) -> bool {
    if allowed.is_empty() {
        return false;
    }
    if allowed.iter().any(|a| a == "*") {
        return true;
    }
    let email_lower = email.trim().to_lowercase();
    allowed.iter().any(|a| {
        let a = a.trim();
        if a.starts_with('@') {
            email_lower.ends_with(&a.to_lowercase())
        } else if a.contains('@') {
            a.eq_ignore_ascii_case(&email_lower)
        } else {
            email_lower.ends_with(&format!("@{}", a.to_lowercase()))
        }
    })
}

fn secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(SecretString::from))
}

fn default_imap_port() -> u16 {
    993
}

fn default_smtp_port() -> u16 {
    465
}
