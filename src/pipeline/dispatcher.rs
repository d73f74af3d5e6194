//! Task dispatcher.
//!
//! Turns a [`WorkUnit`] into either a [`TaskInvocation`] or a [`Rejection`],
//! then runs the invocation against the selected backend. Checks happen in
//! this order and stop at the first failure:
//!
//! 1. sender on the allow-list (email only; silent drop)
//! 2. task exists in the catalog
//! 3. sender quota (email only)
//! 4. attachment count, then per-file extension and size
//!
//! Nothing here panics or propagates into the caller's loop: every unit
//! ends as a [`DispatchOutcome`]. Quota bookkeeping, attachment extraction
//! and rendering block, so they run on the blocking pool.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::{AccessPolicy, AppConfig};
use crate::documents::{DocumentRenderer, FileExtractor, PdfRenderer, TextExtractor};
use crate::error::{DispatchError, Error, RenderError, StoreError};
use crate::llm::{LlmBackend, ProviderRegistry};
use crate::pipeline::attachments::AttachmentPolicy;
use crate::pipeline::catalog::{OutputFormat, TaskCatalog};
use crate::pipeline::types::{
    Attachment, Origin, ParsedSubject, Rejection, TaskInvocation, TaskOutput, WorkUnit,
};
use crate::store::{QuotaDecision, RateLimiter};

/// Final state of one unit of work.
#[derive(Debug)]
pub enum DispatchOutcome {
    Completed(TaskOutput),
    Rejected(Rejection),
    Failed(DispatchError),
}

pub struct TaskDispatcher {
    catalog: Arc<TaskCatalog>,
    providers: ProviderRegistry,
    limiter: Arc<RateLimiter>,
    access: AccessPolicy,
    attachments: AttachmentPolicy,
    extractor: Arc<dyn TextExtractor>,
    renderer: Arc<dyn DocumentRenderer>,
    default_backend: LlmBackend,
    result_filename: String,
}

impl TaskDispatcher {
    pub fn new(
        catalog: Arc<TaskCatalog>,
        providers: ProviderRegistry,
        limiter: Arc<RateLimiter>,
        access: AccessPolicy,
        attachments: AttachmentPolicy,
    ) -> Self {
        Self {
            catalog,
            providers,
            limiter,
            access,
            attachments,
            extractor: Arc::new(FileExtractor),
            renderer: Arc::new(PdfRenderer),
            default_backend: LlmBackend::OpenAi,
            result_filename: "result.pdf".to_string(),
        }
    }

    /// Wire a dispatcher from loaded configuration.
    pub fn from_config(
        config: &AppConfig,
        catalog: TaskCatalog,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, Error> {
        let providers = ProviderRegistry::from_config(config)?;
        if providers.is_empty() {
            warn!("No AI backend is enabled; every task will fail");
        } else if providers.get(config.app_settings.default_api).is_err() {
            warn!(
                backend = %config.app_settings.default_api,
                "Default backend is not enabled"
            );
        }

        Ok(Self::new(
            Arc::new(catalog),
            providers,
            limiter,
            config.access_policy(),
            AttachmentPolicy::from_settings(&config.app_settings),
        )
        .with_default_backend(config.app_settings.default_api)
        .with_result_filename(&config.app_settings.result_filename))
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_default_backend(mut self, backend: LlmBackend) -> Self {
        self.default_backend = backend;
        self
    }

    pub fn with_result_filename(mut self, filename: &str) -> Self {
        self.result_filename = filename.to_string();
        self
    }

    pub fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    pub fn result_filename(&self) -> &str {
        &self.result_filename
    }

    // ── Preparation ─────────────────────────────────────────────────

    /// Run every policy check and assemble the prompt.
    ///
    /// The outer `Err` is an infrastructure fault (quota store
    /// unavailable); the inner one is a normal, reportable rejection.
    pub async fn prepare(
        &self,
        unit: WorkUnit,
    ) -> Result<Result<TaskInvocation, Rejection>, DispatchError> {
        let WorkUnit {
            origin,
            subject,
            body,
            attachments,
        } = unit;

        let quota = match &origin {
            Origin::Email { sender } => match self.access.quota_for(sender) {
                Some(quota) => Some((sender.as_str(), quota)),
                None => {
                    warn!(sender = %sender, "Sender is not allowed, dropping message");
                    return Ok(Err(Rejection::Unauthorized {
                        sender: sender.clone(),
                    }));
                }
            },
            Origin::Cli => None,
        };

        let task = match self.catalog.lookup(&subject.task_name) {
            Ok(task) => task.clone(),
            Err(missing) => {
                warn!(
                    task = %missing.name,
                    available = ?missing.available,
                    "No task matches subject"
                );
                return Ok(Err(Rejection::UnknownTask(missing)));
            }
        };

        if let Some((sender, policy)) = quota {
            let limiter = Arc::clone(&self.limiter);
            let identity = sender.to_string();
            let decision = tokio::task::spawn_blocking(move || limiter.check(&identity, policy))
                .await
                .map_err(|e| StoreError::Interrupted(e.to_string()))??;
            if let QuotaDecision::Denied { retry_after_secs } = decision {
                warn!(
                    sender = %sender,
                    max_requests = policy.max_requests,
                    retry_after_secs,
                    "Request limit exceeded"
                );
                return Ok(Err(Rejection::QuotaExceeded {
                    max_requests: policy.max_requests,
                    retry_after_secs,
                }));
            }
        }

        let kept = match self.attachments.filter(attachments) {
            Ok(kept) => kept,
            Err(rejection) => {
                warn!(%rejection, "Attachment policy violated");
                return Ok(Err(rejection));
            }
        };

        let mut prompt = match origin {
            Origin::Email { .. } => format!("{}\n{}\n", task.base_prompt, body),
            Origin::Cli => format!("{}\n{}", task.base_prompt, body),
        };
        let kept_count = kept.len();
        prompt.push_str(&self.attachment_sections(kept).await);

        let backend = self.resolve_backend(&subject);
        let model = subject.model.clone().or_else(|| task.model.clone());
        info!(
            task = %task.subject_key,
            backend = %backend,
            model = model.as_deref().unwrap_or("default"),
            attachments = kept_count,
            "Task prepared"
        );

        Ok(Ok(TaskInvocation {
            task,
            backend,
            model,
            prompt,
        }))
    }

    /// `\n[Attachment name]:\ntext\n` per attachment with extractable text,
    /// in attachment order. An extractor that dies only loses its own file.
    async fn attachment_sections(&self, attachments: Vec<Attachment>) -> String {
        let mut out = String::new();
        for att in attachments {
            let filename = att.filename.clone();
            let extractor = Arc::clone(&self.extractor);
            let text = match tokio::task::spawn_blocking(move || extractor.extract(&att)).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(file = %filename, error = %e, "Attachment extraction aborted, skipping");
                    continue;
                }
            };
            if text.trim().is_empty() {
                warn!(file = %filename, "Attachment has no readable text, skipping");
                continue;
            }
            out.push_str(&format!("\n[Attachment {filename}]:\n{text}\n"));
        }
        out
    }

    fn resolve_backend(&self, subject: &ParsedSubject) -> LlmBackend {
        match subject.api.as_deref() {
            None => self.default_backend,
            Some(api) => api.parse().unwrap_or_else(|_| {
                warn!(api, fallback = %self.default_backend, "Unknown API requested, using default");
                self.default_backend
            }),
        }
    }

    // ── Execution ───────────────────────────────────────────────────

    /// Call the backend and shape the response per the task's output format.
    pub async fn execute(&self, invocation: &TaskInvocation) -> Result<TaskOutput, DispatchError> {
        let provider = self.providers.get(invocation.backend)?;
        let text = provider
            .complete(&invocation.prompt, invocation.model.as_deref())
            .await?;
        info!(
            task = %invocation.task.subject_key,
            backend = provider.name(),
            chars = text.len(),
            "Backend responded"
        );

        match invocation.task.output_format {
            OutputFormat::Text => Ok(TaskOutput::Text(text)),
            OutputFormat::Pdf => {
                let renderer = Arc::clone(&self.renderer);
                let bytes = tokio::task::spawn_blocking(move || renderer.render(&text))
                    .await
                    .map_err(|e| RenderError::Pdf(format!("renderer aborted: {e}")))??;
                Ok(TaskOutput::Document {
                    filename: self.result_filename.clone(),
                    bytes,
                })
            }
        }
    }

    /// Prepare and execute one unit of work.
    pub async fn dispatch(&self, unit: WorkUnit) -> DispatchOutcome {
        let invocation = match self.prepare(unit).await {
            Ok(Ok(invocation)) => invocation,
            Ok(Err(rejection)) => {
                debug!(reason = rejection.label(), "Unit rejected");
                return DispatchOutcome::Rejected(rejection);
            }
            Err(e) => {
                error!(error = %e, "Could not prepare task");
                return DispatchOutcome::Failed(e);
            }
        };

        match self.execute(&invocation).await {
            Ok(output) => DispatchOutcome::Completed(output),
            Err(e) => {
                error!(
                    task = %invocation.task.subject_key,
                    backend = %invocation.backend,
                    error = %e,
                    "Task failed"
                );
                DispatchOutcome::Failed(e)
            }
        }
    }
}
