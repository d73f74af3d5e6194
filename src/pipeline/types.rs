//! Shared types for the task pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::llm::LlmBackend;
use crate::pipeline::catalog::{TaskDefinition, TaskNotFound};

// ── Parsed subject ──────────────────────────────────────────────────

/// Result of parsing a subject line.
///
/// `api` and `model` keep the letter case they were written in; the
/// dispatcher resolves `api` to a backend case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParsedSubject {
    pub task_name: String,
    pub api: Option<String>,
    pub model: Option<String>,
}

impl ParsedSubject {
    /// A bare task name with no overrides.
    pub fn task(name: impl Into<String>) -> Self {
        Self {
            task_name: name.into(),
            api: None,
            model: None,
        }
    }

    /// Render back into subject-line syntax: `Task`, `Task (api)` or `Task (api:model)`.
    pub fn to_subject(&self) -> String {
        match (&self.api, &self.model) {
            (Some(api), Some(model)) => format!("{} ({api}:{model})", self.task_name),
            (Some(api), None) => format!("{} ({api})", self.task_name),
            (None, Some(model)) => format!("{} (:{model})", self.task_name),
            (None, None) => self.task_name.clone(),
        }
    }
}

// ── Work units ──────────────────────────────────────────────────────

/// A file attached to an inbound message (or handed to the CLI).
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub content_type: String,
}

impl Attachment {
    pub fn new(
        filename: impl Into<String>,
        content: impl Into<Vec<u8>>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
            content_type: content_type.into(),
        }
    }

    /// Lower-cased extension including the leading dot, or `""`.
    pub fn extension(&self) -> String {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default()
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("size", &self.content.len())
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// Where a unit of work came from. Decides whether the allow-list and
/// quota apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Inbound email from `sender`.
    Email { sender: String },
    /// Direct command-line invocation (trusted local caller).
    Cli,
}

/// One request entering the dispatcher.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub origin: Origin,
    pub subject: ParsedSubject,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

// ── Dispatch results ────────────────────────────────────────────────

/// A fully resolved request, ready to send to a backend.
#[derive(Debug, Clone)]
pub struct TaskInvocation {
    pub task: TaskDefinition,
    pub backend: LlmBackend,
    /// `None` means the backend's own default model.
    pub model: Option<String>,
    pub prompt: String,
}

/// What a completed task produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutput {
    /// Raw response text, delivered as the reply body.
    Text(String),
    /// Rendered document, delivered as a binary attachment.
    Document { filename: String, bytes: Vec<u8> },
}

/// Why a unit of work was not sent to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Sender is not on the allow-list. Dropped silently.
    Unauthorized { sender: String },
    /// No task matches the subject.
    UnknownTask(TaskNotFound),
    /// Sender used up the current window.
    QuotaExceeded {
        max_requests: u32,
        retry_after_secs: u64,
    },
    /// More attachments than allowed; the whole message is refused.
    TooManyAttachments { count: usize, max: usize },
}

impl Rejection {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "unauthorized",
            Self::UnknownTask(_) => "unknown_task",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::TooManyAttachments { .. } => "too_many_attachments",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized { sender } => write!(f, "sender {sender} is not allowed"),
            Self::UnknownTask(missing) => write!(f, "{missing}"),
            Self::QuotaExceeded {
                max_requests,
                retry_after_secs,
            } => write!(
                f,
                "You have exceeded the maximum of {max_requests} requests for the current time window. \
                 Please try again in {retry_after_secs} seconds."
            ),
            Self::TooManyAttachments { count, max } => write!(
                f,
                "Your message has {count} attachments. The maximum allowed is {max}."
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_extension_is_lowercased_with_dot() {
        let att = Attachment::new("Report.PDF", vec![1, 2, 3], "application/pdf");
        assert_eq!(att.extension(), ".pdf");
        assert_eq!(att.size(), 3);
    }

    #[test]
    fn attachment_without_extension() {
        let att = Attachment::new("README", Vec::new(), "text/plain");
        assert_eq!(att.extension(), "");
    }

    #[test]
    fn attachment_debug_hides_content() {
        let att = Attachment::new("a.txt", b"secret".to_vec(), "text/plain");
        let dbg = format!("{att:?}");
        assert!(dbg.contains("a.txt"));
        assert!(!dbg.contains("secret"));
    }

    #[test]
    fn to_subject_variants() {
        let full = ParsedSubject {
            task_name: "Summary".into(),
            api: Some("openai".into()),
            model: Some("gpt-4o".into()),
        };
        assert_eq!(full.to_subject(), "Summary (openai:gpt-4o)");

        let api_only = ParsedSubject {
            model: None,
            ..full.clone()
        };
        assert_eq!(api_only.to_subject(), "Summary (openai)");

        assert_eq!(ParsedSubject::task("Summary").to_subject(), "Summary");
    }

    #[test]
    fn quota_message_mentions_limit_and_wait() {
        let r = Rejection::QuotaExceeded {
            max_requests: 3,
            retry_after_secs: 42,
        };
        let text = r.to_string();
        assert!(text.contains('3'));
        assert!(text.contains("42 seconds"));
        assert_eq!(r.label(), "quota_exceeded");
    }
}
