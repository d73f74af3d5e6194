//! Attachment policy: count ceiling, extension allow-list, size ceiling.

use tracing::warn;

use crate::config::AppSettings;
use crate::pipeline::types::{Attachment, Rejection};

/// Limits applied to attachments before their text is extracted.
#[derive(Debug, Clone)]
pub struct AttachmentPolicy {
    pub max_attachments: usize,
    pub max_size_bytes: usize,
    /// Lower-cased, dot-prefixed (`.pdf`).
    pub allowed_extensions: Vec<String>,
}

/// Why a single attachment was left out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Extension(String),
    TooLarge { size: usize, max: usize },
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extension(ext) if ext.is_empty() => f.write_str("file has no extension"),
            Self::Extension(ext) => write!(f, "extension {ext} is not allowed"),
            Self::TooLarge { size, max } => write!(f, "{size} bytes exceeds the {max} byte limit"),
        }
    }
}

impl AttachmentPolicy {
    pub fn new(max_attachments: usize, max_size_bytes: usize, allowed_extensions: &[String]) -> Self {
        Self {
            max_attachments,
            max_size_bytes,
            allowed_extensions: allowed_extensions.iter().map(|e| normalize_extension(e)).collect(),
        }
    }

    pub fn from_settings(settings: &AppSettings) -> Self {
        Self::new(
            settings.max_attachments,
            settings.max_attachment_size,
            &settings.allowed_extensions,
        )
    }

    /// Check a single attachment against the extension and size limits.
    pub fn check(&self, attachment: &Attachment) -> Result<(), DropReason> {
        let ext = attachment.extension();
        if !self.allowed_extensions.iter().any(|a| *a == ext) {
            return Err(DropReason::Extension(ext));
        }
        if attachment.size() > self.max_size_bytes {
            return Err(DropReason::TooLarge {
                size: attachment.size(),
                max: self.max_size_bytes,
            });
        }
        Ok(())
    }

    /// Apply the policy to a message's attachments.
    ///
    /// Too many attachments rejects the whole message before any single
    /// attachment is looked at. Otherwise disallowed or oversized files are
    /// logged and dropped; the rest keep their original order.
    pub fn filter(&self, attachments: Vec<Attachment>) -> Result<Vec<Attachment>, Rejection> {
        if attachments.len() > self.max_attachments {
            return Err(Rejection::TooManyAttachments {
                count: attachments.len(),
                max: self.max_attachments,
            });
        }

        Ok(attachments
            .into_iter()
            .filter(|att| match self.check(att) {
                Ok(()) => true,
                Err(reason) => {
                    warn!(file = %att.filename, %reason, "Dropping attachment");
                    false
                }
            })
            .collect())
    }
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') { ext } else { format!(".{ext}") }
}
