//! Document helpers: attachment text extraction and Markdown → PDF.
//!
//! Both sit behind small traits so the dispatcher can be exercised with
//! stubs.

pub mod extract;
pub mod render;

use crate::error::RenderError;
use crate::pipeline::types::Attachment;

pub use extract::extract_text;
pub use render::render_markdown_pdf;

/// Turns an attachment into plain text (empty for unsupported types).
pub trait TextExtractor: Send + Sync {
    fn extract(&self, attachment: &Attachment) -> String;
}

/// Turns Markdown into a binary document.
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, markdown: &str) -> Result<Vec<u8>, RenderError>;
}

/// Extension-based extractor (text, PDF, DOCX).
#[derive(Debug, Default, Clone, Copy)]
pub struct FileExtractor;

impl TextExtractor for FileExtractor {
    fn extract(&self, attachment: &Attachment) -> String {
        extract_text(attachment)
    }
}

/// Markdown → A4 PDF renderer.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfRenderer;

impl DocumentRenderer for PdfRenderer {
    fn render(&self, markdown: &str) -> Result<Vec<u8>, RenderError> {
        render_markdown_pdf(markdown)
    }
}
