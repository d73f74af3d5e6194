//! Attachment text extraction by file extension.
//!
//! - `.txt .md .csv .json` → lossy UTF-8
//! - `.pdf` → `pdf-extract`
//! - `.docx` → `word/document.xml` from the zip container, one line per paragraph
//!
//! Anything else, or any extraction failure, yields an empty string.

use std::any::Any;
use std::io::{Cursor, Read};
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::pipeline::types::Attachment;

const PLAIN_TEXT_EXTENSIONS: &[&str] = &[".txt", ".md", ".csv", ".json"];

static PARAGRAPH_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</w:p>|<w:br\s*/>|<w:cr\s*/>").expect("valid regex"));
static TAB: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<w:tab\s*/>").expect("valid regex"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Extract readable text from an attachment.
pub fn extract_text(attachment: &Attachment) -> String {
    let ext = attachment.extension();
    let result = match ext.as_str() {
        e if PLAIN_TEXT_EXTENSIONS.contains(&e) => {
            Ok(String::from_utf8_lossy(&attachment.content).into_owned())
        }
        ".pdf" => extract_pdf(&attachment.content),
        ".docx" => extract_docx(&attachment.content),
        _ => return String::new(),
    };

    match result {
        Ok(text) => text,
        Err(reason) => {
            warn!(file = %attachment.filename, %reason, "Could not extract attachment text");
            String::new()
        }
    }
}

/// Whether [`extract_text`] understands this extension (`.pdf`, `.txt`, ...).
pub fn is_supported_extension(ext: &str) -> bool {
    let ext = ext.to_lowercase();
    PLAIN_TEXT_EXTENSIONS.contains(&ext.as_str()) || ext == ".pdf" || ext == ".docx"
}

/// `pdf-extract` panics on some malformed documents (missing font
/// resources, fonts without a subtype); those count as failures too.
fn extract_pdf(bytes: &[u8]) -> Result<String, String> {
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(panic) => Err(format!("PDF parser panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn extract_docx(bytes: &[u8]) -> Result<String, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|e| format!("not a Word document: {e}"))?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml).map_err(|e| e.to_string())?;
    Ok(docx_xml_to_text(&xml))
}

/// Flatten WordprocessingML to text: paragraphs and breaks become
/// newlines, tabs stay tabs, all other markup is dropped.
pub fn docx_xml_to_text(xml: &str) -> String {
    let text = PARAGRAPH_END.replace_all(xml, "\n");
    let text = TAB.replace_all(&text, "\t");
    let text = TAG.replace_all(&text, "");
    decode_entities(&text).trim_end().to_string()
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
