//! Markdown → PDF.
//!
//! Markdown is first flattened into styled lines ([`layout_markdown`]),
//! then word-wrapped and laid out on A4 pages. Text is set in embedded
//! DejaVu faces, so any script those fonts cover survives intact.

use printpdf::{IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference};
use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};

use crate::error::RenderError;

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 20.0;
const PT_TO_MM: f32 = 0.3528;
const LINE_SPACING: f32 = 1.4;

// ── Layout ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Heading(u8),
    Body,
    Code,
    Table,
    Rule,
    Blank,
}

impl LineStyle {
    fn font_size(self) -> f32 {
        match self {
            LineStyle::Heading(1) => 18.0,
            LineStyle::Heading(2) => 15.0,
            LineStyle::Heading(_) => 13.0,
            LineStyle::Code => 9.5,
            LineStyle::Table => 10.0,
            LineStyle::Body | LineStyle::Rule | LineStyle::Blank => 11.0,
        }
    }

    /// Average glyph width as a fraction of the font size.
    fn glyph_width(self) -> f32 {
        match self {
            LineStyle::Code | LineStyle::Table | LineStyle::Heading(_) => 0.6,
            _ => 0.55,
        }
    }

    fn line_height_mm(self) -> f32 {
        self.font_size() * PT_TO_MM * LINE_SPACING
    }

    fn max_chars(self) -> usize {
        let usable = PAGE_WIDTH_MM - 2.0 * MARGIN_MM;
        let per_char = self.font_size() * PT_TO_MM * self.glyph_width();
        ((usable / per_char) as usize).max(10)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledLine {
    pub style: LineStyle,
    pub text: String,
}

impl StyledLine {
    fn new(style: LineStyle, text: impl Into<String>) -> Self {
        Self {
            style,
            text: text.into(),
        }
    }
}

#[derive(Default)]
struct LayoutState {
    lines: Vec<StyledLine>,
    buf: String,
    style: Option<LineStyle>,
    lists: Vec<Option<u64>>,
    item_prefix: Option<String>,
    in_code: bool,
    cells: Vec<String>,
    in_table: bool,
}

impl LayoutState {
    fn indent(&self) -> String {
        "  ".repeat(self.lists.len().saturating_sub(1))
    }

    fn flush(&mut self) {
        let text = std::mem::take(&mut self.buf);
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let style = self.style.unwrap_or(LineStyle::Body);
        let line = match self.item_prefix.take() {
            Some(prefix) => format!("{prefix}{text}"),
            None if !self.lists.is_empty() => format!("{}  {text}", self.indent()),
            None => text.to_string(),
        };
        self.lines.push(StyledLine::new(style, line));
    }

    fn blank(&mut self) {
        if !matches!(self.lines.last(), None | Some(StyledLine { style: LineStyle::Blank, .. })) {
            self.lines.push(StyledLine::new(LineStyle::Blank, ""));
        }
    }
}

fn heading_rank(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Flatten Markdown into styled, unwrapped lines.
pub fn layout_markdown(markdown: &str) -> Vec<StyledLine> {
    let mut st = LayoutState::default();
    let parser = Parser::new_ext(markdown, Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH);

    for event in parser {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                st.flush();
                st.style = Some(LineStyle::Heading(heading_rank(level)));
            }
            Event::End(TagEnd::Heading(_)) => {
                st.flush();
                st.style = None;
                st.blank();
            }
            Event::End(TagEnd::Paragraph) => {
                st.flush();
                if st.lists.is_empty() {
                    st.blank();
                }
            }
            Event::Start(Tag::List(start)) => {
                st.flush();
                st.lists.push(start);
            }
            Event::End(TagEnd::List(_)) => {
                st.flush();
                st.lists.pop();
                if st.lists.is_empty() {
                    st.blank();
                }
            }
            Event::Start(Tag::Item) => {
                st.flush();
                let indent = st.indent();
                let marker = match st.lists.last_mut() {
                    Some(Some(n)) => {
                        let marker = format!("{n}. ");
                        *n += 1;
                        marker
                    }
                    _ => "- ".to_string(),
                };
                st.item_prefix = Some(format!("{indent}{marker}"));
            }
            Event::End(TagEnd::Item) => st.flush(),
            Event::Start(Tag::CodeBlock(_)) => {
                st.flush();
                st.in_code = true;
            }
            Event::End(TagEnd::CodeBlock) => {
                st.in_code = false;
                st.blank();
            }
            Event::Start(Tag::Table(_)) => {
                st.flush();
                st.in_table = true;
            }
            Event::End(TagEnd::TableCell) => {
                let cell = std::mem::take(&mut st.buf);
                st.cells.push(cell.trim().to_string());
            }
            Event::End(TagEnd::TableHead) | Event::End(TagEnd::TableRow) => {
                let row = std::mem::take(&mut st.cells).join(" | ");
                st.lines.push(StyledLine::new(LineStyle::Table, row));
            }
            Event::End(TagEnd::Table) => {
                st.in_table = false;
                st.blank();
            }
            Event::Text(text) if st.in_code => {
                for line in text.trim_end_matches('\n').split('\n') {
                    st.lines.push(StyledLine::new(LineStyle::Code, line));
                }
            }
            Event::Text(text) | Event::Code(text) => st.buf.push_str(&text),
            Event::SoftBreak => st.buf.push(' '),
            Event::HardBreak if !st.in_table => st.flush(),
            Event::Rule => {
                st.flush();
                st.lines.push(StyledLine::new(LineStyle::Rule, ""));
                st.blank();
            }
            _ => {}
        }
    }
    st.flush();

    while matches!(st.lines.last(), Some(StyledLine { style: LineStyle::Blank, .. })) {
        st.lines.pop();
    }
    st.lines
}

/// Greedy word wrap; words longer than `max` are split.
pub fn wrap(text: &str, max: usize) -> Vec<String> {
    let max = max.max(1);
    let mut out = Vec::new();
    let mut line = String::new();

    for word in text.split(' ') {
        let mut word = word.to_string();
        while word.chars().count() > max {
            if !line.is_empty() {
                out.push(std::mem::take(&mut line));
            }
            let head: String = word.chars().take(max).collect();
            word = word.chars().skip(max).collect();
            out.push(head);
        }
        let needed = if line.is_empty() { 0 } else { 1 } + word.chars().count();
        if line.chars().count() + needed > max && !line.is_empty() {
            out.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(&word);
    }
    if !line.is_empty() || out.is_empty() {
        out.push(line);
    }
    out
}

/// Tabs become four spaces; other control characters have no glyph.
fn printable(text: &str) -> String {
    text.replace('\t', "    ")
        .chars()
        .filter(|c| !c.is_control())
        .collect()
}

// ── PDF output ──────────────────────────────────────────────────────

const REGULAR_TTF: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");
const BOLD_TTF: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans-Bold.ttf");
const MONO_TTF: &[u8] = include_bytes!("../../assets/fonts/DejaVuSansMono.ttf");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Face {
    Regular,
    Bold,
    Mono,
}

impl Face {
    fn for_style(style: LineStyle) -> Self {
        match style {
            LineStyle::Heading(_) => Face::Bold,
            LineStyle::Code | LineStyle::Table => Face::Mono,
            _ => Face::Regular,
        }
    }

    fn ttf(self) -> &'static [u8] {
        match self {
            Face::Regular => REGULAR_TTF,
            Face::Bold => BOLD_TTF,
            Face::Mono => MONO_TTF,
        }
    }
}

/// Faces are embedded on first use so a plain-text result only carries
/// one font file.
struct Fonts<'a> {
    doc: &'a PdfDocumentReference,
    loaded: Vec<(Face, IndirectFontRef)>,
}

impl<'a> Fonts<'a> {
    fn new(doc: &'a PdfDocumentReference) -> Self {
        Self {
            doc,
            loaded: Vec::new(),
        }
    }

    fn get(&mut self, face: Face) -> Result<IndirectFontRef, RenderError> {
        if let Some((_, font)) = self.loaded.iter().find(|(f, _)| *f == face) {
            return Ok(font.clone());
        }
        let font = self
            .doc
            .add_external_font(face.ttf())
            .map_err(|e| RenderError::Pdf(format!("font {face:?}: {e}")))?;
        self.loaded.push((face, font.clone()));
        Ok(font)
    }
}

/// Render Markdown to an A4 PDF document.
pub fn render_markdown_pdf(markdown: &str) -> Result<Vec<u8>, RenderError> {
    let (doc, page, layer) = PdfDocument::new(
        "Task result",
        Mm(PAGE_WIDTH_MM),
        Mm(PAGE_HEIGHT_MM),
        "content",
    );
    let mut fonts = Fonts::new(&doc);

    let mut current: PdfLayerReference = doc.get_page(page).get_layer(layer);
    let mut y = PAGE_HEIGHT_MM - MARGIN_MM;

    for line in layout_markdown(markdown) {
        let height = line.style.line_height_mm();
        let rows = match line.style {
            LineStyle::Blank => vec![String::new()],
            LineStyle::Rule => vec!["-".repeat(line.style.max_chars())],
            _ => wrap(&printable(&line.text), line.style.max_chars()),
        };

        for row in rows {
            if y - height < MARGIN_MM {
                let (p, l) = doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "content");
                current = doc.get_page(p).get_layer(l);
                y = PAGE_HEIGHT_MM - MARGIN_MM;
            }
            y -= height;
            if !row.is_empty() {
                let font = fonts.get(Face::for_style(line.style))?;
                current.use_text(row, line.style.font_size(), Mm(MARGIN_MM), Mm(y), &font);
            }
        }
    }

    drop(fonts);
    doc.save_to_bytes()
        .map_err(|e| RenderError::Pdf(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(lines: &[StyledLine]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn headings_and_paragraphs() {
        let lines = layout_markdown("# Title\n\nSome *emphasised*\ntext.\n\n## Sub\n");
        assert_eq!(lines[0], StyledLine::new(LineStyle::Heading(1), "Title"));
        assert_eq!(lines[1].style, LineStyle::Blank);
        assert_eq!(lines[2], StyledLine::new(LineStyle::Body, "Some emphasised text."));
        assert_eq!(lines.last().unwrap().style, LineStyle::Heading(2));
    }

    #[test]
    fn bullet_and_numbered_lists() {
        let lines = layout_markdown("- one\n- two\n  - nested\n\n3. c\n4. d\n");
        assert_eq!(
            texts(&lines),
            vec!["- one", "- two", "  - nested", "", "3. c", "4. d"]
        );
    }

    #[test]
    fn code_blocks_keep_lines() {
        let lines = layout_markdown("```\nfn main() {\n    x();\n}\n```\n");
        assert!(lines.iter().all(|l| l.style == LineStyle::Code));
        assert_eq!(texts(&lines), vec!["fn main() {", "    x();", "}"]);
    }

    #[test]
    fn tables_become_pipe_rows() {
        let lines = layout_markdown("| a | b |\n|---|---|\n| 1 | 2 |\n");
        assert_eq!(texts(&lines), vec!["a | b", "1 | 2"]);
        assert!(lines.iter().all(|l| l.style == LineStyle::Table));
    }

    #[test]
    fn wrap_respects_width() {
        let rows = wrap("the quick brown fox jumps", 10);
        assert_eq!(rows, vec!["the quick", "brown fox", "jumps"]);
        assert!(rows.iter().all(|r| r.chars().count() <= 10));
    }

    #[test]
    fn wrap_splits_long_words() {
        assert_eq!(wrap("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(wrap("", 4), vec![""]);
    }

    #[test]
    fn printable_keeps_unicode_and_expands_tabs() {
        assert_eq!(printable("“hi” – it’s"), "“hi” – it’s");
        assert_eq!(printable("a\tb\u{7}"), "a    b");
    }

    #[test]
    fn accented_text_survives_rendering() {
        let bytes = render_markdown_pdf("# Shrnutí úkolu\n\nčeský text: é ů č\n").unwrap();
        let text = pdf_extract::extract_text_from_mem(&bytes).unwrap();
        for c in ['í', 'ú', 'č', 'é', 'ů'] {
            assert!(text.contains(c), "{c} missing from {text:?}");
        }
        assert!(!text.contains('?'));
    }

    #[test]
    fn only_used_faces_are_embedded() {
        let plain = render_markdown_pdf("just a paragraph").unwrap();
        let mixed = render_markdown_pdf("# Title\n\n```\ncode\n```\n\nbody").unwrap();
        assert!(mixed.len() > plain.len());
    }

    #[test]
    fn renders_pdf_bytes() {
        let bytes = render_markdown_pdf("# Report\n\nHello **world**.\n\n- a\n- b\n").unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn long_documents_paginate() {
        let md = (0..300).map(|i| format!("Paragraph {i}\n\n")).collect::<String>();
        let bytes = render_markdown_pdf(&md).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn empty_markdown_still_renders() {
        assert!(render_markdown_pdf("").unwrap().starts_with(b"%PDF"));
    }
}
