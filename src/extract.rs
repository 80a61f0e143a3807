//! Text acquisition per document kind: embedded text layers, OCR over
//! rendered bitmaps, and decoded plain text.
//!
//! An empty result is not a failure: it is flagged `no_text_found` so the
//! surface can degrade, distinct from a hard `ExtractionEngine` error that
//! is reported verbatim.

use calamine::{open_workbook, Reader, Xls, Xlsx};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::document::{Document, DocumentKind};
use crate::error::PreviewError;
use crate::ocr::OcrEngine;
use crate::render::{self, RenderedPage};

/// Maximum text length retained per page (guards against huge documents).
const MAX_TEXT_LENGTH: usize = 500_000;

/// Below this the embedded PDF text layer is considered empty and OCR is
/// tried instead (scanned/image-based PDFs).
const MIN_EMBEDDED_LENGTH: usize = 50;

/// How a page's text was acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    None,
    Embedded,
    Ocr,
    Decoded,
}

/// Extracted text for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextResult {
    pub text: String,
    pub mode: ExtractionMode,
    /// Soft flag: extraction ran fine but found nothing.
    pub no_text_found: bool,
    /// The source had more text than the retained bound; the surface shows
    /// a truncation notice.
    pub truncated: bool,
}

impl TextResult {
    fn new(text: String, mode: ExtractionMode) -> Self {
        let bounded = truncate_text(&text);
        let truncated = bounded.len() < text.len();
        let no_text_found = bounded.trim().is_empty();
        Self {
            text: bounded,
            mode,
            no_text_found,
            truncated,
        }
    }
}

/// Extract with an explicit mode preference. `Some(ExtractionMode::Ocr)`
/// forces OCR over the rendered page even when an embedded layer exists
/// (the user switching a garbled text layer to OCR); anything else uses
/// the per-kind dispatch. `rendered` supplies an already-rendered base
/// bitmap so OCR never re-renders a cached page.
pub fn extract_text_with_mode(
    doc: &Document,
    page: usize,
    ocr: &OcrEngine,
    mode: Option<ExtractionMode>,
    rendered: Option<Arc<RenderedPage>>,
) -> Result<TextResult, PreviewError> {
    if matches!(mode, Some(ExtractionMode::Ocr)) {
        if page >= doc.page_count() {
            return Err(PreviewError::PageOutOfRange {
                page,
                page_count: doc.page_count(),
            });
        }
        return extract_via_ocr(doc, page, ocr, rendered);
    }
    extract_text(doc, page, ocr, rendered)
}

/// Extract text for one page of the document. Blocking; callers on the
/// async surface go through `spawn_blocking`.
pub fn extract_text(
    doc: &Document,
    page: usize,
    ocr: &OcrEngine,
    rendered: Option<Arc<RenderedPage>>,
) -> Result<TextResult, PreviewError> {
    if page >= doc.page_count() {
        return Err(PreviewError::PageOutOfRange {
            page,
            page_count: doc.page_count(),
        });
    }

    let result = match doc.kind() {
        DocumentKind::Pdf => extract_pdf(doc, page, ocr, rendered)?,
        DocumentKind::Image => extract_via_ocr(doc, page, ocr, rendered)?,
        DocumentKind::PlainText => {
            let text = render::decode_text_file(doc.path())?;
            TextResult::new(clean_text(&text), ExtractionMode::Decoded)
        }
        DocumentKind::ModernOffice => extract_modern_office(doc.path())?,
        DocumentKind::LegacyOffice => extract_legacy_office(doc.path())?,
        DocumentKind::Unsupported => {
            return Err(PreviewError::UnsupportedFormat(
                doc.extension().trim_start_matches('.').to_uppercase(),
            ))
        }
    };

    tracing::debug!(
        "[Extract] {} page {}: {} chars via {:?} (empty: {})",
        doc.file_name(),
        page,
        result.text.len(),
        result.mode,
        result.no_text_found
    );

    Ok(result)
}

/// PDF: prefer the embedded text layer; fall back to OCR over the rendered
/// page when the layer is empty or absent (scanned documents).
fn extract_pdf(
    doc: &Document,
    page: usize,
    ocr: &OcrEngine,
    rendered: Option<Arc<RenderedPage>>,
) -> Result<TextResult, PreviewError> {
    let bytes = std::fs::read(doc.path())
        .map_err(|e| PreviewError::Io(format!("Cannot read {}: {}", doc.path().display(), e)))?;

    // The pdf-extract crate can panic on malformed fonts/glyphs.
    let pages = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(&bytes)
    })) {
        Ok(Ok(pages)) => pages,
        Ok(Err(e)) => {
            return Err(PreviewError::ExtractionEngine(format!(
                "PDF text extraction failed: {}",
                e
            )))
        }
        Err(_panic) => {
            tracing::error!(
                "[Extract] PDF extraction panicked for {} (malformed font/glyph)",
                doc.path().display()
            );
            return Err(PreviewError::ExtractionEngine(
                "PDF extraction panicked, the file likely contains malformed fonts".to_string(),
            ));
        }
    };

    let embedded = clean_text(pages.get(page).map(String::as_str).unwrap_or(""));

    if embedded.len() >= MIN_EMBEDDED_LENGTH {
        return Ok(TextResult::new(embedded, ExtractionMode::Embedded));
    }

    tracing::info!(
        "[Extract] Embedded layer too short ({} chars) for page {} of {}, trying OCR",
        embedded.len(),
        page,
        doc.file_name()
    );

    match extract_via_ocr(doc, page, ocr, rendered) {
        Ok(result) => Ok(result),
        // OCR not installed: degrade to the (possibly empty) embedded layer.
        Err(PreviewError::MissingDependency { capability, .. }) => {
            tracing::warn!("[Extract] OCR unavailable ({}), keeping embedded layer", capability);
            Ok(TextResult::new(embedded, ExtractionMode::Embedded))
        }
        Err(other) => Err(other),
    }
}

fn extract_via_ocr(
    doc: &Document,
    page: usize,
    ocr: &OcrEngine,
    rendered: Option<Arc<RenderedPage>>,
) -> Result<TextResult, PreviewError> {
    let rendered = match rendered {
        Some(base) => base,
        None => Arc::new(render::render_page(doc, page)?),
    };
    let text = ocr.recognize(rendered.image())?;
    Ok(TextResult::new(clean_text(&text), ExtractionMode::Ocr))
}

fn extract_modern_office(path: &Path) -> Result<TextResult, PreviewError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "docx" => extract_docx(path),
        "xlsx" => extract_workbook::<Xlsx<_>>(path),
        other => Err(PreviewError::MissingDependency {
            capability: format!(".{} text extraction", other),
            hint: "Convert the file to .docx or .xlsx for a text preview".to_string(),
        }),
    }
}

fn extract_legacy_office(path: &Path) -> Result<TextResult, PreviewError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        // calamine reads the legacy binary spreadsheet format directly.
        "xls" => extract_workbook::<Xls<_>>(path),
        other => Err(PreviewError::MissingDependency {
            capability: format!("legacy .{} text extraction", other),
            hint: "Convert the file to its modern Office equivalent".to_string(),
        }),
    }
}

fn extract_docx(path: &Path) -> Result<TextResult, PreviewError> {
    let bytes = std::fs::read(path)
        .map_err(|e| PreviewError::Io(format!("Cannot read {}: {}", path.display(), e)))?;

    let doc = docx_rs::read_docx(&bytes)
        .map_err(|e| PreviewError::ExtractionEngine(format!("Failed to parse DOCX: {}", e)))?;

    let mut all_text = String::new();
    for child in doc.document.children {
        collect_docx_text(&child, &mut all_text);
    }

    Ok(TextResult::new(
        clean_text(&all_text),
        ExtractionMode::Embedded,
    ))
}

fn collect_docx_text(element: &docx_rs::DocumentChild, output: &mut String) {
    match element {
        docx_rs::DocumentChild::Paragraph(para) => {
            for child in &para.children {
                match child {
                    docx_rs::ParagraphChild::Run(run) => push_run_text(run, output),
                    docx_rs::ParagraphChild::Hyperlink(link) => {
                        for run in &link.children {
                            if let docx_rs::ParagraphChild::Run(r) = run {
                                push_run_text(r, output);
                            }
                        }
                    }
                    _ => {}
                }
            }
            output.push('\n');
        }
        docx_rs::DocumentChild::Table(table) => {
            for row in &table.rows {
                let docx_rs::TableChild::TableRow(tr) = row;
                for cell in &tr.cells {
                    let docx_rs::TableRowChild::TableCell(tc) = cell;
                    for child in &tc.children {
                        if let docx_rs::TableCellContent::Paragraph(para) = child {
                            for p_child in &para.children {
                                if let docx_rs::ParagraphChild::Run(run) = p_child {
                                    push_run_text(run, output);
                                }
                            }
                            output.push_str(" | ");
                        }
                    }
                }
                output.push('\n');
            }
        }
        _ => {}
    }
}

fn push_run_text(run: &docx_rs::Run, output: &mut String) {
    for child in &run.children {
        if let docx_rs::RunChild::Text(text) = child {
            output.push_str(&text.text);
        }
    }
}

fn extract_workbook<R>(path: &Path) -> Result<TextResult, PreviewError>
where
    R: Reader<std::io::BufReader<std::fs::File>>,
    R::Error: std::fmt::Display,
{
    let mut workbook: R = open_workbook(path).map_err(|e| {
        PreviewError::ExtractionEngine(format!("Failed to open workbook: {}", e))
    })?;

    let mut all_text = String::new();
    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();

    for sheet_name in &sheet_names {
        if let Ok(range) = workbook.worksheet_range(sheet_name) {
            all_text.push_str(&format!("=== Sheet: {} ===\n", sheet_name));
            for row in range.rows() {
                let row_text: Vec<String> = row
                    .iter()
                    .map(|cell| cell.to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if !row_text.is_empty() {
                    all_text.push_str(&row_text.join(" | "));
                    all_text.push('\n');
                }
            }
        }
    }

    Ok(TextResult::new(
        clean_text(&all_text),
        ExtractionMode::Embedded,
    ))
}

/// Trim per-line whitespace and drop empty lines.
fn clean_text(text: &str) -> String {
    text.lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Truncate to `MAX_TEXT_LENGTH`, preferring paragraph, sentence, then word
/// boundaries.
fn truncate_text(text: &str) -> String {
    if text.len() <= MAX_TEXT_LENGTH {
        return text.to_string();
    }

    let mut end = MAX_TEXT_LENGTH;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let truncated = &text[..end];

    if let Some(pos) = truncated.rfind("\n\n") {
        return truncated[..pos].to_string();
    }
    if let Some(pos) = truncated.rfind(". ") {
        return truncated[..=pos].to_string();
    }
    if let Some(pos) = truncated.rfind(' ') {
        return truncated[..pos].to_string();
    }
    truncated.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_plain_text_extraction() {
        let mut file = NamedTempFile::with_suffix(".txt").unwrap();
        writeln!(file, "This is a test document with some content.").unwrap();
        writeln!(file, "It has multiple lines.").unwrap();

        let doc = Document::open(file.path()).unwrap();
        let ocr = OcrEngine::new();
        let result = extract_text(&doc, 0, &ocr, None).unwrap();

        assert_eq!(result.mode, ExtractionMode::Decoded);
        assert!(result.text.contains("test document"));
        assert!(!result.no_text_found);
    }

    #[test]
    fn test_empty_text_is_soft_no_text_found() {
        let mut file = NamedTempFile::with_suffix(".txt").unwrap();
        writeln!(file, "   \n\t\n  ").unwrap();

        let doc = Document::open(file.path()).unwrap();
        let result = extract_text(&doc, 0, &OcrEngine::new(), None).unwrap();
        assert!(result.no_text_found);
        assert_eq!(result.mode, ExtractionMode::Decoded);
    }

    #[test]
    fn test_image_without_ocr_is_missing_dependency() {
        let img = image::RgbaImage::new(4, 4);
        let file = NamedTempFile::with_suffix(".png").unwrap();
        img.save(file.path()).unwrap();

        let doc = Document::open(file.path()).unwrap();
        let ocr = OcrEngine::with_binary("definitely-not-a-real-ocr-binary");
        let err = extract_text(&doc, 0, &ocr, None).unwrap_err();
        assert!(matches!(err, PreviewError::MissingDependency { .. }));
    }

    #[test]
    fn test_forced_ocr_mode_skips_the_text_layer() {
        let mut file = NamedTempFile::with_suffix(".txt").unwrap();
        writeln!(file, "plenty of decodable text that OCR mode must ignore").unwrap();

        let doc = Document::open(file.path()).unwrap();
        let ocr = OcrEngine::with_binary("definitely-not-a-real-ocr-binary");

        // Automatic dispatch decodes the file fine.
        let auto = extract_text_with_mode(&doc, 0, &ocr, None, None).unwrap();
        assert_eq!(auto.mode, ExtractionMode::Decoded);

        // Forced OCR goes to the engine instead, whose absence surfaces.
        let err = extract_text_with_mode(&doc, 0, &ocr, Some(ExtractionMode::Ocr), None)
            .unwrap_err();
        assert!(matches!(err, PreviewError::MissingDependency { .. }));
    }

    #[test]
    fn test_ocr_reuses_provided_render() {
        let img = image::RgbaImage::new(4, 4);
        let file = NamedTempFile::with_suffix(".png").unwrap();
        img.save(file.path()).unwrap();

        let doc = Document::open(file.path()).unwrap();
        let rendered = Arc::new(crate::render::render_page(&doc, 0).unwrap());

        // Remove the source; re-rendering would now fail with
        // CannotLoadImage, so reaching the engine proves the provided
        // bitmap was used.
        std::fs::remove_file(file.path()).unwrap();

        let ocr = OcrEngine::with_binary("definitely-not-a-real-ocr-binary");
        let err = extract_text(&doc, 0, &ocr, Some(rendered)).unwrap_err();
        assert!(matches!(err, PreviewError::MissingDependency { .. }));
    }

    #[test]
    fn test_clean_text() {
        let messy = "  Line 1  \n\n  Line 2  \n  \n  Line 3  ";
        assert_eq!(clean_text(messy), "Line 1\nLine 2\nLine 3");
    }

    #[test]
    fn test_truncate_text_respects_limit() {
        let long_text = "a ".repeat(300_000);
        assert!(truncate_text(&long_text).len() <= MAX_TEXT_LENGTH);
    }

    #[test]
    fn test_oversized_text_is_flagged_truncated() {
        let mut file = NamedTempFile::with_suffix(".txt").unwrap();
        write!(file, "{}", "word ".repeat(150_000)).unwrap();

        let doc = Document::open(file.path()).unwrap();
        let result = extract_text(&doc, 0, &OcrEngine::new(), None).unwrap();
        assert!(result.truncated);
        assert!(result.text.len() <= MAX_TEXT_LENGTH);
    }
}
