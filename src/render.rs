//! Page rendering: kind-specific conversion of one document page into a
//! displayable bitmap, plus page-count discovery.
//!
//! Zoom is a view-only transform over the cached base image
//! ([`RenderedPage::at_zoom`]); the document is never re-decoded per zoom
//! tick. Legacy Office rendering is refused with a structured
//! `MissingDependency` error rather than crashing.

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{imageops::FilterType, DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::Path;

use crate::document::{Document, DocumentKind};
use crate::error::PreviewError;

/// Placeholder page dimensions (A4 at 96 DPI).
const PAGE_WIDTH: u32 = 794;
const PAGE_HEIGHT: u32 = 1123;

/// Maximum page dimension when rendering PDF pages with pdfium.
#[cfg(feature = "pdfium")]
const MAX_PAGE_DIMENSION: u32 = 1600;

/// A rendered page bitmap, owned by the cache. The base image is rendered
/// once at default zoom; zooming scales this image without re-decoding.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    image: DynamicImage,
}

impl RenderedPage {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// View-only zoom transform over the already-rendered base image.
    pub fn at_zoom(&self, zoom: f32) -> DynamicImage {
        if (zoom - 1.0).abs() < f32::EPSILON {
            return self.image.clone();
        }
        let w = ((self.image.width() as f32) * zoom).round().max(1.0) as u32;
        let h = ((self.image.height() as f32) * zoom).round().max(1.0) as u32;
        self.image.resize(w, h, FilterType::Lanczos3)
    }

    /// Encode for transfer across the host boundary.
    pub fn to_png_base64(&self) -> Result<String, PreviewError> {
        let mut buffer = Cursor::new(Vec::new());
        self.image
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|e| PreviewError::Io(format!("Failed to encode page: {}", e)))?;
        Ok(STANDARD.encode(buffer.into_inner()))
    }
}

/// Render one page of the document to a bitmap. Blocking; callers on the
/// async surface go through `spawn_blocking`.
pub fn render_page(doc: &Document, page: usize) -> Result<RenderedPage, PreviewError> {
    if page >= doc.page_count() {
        return Err(PreviewError::PageOutOfRange {
            page,
            page_count: doc.page_count(),
        });
    }

    match doc.kind() {
        DocumentKind::Pdf => render_pdf_page(doc.path(), page),
        DocumentKind::Image => render_image(doc.path()),
        DocumentKind::PlainText => {
            // Validate the encoding up front; the synthetic page itself
            // carries no text pixels (the host shows the decoded text).
            decode_text_file(doc.path())?;
            Ok(placeholder_page())
        }
        DocumentKind::ModernOffice => Ok(placeholder_page()),
        DocumentKind::LegacyOffice => Err(PreviewError::MissingDependency {
            capability: "legacy Office rendering (.doc/.xls/.ppt)".to_string(),
            hint: "Convert the file to .docx/.xlsx/.pptx for a full preview".to_string(),
        }),
        DocumentKind::Unsupported => Err(PreviewError::UnsupportedFormat(
            doc.extension().trim_start_matches('.').to_uppercase(),
        )),
    }
}

/// Number of pages for a document at `path` of the given kind.
/// Non-paginated kinds are a single page.
pub fn page_count(path: &Path, kind: DocumentKind) -> usize {
    match kind {
        DocumentKind::Pdf => pdf_page_count(path),
        _ => 1,
    }
}

fn render_image(path: &Path) -> Result<RenderedPage, PreviewError> {
    let image = image::open(path)
        .map_err(|e| PreviewError::CannotLoadImage(format!("{}: {}", path.display(), e)))?;
    Ok(RenderedPage::new(image))
}

/// Blank light-gray page used for kinds previewed through text rather than
/// pixels (plain text, modern Office) and for PDFs without pdfium.
fn placeholder_page() -> RenderedPage {
    let mut img = RgbaImage::new(PAGE_WIDTH, PAGE_HEIGHT);
    for pixel in img.pixels_mut() {
        *pixel = Rgba([245, 245, 245, 255]);
    }
    RenderedPage::new(DynamicImage::ImageRgba8(img))
}

#[cfg(feature = "pdfium")]
fn render_pdf_page(path: &Path, page: usize) -> Result<RenderedPage, PreviewError> {
    use pdfium_render::prelude::*;

    let pdfium = Pdfium::default();

    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| PreviewError::CorruptDocument(format!("Failed to load PDF: {}", e)))?;

    let pdf_page = document
        .pages()
        .get(page as u16)
        .map_err(|e| PreviewError::CorruptDocument(format!("Failed to get page {}: {}", page, e)))?;

    let page_width = pdf_page.width().value;
    let page_height = pdf_page.height().value;
    let scale = MAX_PAGE_DIMENSION as f32 / page_width.max(page_height);
    let config = PdfRenderConfig::new()
        .set_target_width((page_width * scale) as i32)
        .set_target_height((page_height * scale) as i32)
        .render_form_data(true)
        .render_annotations(true);

    let bitmap = pdf_page
        .render_with_config(&config)
        .map_err(|e| PreviewError::ExtractionEngine(format!("Failed to render page: {}", e)))?;

    Ok(RenderedPage::new(bitmap.as_image()))
}

#[cfg(not(feature = "pdfium"))]
fn render_pdf_page(path: &Path, page: usize) -> Result<RenderedPage, PreviewError> {
    // Degraded mode without the pdfium library: the preview shows the
    // extracted text layer, backed by a blank page bitmap.
    tracing::warn!(
        "[Render] pdfium not available, placeholder render for page {} of {}",
        page,
        path.display()
    );
    Ok(placeholder_page())
}

#[cfg(feature = "pdfium")]
fn pdf_page_count(path: &Path) -> usize {
    use pdfium_render::prelude::*;

    let pdfium = Pdfium::default();
    match pdfium.load_pdf_from_file(path, None) {
        Ok(document) => (document.pages().len() as usize).max(1),
        Err(e) => {
            tracing::warn!("[Render] Failed to read page count: {}", e);
            1
        }
    }
}

#[cfg(not(feature = "pdfium"))]
fn pdf_page_count(path: &Path) -> usize {
    // Structural estimate: count page objects in the raw document.
    let Ok(bytes) = std::fs::read(path) else {
        return 1;
    };
    let pages = count_occurrences(&bytes, b"/Type /Page") + count_occurrences(&bytes, b"/Type/Page");
    let page_trees =
        count_occurrences(&bytes, b"/Type /Pages") + count_occurrences(&bytes, b"/Type/Pages");
    pages.saturating_sub(page_trees).max(1)
}

#[cfg(not(feature = "pdfium"))]
fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    if needle.is_empty() || haystack.len() < needle.len() {
        return 0;
    }
    haystack.windows(needle.len()).filter(|w| w == &needle).count()
}

/// Decode a plain-text file with charset detection: UTF-8 first, then
/// Windows-1252, then Latin-1. Files with NUL bytes are treated as binary.
pub fn decode_text_file(path: &Path) -> Result<String, PreviewError> {
    let bytes = std::fs::read(path)
        .map_err(|e| PreviewError::Io(format!("Cannot read {}: {}", path.display(), e)))?;
    decode_text_bytes(&bytes)
}

pub(crate) fn decode_text_bytes(bytes: &[u8]) -> Result<String, PreviewError> {
    if bytes.contains(&0) {
        return Err(PreviewError::CannotDecodeText);
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return Ok(text.to_string());
    }

    if let Some(text) = decode_windows_1252(bytes) {
        return Ok(text);
    }

    // Latin-1: every byte maps directly to the same code point.
    Ok(bytes.iter().map(|&b| b as char).collect())
}

/// Windows-1252 differs from Latin-1 only in 0x80..=0x9F. Five bytes in
/// that range are undefined; their presence rejects the encoding.
fn decode_windows_1252(bytes: &[u8]) -> Option<String> {
    const CP1252_HIGH: [char; 32] = [
        '€', '\u{81}', '‚', 'ƒ', '„', '…', '†', '‡', 'ˆ', '‰', 'Š', '‹', 'Œ', '\u{8D}', 'Ž',
        '\u{8F}', '\u{90}', '‘', '’', '“', '”', '•', '–', '—', '˜', '™', 'š', '›', 'œ', '\u{9D}',
        'ž', 'Ÿ',
    ];
    const UNDEFINED: [u8; 5] = [0x81, 0x8D, 0x8F, 0x90, 0x9D];

    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if UNDEFINED.contains(&b) {
            return None;
        }
        match b {
            0x80..=0x9F => out.push(CP1252_HIGH[(b - 0x80) as usize]),
            _ => out.push(b as char),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_decode_utf8() {
        assert_eq!(
            decode_text_bytes("héllo wörld".as_bytes()).unwrap(),
            "héllo wörld"
        );
    }

    #[test]
    fn test_decode_windows_1252_euro_sign() {
        // 0x80 is € in Windows-1252 and invalid UTF-8 alone.
        let decoded = decode_text_bytes(&[0x80, b' ', b'5', b'0']).unwrap();
        assert_eq!(decoded, "€ 50");
    }

    #[test]
    fn test_decode_latin1_fallback() {
        // 0x8D is undefined in Windows-1252, so Latin-1 takes over.
        let decoded = decode_text_bytes(&[b'a', 0x8D, b'b', 0xE9]).unwrap();
        assert_eq!(decoded.chars().count(), 4);
        assert!(decoded.ends_with('é'));
    }

    #[test]
    fn test_binary_content_cannot_decode() {
        let err = decode_text_bytes(&[b'a', 0, b'b']).unwrap_err();
        assert!(matches!(err, PreviewError::CannotDecodeText));
    }

    #[test]
    fn test_render_text_page_is_placeholder() {
        let mut file = NamedTempFile::with_suffix(".txt").unwrap();
        writeln!(file, "some text content").unwrap();

        let doc = Document::open(file.path()).unwrap();
        let page = render_page(&doc, 0).unwrap();
        assert_eq!(page.width(), PAGE_WIDTH);
        assert_eq!(page.height(), PAGE_HEIGHT);
    }

    #[test]
    fn test_render_image_page() {
        let img = RgbaImage::from_pixel(12, 8, Rgba([10, 20, 30, 255]));
        let file = NamedTempFile::with_suffix(".png").unwrap();
        img.save(file.path()).unwrap();

        let doc = Document::open(file.path()).unwrap();
        let page = render_page(&doc, 0).unwrap();
        assert_eq!((page.width(), page.height()), (12, 8));
    }

    #[test]
    fn test_render_broken_image_fails() {
        let mut file = NamedTempFile::with_suffix(".png").unwrap();
        file.write_all(b"not a png at all").unwrap();

        let doc = Document::open(file.path()).unwrap();
        let err = render_page(&doc, 0).unwrap_err();
        assert!(matches!(err, PreviewError::CannotLoadImage(_)));
    }

    #[test]
    fn test_legacy_office_render_refused() {
        let mut file = NamedTempFile::with_suffix(".doc").unwrap();
        file.write_all(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1])
            .unwrap();
        file.write_all(&[0u8; 32]).unwrap();

        let doc = Document::open(file.path()).unwrap();
        let err = render_page(&doc, 0).unwrap_err();
        match err {
            PreviewError::MissingDependency { capability, hint } => {
                assert!(capability.contains("legacy Office"));
                assert!(hint.contains(".docx"));
            }
            other => panic!("expected MissingDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_page_out_of_range() {
        let mut file = NamedTempFile::with_suffix(".txt").unwrap();
        writeln!(file, "one page only").unwrap();

        let doc = Document::open(file.path()).unwrap();
        let err = render_page(&doc, 3).unwrap_err();
        assert!(matches!(err, PreviewError::PageOutOfRange { page: 3, .. }));
    }

    #[test]
    fn test_zoom_is_view_transform() {
        let base = RenderedPage::new(DynamicImage::ImageRgba8(RgbaImage::new(100, 200)));
        let zoomed = base.at_zoom(0.5);
        assert_eq!((zoomed.width(), zoomed.height()), (50, 100));
        // Base image untouched.
        assert_eq!((base.width(), base.height()), (100, 200));
    }
}
