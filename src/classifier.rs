//! Format classification: extension table plus container sniffing for
//! ambiguous legacy extensions.
//!
//! Cheap and deterministic, so results are not cached here; the resolved
//! kind lives on the [`crate::document::Document`] for its lifetime.

use std::io::Read;
use std::path::Path;

use crate::document::DocumentKind;
use crate::error::PreviewError;

/// OLE compound-file signature. Legacy Office documents (.doc, .xls, .ppt)
/// must start with these bytes to be accepted.
const OLE_SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

const IMAGE_EXTS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tiff", "tif", "webp"];
const TEXT_EXTS: &[&str] = &["txt", "md", "csv", "log", "rtf"];
const MODERN_OFFICE_EXTS: &[&str] = &["docx", "xlsx", "odt", "pptx"];
const LEGACY_OFFICE_EXTS: &[&str] = &["doc", "xls", "ppt"];

/// Classify a file into a document kind.
///
/// Unknown extensions yield `Ok(DocumentKind::Unsupported)`; a legacy
/// Office extension whose container is not a valid OLE compound file is a
/// `CorruptDocument` error.
pub fn classify(path: &Path) -> Result<DocumentKind, PreviewError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    let kind = match ext.as_str() {
        "pdf" => DocumentKind::Pdf,
        e if IMAGE_EXTS.contains(&e) => DocumentKind::Image,
        e if TEXT_EXTS.contains(&e) => DocumentKind::PlainText,
        e if MODERN_OFFICE_EXTS.contains(&e) => DocumentKind::ModernOffice,
        e if LEGACY_OFFICE_EXTS.contains(&e) => {
            validate_ole_container(path)?;
            DocumentKind::LegacyOffice
        }
        _ => {
            tracing::debug!(
                "[Classifier] Unknown format {:?} for {} (mime guess: {:?})",
                ext,
                path.display(),
                mime_guess::from_path(path).first()
            );
            DocumentKind::Unsupported
        }
    };

    Ok(kind)
}

fn validate_ole_container(path: &Path) -> Result<(), PreviewError> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| PreviewError::Io(format!("Cannot open {}: {}", path.display(), e)))?;

    let mut header = [0u8; 8];
    let read = file
        .read(&mut header)
        .map_err(|e| PreviewError::Io(format!("Cannot read {}: {}", path.display(), e)))?;

    if read < 8 || header != OLE_SIGNATURE {
        return Err(PreviewError::CorruptDocument(format!(
            "{} has a legacy Office extension but is not a valid OLE compound file",
            path.display()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_extension_table() {
        assert_eq!(
            classify(Path::new("a.pdf")).unwrap(),
            DocumentKind::Pdf
        );
        assert_eq!(
            classify(Path::new("photo.JPEG")).unwrap(),
            DocumentKind::Image
        );
        assert_eq!(
            classify(Path::new("notes.txt")).unwrap(),
            DocumentKind::PlainText
        );
        assert_eq!(
            classify(Path::new("report.docx")).unwrap(),
            DocumentKind::ModernOffice
        );
        assert_eq!(
            classify(Path::new("archive.zip")).unwrap(),
            DocumentKind::Unsupported
        );
        assert_eq!(
            classify(Path::new("noextension")).unwrap(),
            DocumentKind::Unsupported
        );
    }

    #[test]
    fn test_legacy_extension_with_valid_ole_header() {
        let mut file = NamedTempFile::with_suffix(".doc").unwrap();
        file.write_all(&OLE_SIGNATURE).unwrap();
        file.write_all(&[0u8; 64]).unwrap();

        assert_eq!(
            classify(file.path()).unwrap(),
            DocumentKind::LegacyOffice
        );
    }

    #[test]
    fn test_legacy_extension_with_bad_container_is_corrupt() {
        let mut file = NamedTempFile::with_suffix(".xls").unwrap();
        file.write_all(b"this is definitely not OLE").unwrap();

        let err = classify(file.path()).unwrap_err();
        assert!(matches!(err, PreviewError::CorruptDocument(_)));
    }
}
