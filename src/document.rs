//! Document identity and format kinds.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::classifier;
use crate::error::PreviewError;

/// Classified document format category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Pdf,
    Image,
    PlainText,
    /// OLE compound-file formats (.doc, .xls, .ppt).
    LegacyOffice,
    /// Zip-container formats (.docx, .xlsx, .odt, .pptx).
    ModernOffice,
    Unsupported,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Image => "image",
            Self::PlainText => "plain_text",
            Self::LegacyOffice => "legacy_office",
            Self::ModernOffice => "modern_office",
            Self::Unsupported => "unsupported",
        }
    }
}

/// Stable identity for an open document: content fingerprint over
/// path + size + mtime. Survives process restarts, changes when the
/// file changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An open document: absolute path, fingerprint, resolved kind and page
/// count. `kind` and `page_count` are resolved once at open and never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct Document {
    path: PathBuf,
    id: DocumentId,
    kind: DocumentKind,
    page_count: usize,
    size_bytes: u64,
}

impl Document {
    /// Open a document: classify its format, fingerprint it and discover
    /// the page count. Fails only on classification/IO problems; an
    /// unknown extension yields `DocumentKind::Unsupported`, not an error.
    pub fn open(path: &Path) -> Result<Self, PreviewError> {
        let meta = std::fs::metadata(path)
            .map_err(|e| PreviewError::Io(format!("Cannot stat {}: {}", path.display(), e)))?;

        let kind = classifier::classify(path)?;
        let id = fingerprint(path, &meta);
        let page_count = crate::render::page_count(path, kind);

        tracing::info!(
            "[Document] Opened {} ({}, {} page(s), id {})",
            path.display(),
            kind.as_str(),
            page_count,
            id
        );

        Ok(Self {
            path: path.to_path_buf(),
            id,
            kind,
            page_count,
            size_bytes: meta.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Extension including the leading dot, lowercased (".pdf").
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default()
    }

    /// Header line for the preview surface: "PDF • 1.2 MB".
    pub fn info_line(&self) -> String {
        let ext = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_uppercase())
            .unwrap_or_else(|| "FILE".to_string());
        format!("{} • {}", ext, format_file_size(self.size_bytes))
    }

    /// Rebind the identity after a successful rename. The content is
    /// unchanged but path and mtime are not, so the fingerprint is
    /// recomputed from the new location.
    pub(crate) fn rebind(&mut self, new_path: PathBuf) -> Result<DocumentId, PreviewError> {
        let meta = std::fs::metadata(&new_path)
            .map_err(|e| PreviewError::Io(format!("Cannot stat {}: {}", new_path.display(), e)))?;
        let old_id = self.id.clone();
        self.id = fingerprint(&new_path, &meta);
        self.path = new_path;
        Ok(old_id)
    }
}

fn fingerprint(path: &Path, meta: &std::fs::Metadata) -> DocumentId {
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(meta.len().to_le_bytes());
    hasher.update(mtime.to_le_bytes());
    let hash = hasher.finalize();

    DocumentId(hex::encode(&hash[..8]))
}

/// Format a byte count for the preview header ("1.2 MB").
pub fn format_file_size(size_bytes: u64) -> String {
    if size_bytes == 0 {
        return "0 B".to_string();
    }

    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = size_bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512.0 B");
        assert_eq!(format_file_size(2048), "2.0 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_open_resolves_kind_and_id() {
        let mut file = NamedTempFile::with_suffix(".txt").unwrap();
        writeln!(file, "hello world").unwrap();

        let doc = Document::open(file.path()).unwrap();
        assert_eq!(doc.kind(), DocumentKind::PlainText);
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.extension(), ".txt");
        assert_eq!(doc.id().as_str().len(), 16);
    }

    #[test]
    fn test_fingerprint_distinguishes_paths() {
        let mut a = NamedTempFile::with_suffix(".txt").unwrap();
        let mut b = NamedTempFile::with_suffix(".txt").unwrap();
        writeln!(a, "same").unwrap();
        writeln!(b, "same").unwrap();

        let doc_a = Document::open(a.path()).unwrap();
        let doc_b = Document::open(b.path()).unwrap();
        assert_ne!(doc_a.id(), doc_b.id());
    }

    #[test]
    fn test_open_missing_file_is_io_error() {
        let err = Document::open(Path::new("/nonexistent/file.txt")).unwrap_err();
        assert!(matches!(err, PreviewError::Io(_)));
    }
}
