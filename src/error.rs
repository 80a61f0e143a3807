//! Error taxonomy for the preview/rename pipeline.
//!
//! Soft conditions (empty extraction, partial AI answers) are not errors:
//! they are flagged on the result instead, so the surface can degrade
//! gracefully. Everything here is scoped to one document/page/operation and
//! never aborts the process.

use std::path::PathBuf;
use thiserror::Error;

/// Failures from rendering and text extraction.
#[derive(Debug, Clone, Error)]
pub enum PreviewError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt document: {0}")]
    CorruptDocument(String),

    /// Designed degradation: the capability is simply not installed.
    #[error("Missing dependency: {capability}. {hint}")]
    MissingDependency { capability: String, hint: String },

    #[error("Cannot load image: {0}")]
    CannotLoadImage(String),

    #[error("Cannot decode text file: no supported encoding matched")]
    CannotDecodeText,

    #[error("Page {page} out of range (document has {page_count} pages)")]
    PageOutOfRange { page: usize, page_count: usize },

    /// Hard extraction failure, surfaced verbatim to the user.
    #[error("Extraction engine error: {0}")]
    ExtractionEngine(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Failures from the external AI metadata call.
#[derive(Debug, Clone, Error)]
pub enum AiError {
    /// No API key configured. Checked synchronously, before any request.
    #[error("AI analysis unavailable: no API key configured")]
    PreconditionMissing,

    /// Network, timeout or quota failure. Never retried automatically.
    #[error("AI request failed: {0}")]
    RequestFailed(String),

    /// The service answered but the answer was unusable.
    #[error("Could not parse AI response: {0}")]
    ParseFailed(String),
}

/// Failures from routing a text selection into a metadata field.
#[derive(Debug, Clone, Error)]
pub enum RouteError {
    #[error("Not a recognized date: \"{0}\"")]
    InvalidDateFormat(String),

    #[error("No text selected")]
    NoTextSelected,
}

/// Failures from the rename operation. A collision is not an error; it is
/// a [`crate::rename::RenameOutcome::NeedsConfirmation`].
#[derive(Debug, Error)]
pub enum RenameError {
    #[error("Failed to rename {source_path:?}: {reason}")]
    Io {
        source_path: PathBuf,
        reason: String,
    },

    #[error("No rename awaiting confirmation")]
    NothingPending,

    #[error("Invalid target filename: {0}")]
    InvalidTarget(String),
}

/// Top-level error surfaced to the host through the session.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Preview(#[from] PreviewError),

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Rename(#[from] RenameError),

    /// A second render/extract/analyze task was started for the same
    /// (document, page) while one was already running.
    #[error("A {0} task is already in flight for this page")]
    OperationInFlight(&'static str),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("No document open")]
    NoDocument,
}
