//! Document preview and AI-assisted rename pipeline.
//!
//! A host surface opens a document through [`DocumentSession`], pages
//! through rendered previews, extracts text (embedded layer, OCR or
//! charset-decoded), asks an external AI service for naming metadata,
//! lets the user route selections into the rename fields, and finally
//! performs a guarded in-place rename.

pub mod ai;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod credentials;
pub mod document;
pub mod error;
pub mod extract;
pub mod filename;
pub mod metadata;
pub mod ocr;
pub mod render;
pub mod rename;
pub mod session;

pub use ai::{MetadataExtractor, MetadataFields};
pub use config::AiConfig;
pub use document::{Document, DocumentId, DocumentKind};
pub use error::{AiError, CoreError, PreviewError, RenameError, RouteError};
pub use extract::{ExtractionMode, TextResult};
pub use filename::FilenameTemplate;
pub use metadata::{MetadataField, MetadataRecord, Provenance};
pub use rename::RenameOutcome;
pub use render::RenderedPage;
pub use session::{DocumentSession, DocumentSummary};

use tracing_subscriber::EnvFilter;

/// Initialize tracing with the RUST_LOG env filter.
/// Default: warn for most crates, info for this one.
/// Use RUST_LOG=debug for verbose per-operation logs.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,easyrename=info")),
        )
        .init();
}
