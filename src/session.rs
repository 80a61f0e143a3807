//! The active document session: the narrow command surface the host talks
//! to, coordinating classification, rendering, extraction, AI analysis,
//! field routing, filename synthesis and the final rename.
//!
//! Long-running work (render, extraction, OCR, the AI call) runs off the
//! caller's thread and publishes through the cache; a cancel flag scoped
//! to the current page is tripped by navigation and close, and a cancelled
//! task never publishes. No lock is held across an await.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::ai::MetadataExtractor;
use crate::cache::{CancelFlag, OpKind, PageKey, RenderCache};
use crate::config::AiConfig;
use crate::document::{Document, DocumentKind};
use crate::error::{CoreError, PreviewError};
use crate::extract::{self, ExtractionMode, TextResult};
use crate::filename::{self, FilenameTemplate};
use crate::metadata::{self, MetadataField, MetadataRecord};
use crate::ocr::OcrEngine;
use crate::render::{self, RenderedPage};
use crate::rename::{RenameExecutor, RenameOutcome};

const MIN_ZOOM: f32 = 0.25;
const MAX_ZOOM: f32 = 4.0;
const DEFAULT_ZOOM: f32 = 1.0;

/// Host-facing snapshot emitted when a document is opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub file_name: String,
    pub info_line: String,
    pub kind: DocumentKind,
    pub page_count: usize,
}

struct SessionState {
    doc: Option<Document>,
    page: usize,
    zoom: f32,
    record: MetadataRecord,
    rename: RenameExecutor,
    /// Cancel flag for work scoped to the current page. Replaced on page
    /// navigation and open/close; in-flight tasks keep the old flag and
    /// find it tripped before publishing.
    cancel: CancelFlag,
}

pub struct DocumentSession {
    cache: Arc<RenderCache>,
    ocr: Arc<OcrEngine>,
    extractor: MetadataExtractor,
    template: FilenameTemplate,
    state: RwLock<SessionState>,
}

impl DocumentSession {
    pub fn new(ai: AiConfig) -> Result<Self, CoreError> {
        Self::with_parts(ai, OcrEngine::new(), FilenameTemplate::default())
    }

    pub fn with_parts(
        ai: AiConfig,
        ocr: OcrEngine,
        template: FilenameTemplate,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            cache: Arc::new(RenderCache::new()),
            ocr: Arc::new(ocr),
            extractor: MetadataExtractor::new(ai)?,
            template,
            state: RwLock::new(SessionState {
                doc: None,
                page: 0,
                zoom: DEFAULT_ZOOM,
                record: MetadataRecord::default(),
                rename: RenameExecutor::new(),
                cancel: CancelFlag::new(),
            }),
        })
    }

    /// Open a document, replacing (and fully evicting) any previous one.
    pub fn open(&self, path: &Path) -> Result<DocumentSummary, CoreError> {
        let doc = Document::open(path).map_err(CoreError::Preview)?;
        let summary = DocumentSummary {
            file_name: doc.file_name(),
            info_line: doc.info_line(),
            kind: doc.kind(),
            page_count: doc.page_count(),
        };

        let mut state = self.write_state();
        if let Some(old) = state.doc.take() {
            state.cancel.cancel();
            self.cache.drop_document(old.id());
        }
        state.doc = Some(doc);
        state.page = 0;
        state.zoom = DEFAULT_ZOOM;
        state.record = MetadataRecord::default();
        state.rename = RenameExecutor::new();
        state.cancel = CancelFlag::new();

        Ok(summary)
    }

    /// Close the current document, cancelling in-flight work and dropping
    /// its cached artifacts.
    pub fn close(&self) {
        let mut state = self.write_state();
        state.cancel.cancel();
        if let Some(doc) = state.doc.take() {
            self.cache.drop_document(doc.id());
        }
        state.record = MetadataRecord::default();
        state.rename = RenameExecutor::new();
    }

    /// Navigate to a page. Cancels work for the page being left and resets
    /// zoom to the default.
    pub fn set_page(&self, page: usize) -> Result<(), CoreError> {
        let mut state = self.write_state();
        let doc = state.doc.as_ref().ok_or(CoreError::NoDocument)?;
        if page >= doc.page_count() {
            return Err(PreviewError::PageOutOfRange {
                page,
                page_count: doc.page_count(),
            }
            .into());
        }
        state.cancel.cancel();
        state.cancel = CancelFlag::new();
        state.page = page;
        state.zoom = DEFAULT_ZOOM;
        Ok(())
    }

    /// Set the view zoom, clamped. Pure view state: the cached base render
    /// is reused, never re-decoded.
    pub fn set_zoom(&self, zoom: f32) -> f32 {
        let clamped = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        self.write_state().zoom = clamped;
        clamped
    }

    pub fn zoom(&self) -> f32 {
        self.read_state().zoom
    }

    pub fn page(&self) -> usize {
        self.read_state().page
    }

    /// Cancel any in-flight render/extract/analyze for the current page.
    pub fn cancel_current(&self) {
        self.read_state().cancel.cancel();
    }

    /// Render the current page, served from cache after the first call.
    pub async fn render_page(&self) -> Result<Arc<RenderedPage>, CoreError> {
        let (doc, page, cancel) = self.current_target()?;
        let key = PageKey {
            doc: doc.id().clone(),
            page,
        };

        if let Some(rendered) = self.cache.rendered(&key) {
            return Ok(rendered);
        }

        let _guard = self
            .cache
            .begin(&key, OpKind::Render)
            .ok_or(CoreError::OperationInFlight(OpKind::Render.as_str()))?;

        let result = {
            let doc = doc.clone();
            tokio::task::spawn_blocking(move || render::render_page(&doc, page))
                .await
                .map_err(|e| PreviewError::Io(format!("Render task failed: {}", e)))?
        };

        match result {
            Ok(rendered) => {
                let rendered = Arc::new(rendered);
                if !self.cache.publish_render(&key, Arc::clone(&rendered), &cancel) {
                    return Err(CoreError::Cancelled);
                }
                Ok(rendered)
            }
            Err(e) => {
                self.cache.record_error(&key, &e.to_string());
                Err(e.into())
            }
        }
    }

    /// Extract the current page's text. Idempotent per page until
    /// `force_refresh`, which also invalidates AI metadata keyed to the
    /// old text.
    pub async fn extract_text(&self, force_refresh: bool) -> Result<TextResult, CoreError> {
        self.extract_text_with(None, force_refresh).await
    }

    /// Extract with an explicit mode preference. `Some(ExtractionMode::Ocr)`
    /// forces OCR even when the page has a usable embedded layer (the user
    /// switching away from a garbled one); results are cached per mode, so
    /// switching back never recomputes.
    pub async fn extract_text_with(
        &self,
        mode: Option<ExtractionMode>,
        force_refresh: bool,
    ) -> Result<TextResult, CoreError> {
        let (doc, page, cancel) = self.current_target()?;
        let key = PageKey {
            doc: doc.id().clone(),
            page,
        };

        if force_refresh {
            if mode.is_none() {
                self.cache.invalidate_text(&key);
            }
        } else {
            let cached = match mode {
                Some(mode) => self.cache.text(&key, mode),
                None => self.cache.any_text(&key),
            };
            if let Some(cached) = cached {
                return Ok(cached);
            }
        }

        let _guard = self
            .cache
            .begin(&key, OpKind::Extract)
            .ok_or(CoreError::OperationInFlight(OpKind::Extract.as_str()))?;

        let result = {
            let ocr = Arc::clone(&self.ocr);
            // OCR reuses the cached base render instead of re-rendering.
            let rendered = self.cache.rendered(&key);
            tokio::task::spawn_blocking(move || {
                extract::extract_text_with_mode(&doc, page, &ocr, mode, rendered)
            })
            .await
            .map_err(|e| PreviewError::Io(format!("Extraction task failed: {}", e)))?
        };

        match result {
            Ok(text) => {
                if !self.cache.publish_text(&key, text.clone(), &cancel) {
                    return Err(CoreError::Cancelled);
                }
                Ok(text)
            }
            Err(e) => {
                self.cache.record_error(&key, &e.to_string());
                Err(e.into())
            }
        }
    }

    /// Run AI analysis over the current page's text and merge the result
    /// into the metadata record.
    ///
    /// `force_refresh` corresponds to the host's confirmed "Refresh AI
    /// Analysis" intent: it bypasses the cached result and replaces prior
    /// AI-derived fields. User-edited fields are never overwritten either
    /// way.
    pub async fn analyze(&self, force_refresh: bool) -> Result<MetadataRecord, CoreError> {
        let (doc, page, cancel) = self.current_target()?;
        let key = PageKey {
            doc: doc.id().clone(),
            page,
        };

        let text = match self.cache.any_text(&key) {
            Some(text) => text,
            None => self.extract_text(false).await?,
        };

        if !force_refresh {
            if let Some(fields) = self.cache.ai_lookup(&key, &text) {
                tracing::debug!("[Session] Using cached AI metadata for page {}", page);
                let mut state = self.write_state();
                state.record.apply_ai(&fields, false);
                return Ok(state.record.clone());
            }
        }

        let _guard = self
            .cache
            .begin(&key, OpKind::Analyze)
            .ok_or(CoreError::OperationInFlight(OpKind::Analyze.as_str()))?;

        // No lock is held across the network call.
        let fields = self.extractor.analyze(&text.text).await?;

        if !self.cache.publish_ai(&key, &text, fields.clone(), &cancel) {
            return Err(CoreError::Cancelled);
        }

        let mut state = self.write_state();
        state.record.apply_ai(&fields, force_refresh);
        Ok(state.record.clone())
    }

    /// Route a selected text span into a metadata field (marks it
    /// user-edited). Returns the normalized stored value.
    pub fn route_selection(
        &self,
        selection: &str,
        field: MetadataField,
    ) -> Result<String, CoreError> {
        let mut state = self.write_state();
        metadata::route_selection(&mut state.record, selection, field).map_err(CoreError::Route)
    }

    /// Direct field edit from the form.
    pub fn edit_field(&self, field: MetadataField, value: &str) {
        self.write_state().record.set_user(field, value);
    }

    pub fn record(&self) -> MetadataRecord {
        self.read_state().record.clone()
    }

    /// Candidate filename for the current record. Pure; the filesystem is
    /// untouched until [`Self::request_rename`].
    pub fn synthesize_filename(&self) -> Result<String, CoreError> {
        let state = self.read_state();
        let doc = state.doc.as_ref().ok_or(CoreError::NoDocument)?;
        Ok(filename::synthesize(
            &state.record,
            &self.template,
            &doc.extension(),
        ))
    }

    /// Start the guarded rename using the synthesized filename. May park
    /// on a collision awaiting [`Self::confirm_rename`].
    pub fn request_rename(&self) -> Result<RenameOutcome, CoreError> {
        let candidate = self.synthesize_filename()?;

        let mut state = self.write_state();
        let source = state
            .doc
            .as_ref()
            .ok_or(CoreError::NoDocument)?
            .path()
            .to_path_buf();
        let outcome = state.rename.begin(&source, &candidate)?;
        self.finish_rename(&mut state, outcome)
    }

    /// Resolve a pending rename collision.
    pub fn confirm_rename(&self, accept: bool) -> Result<RenameOutcome, CoreError> {
        let mut state = self.write_state();
        let outcome = state.rename.confirm(accept)?;
        self.finish_rename(&mut state, outcome)
    }

    /// After a successful move, rebind the document identity to the new
    /// path and migrate cached artifacts so lookups stay warm.
    fn finish_rename(
        &self,
        state: &mut SessionState,
        outcome: RenameOutcome,
    ) -> Result<RenameOutcome, CoreError> {
        if let RenameOutcome::Renamed { new_path } = &outcome {
            let doc = state.doc.as_mut().ok_or(CoreError::NoDocument)?;
            let old_id = doc.rebind(new_path.clone()).map_err(CoreError::Preview)?;
            self.cache.rekey_document(&old_id, doc.id());
        }
        Ok(outcome)
    }

    fn current_target(&self) -> Result<(Document, usize, CancelFlag), CoreError> {
        let state = self.read_state();
        let doc = state.doc.as_ref().ok_or(CoreError::NoDocument)?;
        Ok((doc.clone(), state.page, state.cancel.clone()))
    }

    // Poisoning is recovered from: no operation here is fatal to the
    // process, and state mutations complete before the guard drops.
    fn read_state(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AiError;
    use std::fs;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn session() -> DocumentSession {
        DocumentSession::with_parts(
            AiConfig::default(),
            OcrEngine::with_binary("definitely-not-a-real-ocr-binary"),
            FilenameTemplate::default(),
        )
        .unwrap()
    }

    fn text_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(".txt").unwrap();
        write!(file, "{}", content).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_open_summary_and_cached_render() {
        let file = text_file("hello preview");
        let session = session();

        let summary = session.open(file.path()).unwrap();
        assert_eq!(summary.kind, DocumentKind::PlainText);
        assert_eq!(summary.page_count, 1);
        assert!(summary.info_line.contains("TXT"));

        let first = session.render_page().await.unwrap();
        let second = session.render_page().await.unwrap();
        // Second call is a cache hit on the same artifact.
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_extraction_is_idempotent_until_refresh() {
        let file = text_file("original body");
        let session = session();
        session.open(file.path()).unwrap();

        let first = session.extract_text(false).await.unwrap();
        assert_eq!(first.text, "original body");

        // Change the file behind the cache's back: a plain re-extract must
        // still serve the cached result.
        fs::write(file.path(), "edited body").unwrap();
        let cached = session.extract_text(false).await.unwrap();
        assert_eq!(cached.text, "original body");

        // Refresh recomputes.
        let refreshed = session.extract_text(true).await.unwrap();
        assert_eq!(refreshed.text, "edited body");
    }

    #[tokio::test]
    async fn test_analyze_without_key_fails_fast() {
        let file = text_file("invoice from acme, 2024-12-29");
        let session = session();
        session.open(file.path()).unwrap();

        let err = session.analyze(false).await.unwrap_err();
        assert!(matches!(err, CoreError::Ai(AiError::PreconditionMissing)));
    }

    #[tokio::test]
    async fn test_cancelled_work_is_not_published() {
        let file = text_file("some content");
        let session = session();
        session.open(file.path()).unwrap();

        session.cancel_current();
        let err = session.extract_text(false).await.unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));

        // Navigating (back) to the page resets the flag; extraction works
        // and nothing stale was cached in between.
        session.set_page(0).unwrap();
        let result = session.extract_text(false).await.unwrap();
        assert_eq!(result.text, "some content");
    }

    #[tokio::test]
    async fn test_page_navigation_resets_zoom_and_bounds_checked() {
        let file = text_file("single page");
        let session = session();
        session.open(file.path()).unwrap();

        assert_eq!(session.set_zoom(2.5), 2.5);
        assert_eq!(session.set_zoom(99.0), 4.0);

        session.set_page(0).unwrap();
        assert_eq!(session.zoom(), 1.0);

        let err = session.set_page(5).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Preview(PreviewError::PageOutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_document_errors() {
        let session = session();
        assert!(matches!(
            session.render_page().await.unwrap_err(),
            CoreError::NoDocument
        ));
        assert!(matches!(
            session.synthesize_filename().unwrap_err(),
            CoreError::NoDocument
        ));
    }

    #[tokio::test]
    async fn test_full_rename_flow_rebinds_identity() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("scan_001.txt");
        fs::write(&source, "statement text").unwrap();

        let session = session();
        session.open(&source).unwrap();
        session.render_page().await.unwrap();

        session.edit_field(MetadataField::Date, "2024-12-29");
        session.edit_field(MetadataField::Organization, "Acme");
        session.edit_field(MetadataField::Subject, "Invoice");
        session.edit_field(MetadataField::Receiver, "J Doe");

        assert_eq!(
            session.synthesize_filename().unwrap(),
            "2024-12-29 - Acme - Invoice - J Doe.txt"
        );

        let outcome = session.request_rename().unwrap();
        let new_path = dir.path().join("2024-12-29 - Acme - Invoice - J Doe.txt");
        assert_eq!(
            outcome,
            RenameOutcome::Renamed {
                new_path: new_path.clone()
            }
        );
        assert!(!source.exists());
        assert!(new_path.exists());

        // The session keeps working against the new identity.
        let rendered = session.render_page().await.unwrap();
        assert!(rendered.width() > 0);
        let text = session.extract_text(false).await.unwrap();
        assert_eq!(text.text, "statement text");
    }

    #[tokio::test]
    async fn test_rename_collision_declined_leaves_files() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.txt");
        let taken = dir.path().join("document.txt");
        fs::write(&source, "a").unwrap();
        fs::write(&taken, "taken").unwrap();

        let session = session();
        session.open(&source).unwrap();

        // Empty record synthesizes the fallback stem, which collides.
        let outcome = session.request_rename().unwrap();
        assert!(matches!(outcome, RenameOutcome::NeedsConfirmation { .. }));

        let outcome = session.confirm_rename(false).unwrap();
        assert_eq!(outcome, RenameOutcome::Aborted);
        assert!(source.exists());
        assert_eq!(fs::read_to_string(&taken).unwrap(), "taken");
    }

    #[tokio::test]
    async fn test_forced_ocr_mode_does_not_serve_decoded_cache() {
        let file = text_file("decodable body text");
        let session = session();
        session.open(file.path()).unwrap();

        let decoded = session.extract_text(false).await.unwrap();
        assert_eq!(decoded.mode, ExtractionMode::Decoded);

        // The cached decoded result must not satisfy an explicit OCR
        // request; with no engine installed that request surfaces the
        // missing dependency instead.
        let err = session
            .extract_text_with(Some(ExtractionMode::Ocr), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Preview(PreviewError::MissingDependency { .. })
        ));

        // The decoded result is still cached and served.
        let again = session.extract_text(false).await.unwrap();
        assert_eq!(again.text, "decodable body text");
    }

    #[tokio::test]
    async fn test_poisoned_lock_does_not_kill_the_session() {
        let file = text_file("content");
        let session = Arc::new(session());
        session.open(file.path()).unwrap();

        let poisoner = Arc::clone(&session);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.state.write().unwrap();
            panic!("simulated task panic while holding the lock");
        })
        .join();

        // Session intents keep working after the panic.
        assert_eq!(session.page(), 0);
        session.edit_field(MetadataField::Subject, "Invoice");
        assert_eq!(
            session.record().subject.value.as_deref(),
            Some("Invoice")
        );
    }

    #[tokio::test]
    async fn test_route_selection_marks_user_edited() {
        let file = text_file("body");
        let session = session();
        session.open(file.path()).unwrap();

        let value = session
            .route_selection("December 29, 2024", MetadataField::Date)
            .unwrap();
        assert_eq!(value, "2024-12-29");

        let record = session.record();
        assert_eq!(
            record.date.provenance,
            crate::metadata::Provenance::UserEdited
        );
    }
}
