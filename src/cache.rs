//! Per-document artifact cache and single-writer concurrency guards.
//!
//! Maps (document, page) to rendered bitmaps and extracted text, and
//! (document, page, mode, text-hash) to AI metadata results so stale text
//! automatically misses. Artifacts live for as long as their document is
//! open; `drop_document` evicts everything on close. There is no
//! cross-document sharing.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::ai::MetadataFields;
use crate::document::DocumentId;
use crate::extract::{ExtractionMode, TextResult};
use crate::render::RenderedPage;

/// Cache key for one page of one document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub doc: DocumentId,
    pub page: usize,
}

/// Operation kinds tracked by the in-flight guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Render,
    Extract,
    Analyze,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Render => "render",
            Self::Extract => "extract",
            Self::Analyze => "analyze",
        }
    }
}

/// Cached derived results for one page. The rendered bitmap survives a
/// text refresh; only text and AI metadata are invalidated.
#[derive(Debug, Clone, Default)]
pub struct PageArtifact {
    pub rendered: Option<Arc<RenderedPage>>,
    /// Embedded-layer and OCR results are retained separately so switching
    /// modes never recomputes.
    pub embedded_text: Option<TextResult>,
    pub ocr_text: Option<TextResult>,
    pub decoded_text: Option<TextResult>,
    pub last_error: Option<String>,
}

impl PageArtifact {
    pub fn text(&self, mode: ExtractionMode) -> Option<&TextResult> {
        match mode {
            ExtractionMode::Embedded => self.embedded_text.as_ref(),
            ExtractionMode::Ocr => self.ocr_text.as_ref(),
            ExtractionMode::Decoded => self.decoded_text.as_ref(),
            ExtractionMode::None => None,
        }
    }

    /// Most recent usable text, regardless of how it was acquired.
    pub fn any_text(&self) -> Option<&TextResult> {
        self.embedded_text
            .as_ref()
            .or(self.ocr_text.as_ref())
            .or(self.decoded_text.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AiKey {
    page: PageKey,
    mode: ExtractionMode,
    text_hash: String,
}

/// Cancellation flag handed to background tasks. A tripped flag means the
/// task result must not be published.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct RenderCache {
    artifacts: DashMap<PageKey, PageArtifact>,
    ai_results: DashMap<AiKey, MetadataFields>,
    in_flight: Arc<DashMap<(PageKey, OpKind), ()>>,
}

impl RenderCache {
    pub fn new() -> Self {
        Self {
            artifacts: DashMap::new(),
            ai_results: DashMap::new(),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Claim the single in-flight slot for (page, op). Returns `None` when
    /// another task already holds it; the caller rejects the intent instead
    /// of racing. The guard releases the slot on drop.
    pub fn begin(&self, key: &PageKey, op: OpKind) -> Option<InFlightGuard> {
        use dashmap::mapref::entry::Entry;

        match self.in_flight.entry((key.clone(), op)) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(InFlightGuard {
                    map: Arc::clone(&self.in_flight),
                    key: (key.clone(), op),
                })
            }
        }
    }

    pub fn rendered(&self, key: &PageKey) -> Option<Arc<RenderedPage>> {
        self.artifacts.get(key).and_then(|a| a.rendered.clone())
    }

    pub fn text(&self, key: &PageKey, mode: ExtractionMode) -> Option<TextResult> {
        self.artifacts.get(key).and_then(|a| a.text(mode).cloned())
    }

    pub fn any_text(&self, key: &PageKey) -> Option<TextResult> {
        self.artifacts.get(key).and_then(|a| a.any_text().cloned())
    }

    /// Atomic publish of a completed render. A tripped cancel flag writes
    /// nothing, leaving any prior artifact untouched.
    pub fn publish_render(
        &self,
        key: &PageKey,
        page: Arc<RenderedPage>,
        cancel: &CancelFlag,
    ) -> bool {
        if cancel.is_cancelled() {
            tracing::debug!("[Cache] Dropping cancelled render for page {}", key.page);
            return false;
        }
        let mut artifact = self.artifacts.entry(key.clone()).or_default();
        artifact.rendered = Some(page);
        artifact.last_error = None;
        true
    }

    /// Atomic publish of a completed extraction, keyed by its mode.
    pub fn publish_text(&self, key: &PageKey, result: TextResult, cancel: &CancelFlag) -> bool {
        if cancel.is_cancelled() {
            tracing::debug!("[Cache] Dropping cancelled extraction for page {}", key.page);
            return false;
        }
        let mut artifact = self.artifacts.entry(key.clone()).or_default();
        match result.mode {
            ExtractionMode::Embedded => artifact.embedded_text = Some(result),
            ExtractionMode::Ocr => artifact.ocr_text = Some(result),
            ExtractionMode::Decoded => artifact.decoded_text = Some(result),
            ExtractionMode::None => {}
        }
        artifact.last_error = None;
        true
    }

    /// Record the last failure for the page without clobbering artifacts
    /// (retry stays possible, prior results stay visible).
    pub fn record_error(&self, key: &PageKey, error: &str) {
        let mut artifact = self.artifacts.entry(key.clone()).or_default();
        artifact.last_error = Some(error.to_string());
    }

    pub fn last_error(&self, key: &PageKey) -> Option<String> {
        self.artifacts.get(key).and_then(|a| a.last_error.clone())
    }

    /// Explicit "Refresh": drop text and AI metadata for the page but keep
    /// the render.
    pub fn invalidate_text(&self, key: &PageKey) {
        if let Some(mut artifact) = self.artifacts.get_mut(key) {
            artifact.embedded_text = None;
            artifact.ocr_text = None;
            artifact.decoded_text = None;
        }
        self.ai_results.retain(|k, _| k.page != *key);
        tracing::debug!("[Cache] Invalidated text + AI metadata for page {}", key.page);
    }

    pub fn ai_lookup(&self, key: &PageKey, result: &TextResult) -> Option<MetadataFields> {
        let ai_key = AiKey {
            page: key.clone(),
            mode: result.mode,
            text_hash: text_hash(&result.text),
        };
        self.ai_results.get(&ai_key).map(|r| r.clone())
    }

    pub fn publish_ai(
        &self,
        key: &PageKey,
        source: &TextResult,
        fields: MetadataFields,
        cancel: &CancelFlag,
    ) -> bool {
        if cancel.is_cancelled() {
            tracing::debug!("[Cache] Dropping cancelled AI result for page {}", key.page);
            return false;
        }
        let ai_key = AiKey {
            page: key.clone(),
            mode: source.mode,
            text_hash: text_hash(&source.text),
        };
        self.ai_results.insert(ai_key, fields);
        true
    }

    /// Evict everything for a closed document.
    pub fn drop_document(&self, doc: &DocumentId) {
        self.artifacts.retain(|k, _| k.doc != *doc);
        self.ai_results.retain(|k, _| k.page.doc != *doc);
        tracing::debug!("[Cache] Dropped artifacts for document {}", doc);
    }

    /// Re-key artifacts after a rename rebinds the document identity, so
    /// subsequent lookups under the new identity stay warm.
    pub fn rekey_document(&self, old: &DocumentId, new: &DocumentId) {
        let moved: Vec<(PageKey, PageArtifact)> = self
            .artifacts
            .iter()
            .filter(|entry| entry.key().doc == *old)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (key, artifact) in moved {
            self.artifacts.remove(&key);
            self.artifacts.insert(
                PageKey {
                    doc: new.clone(),
                    page: key.page,
                },
                artifact,
            );
        }

        let moved_ai: Vec<(AiKey, MetadataFields)> = self
            .ai_results
            .iter()
            .filter(|entry| entry.key().page.doc == *old)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (key, fields) in moved_ai {
            self.ai_results.remove(&key);
            self.ai_results.insert(
                AiKey {
                    page: PageKey {
                        doc: new.clone(),
                        page: key.page.page,
                    },
                    ..key
                },
                fields,
            );
        }
    }
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for the at-most-one-in-flight invariant.
pub struct InFlightGuard {
    map: Arc<DashMap<(PageKey, OpKind), ()>>,
    key: (PageKey, OpKind),
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}
