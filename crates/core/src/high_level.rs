//! High-level translation API.
//!
//! [`DocumentTranslator`] wires the injected collaborators (layout model,
//! rasterizer, translation backend, font source) into the per-page
//! rewrite pipeline and runs pages on a bounded worker pool.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use lopdf::{Document, ObjectId};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::document::{
    PageInfo, PatchSet, assemble_dual, assemble_mono, collect_pages, prepare_page_content,
};
use crate::error::{Result, TranslateError};
use crate::font::{EmbeddedFont, FontSource, resolve_font};
use crate::interp::{RewriteMode, StreamRewriter};
use crate::layout::{LayoutModel, Rasterizer};
use crate::model::layout::RegionMask;
use crate::translate::{SpanRouter, TranslationBackend};

/// Worker pool bounds: at least one page worker, at most eight, keeping
/// memory and backend-call concurrency bounded.
pub fn clamp_threads(requested: usize) -> usize {
    requested.clamp(1, 8)
}

/// Cooperative cancellation handle. Checked once before each page; pages
/// already running are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Invoked once per completed page with (completed, total). Must be
/// cheap; it runs on page workers.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

pub struct TranslateOptions {
    pub source_lang: String,
    pub target_lang: String,
    /// Requested worker count, clamped by [`clamp_threads`].
    pub threads: usize,
    /// Maximum characters per translation call; longer units are chunked
    /// at sentence boundaries.
    pub chunk_limit: usize,
    /// Explicit font identifier overriding the language default.
    pub font_override: Option<String>,
    /// Uniform scale applied to substituted font sizes.
    pub font_scale: f64,
    pub skip_subset: bool,
    /// Strict mode aborts a page on unknown operators instead of
    /// skipping them.
    pub strict: bool,
    /// 1-based page numbers to translate; `None` means all pages.
    pub pages: Option<Vec<usize>>,
    /// Detector input stride alignment.
    pub tile_size: u32,
    pub cancel: Option<CancelToken>,
    pub on_page_done: Option<ProgressCallback>,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        TranslateOptions {
            source_lang: "en".into(),
            target_lang: "zh".into(),
            threads: 4,
            chunk_limit: 2000,
            font_override: None,
            font_scale: 1.0,
            skip_subset: false,
            strict: false,
            pages: None,
            tile_size: 32,
            cancel: None,
            on_page_done: None,
        }
    }
}

/// Both output variants plus degradation accounting.
pub struct TranslatedDocument {
    /// Translated-only document.
    pub mono: Vec<u8>,
    /// Original pages interleaved with their translations.
    pub dual: Vec<u8>,
    /// Translation units that fell back to their source text.
    pub fallback_units: usize,
}

/// The engine's single entry point, owning its injected collaborators.
pub struct DocumentTranslator {
    layout: Arc<dyn LayoutModel>,
    rasterizer: Arc<dyn Rasterizer>,
    backend: Arc<dyn TranslationBackend>,
    fonts: Arc<dyn FontSource>,
}

impl DocumentTranslator {
    pub fn new(
        layout: Arc<dyn LayoutModel>,
        rasterizer: Arc<dyn Rasterizer>,
        backend: Arc<dyn TranslationBackend>,
        fonts: Arc<dyn FontSource>,
    ) -> Self {
        DocumentTranslator {
            layout,
            rasterizer,
            backend,
            fonts,
        }
    }

    /// Translates a document, returning mono and dual output bytes.
    ///
    /// Per-page and per-unit failures degrade gracefully (an
    /// uninterpretable page is emitted unmodified, a failed unit keeps
    /// its source text); only document-open and serialization failures
    /// are fatal. Cancellation surfaces as [`TranslateError::Cancelled`].
    pub fn translate_document(
        &self,
        bytes: &[u8],
        options: &TranslateOptions,
    ) -> Result<TranslatedDocument> {
        let pristine = Document::load_mem(bytes)?;
        let mut work = pristine.clone();
        let pages = collect_pages(&work)?;
        if pages.is_empty() {
            return Err(TranslateError::Parse("document has no pages".into()));
        }

        let selected: Vec<PageInfo> = match &options.pages {
            Some(numbers) => pages
                .iter()
                .filter(|p| numbers.contains(&p.number))
                .cloned()
                .collect(),
            None => pages.clone(),
        };
        if selected.is_empty() {
            return Err(TranslateError::Parse("page selection is empty".into()));
        }

        let page_ids: Vec<ObjectId> = pages.iter().map(|p| p.id).collect();
        let font = resolve_font(
            &mut work,
            &page_ids,
            &*self.fonts,
            &options.target_lang,
            options.font_override.as_deref(),
        );
        let content_map = prepare_page_content(&mut work, &selected);

        let total = selected.len();
        let threads = clamp_threads(options.threads);
        info!(pages = total, threads, "translating document");
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| TranslateError::Parse(e.to_string()))?;

        let patches = Mutex::new(PatchSet::new());
        let completed = AtomicUsize::new(0);
        let fallbacks = AtomicUsize::new(0);
        let work_ref = &work;
        let font_ref = &font;

        pool.install(|| {
            selected.par_iter().try_for_each(|page| -> Result<()> {
                if options
                    .cancel
                    .as_ref()
                    .map(CancelToken::is_cancelled)
                    .unwrap_or(false)
                {
                    return Err(TranslateError::Cancelled);
                }
                let content_id = content_map[&page.id];
                match self.process_page(work_ref, page, font_ref, options) {
                    Ok(outcome) => {
                        fallbacks.fetch_add(outcome.fallback_units, Ordering::Relaxed);
                        let mut set = patches.lock().expect("patch lock poisoned");
                        set.insert(content_id, outcome.page_mono, outcome.page_dual);
                        for (form_id, mono, dual) in outcome.form_patches {
                            set.insert(form_id, mono, dual);
                        }
                        for &id in &page.content_ids {
                            set.void(id);
                        }
                    }
                    Err(TranslateError::MalformedStream { page: n, msg }) => {
                        // The page keeps its original appearance in both
                        // variants; the task continues.
                        warn!(page = n, msg, "malformed stream, page left unmodified");
                        let mut set = patches.lock().expect("patch lock poisoned");
                        set.insert(content_id, page.content.clone(), page.content.clone());
                        for &id in &page.content_ids {
                            set.void(id);
                        }
                    }
                    Err(other) => return Err(other),
                }
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(cb) = &options.on_page_done {
                    cb(done, total);
                }
                Ok(())
            })
        })?;

        font.finalize(&mut work, options.skip_subset)?;

        let patches = patches.into_inner().expect("patch lock poisoned");
        debug!(patched_objects = patches.len(), "committing patches");
        let mono = assemble_mono(&work, &patches)?;
        let dual = assemble_dual(&pristine, &work, &patches)?;
        Ok(TranslatedDocument {
            mono,
            dual,
            fallback_units: fallbacks.load(Ordering::Relaxed),
        })
    }

    fn process_page(
        &self,
        doc: &Document,
        page: &PageInfo,
        font: &EmbeddedFont,
        options: &TranslateOptions,
    ) -> Result<crate::interp::RewriteOutcome> {
        let image = self.rasterizer.rasterize(page)?;
        let boxes = self.layout.predict(&image, options.tile_size)?;
        let mask = RegionMask::build(image.width() as usize, image.height() as usize, &boxes);
        debug!(page = page.number, boxes = boxes.len(), "layout detected");

        let router = SpanRouter::new(
            &mask,
            &*self.backend,
            font,
            &options.source_lang,
            &options.target_lang,
            options.chunk_limit,
            options.font_scale,
        );
        let mode = if options.strict {
            RewriteMode::Strict
        } else {
            RewriteMode::Permissive
        };
        StreamRewriter::new(doc, router, mode, page.number).rewrite_page(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_clamp() {
        assert_eq!(clamp_threads(0), 1);
        assert_eq!(clamp_threads(1), 1);
        assert_eq!(clamp_threads(5), 5);
        assert_eq!(clamp_threads(8), 8);
        assert_eq!(clamp_threads(50), 8);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
