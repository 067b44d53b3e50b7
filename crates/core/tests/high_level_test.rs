//! End-to-end tests for the document translation pipeline: synthetic
//! documents in, mono and dual documents out.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, dictionary};
use rosetta_core::{
    CancelToken, DocumentTranslator, IdentityTranslator, NoFontSource, Result, SolidRasterizer,
    TranslateError, TranslateOptions, TranslationBackend, WholePageModel,
};

// ============================================================================
// Fixtures
// ============================================================================

/// Builds a letter-sized document with one content stream per page.
fn build_pdf(page_contents: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::new();
    for content in page_contents {
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.as_bytes().to_vec(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => Object::Reference(font_id) },
            },
            "Contents" => Object::Reference(content_id),
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("fixture must serialize");
    bytes
}

/// Like `build_pdf`, but MediaBox and the font resources live on the
/// Pages node and reach the leaves only through inheritance.
fn build_pdf_inherited(page_contents: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::new();
    for content in page_contents {
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.as_bytes().to_vec(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "Contents" => Object::Reference(content_id),
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => Object::Reference(font_id) },
            },
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("fixture must serialize");
    bytes
}

/// A document whose only text lives in a form XObject carrying its own
/// inline Resources dictionary.
fn build_form_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let form_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => Object::Reference(font_id) },
            },
        },
        b"BT /F1 12 Tf 72 700 Td (Inside the form) Tj ET".to_vec(),
    ));
    let content_id = doc.add_object(Stream::new(dictionary! {}, b"/Fm1 Do".to_vec()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => Object::Reference(pages_id),
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Fm1" => Object::Reference(form_id) },
        },
        "Contents" => Object::Reference(content_id),
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("fixture must serialize");
    bytes
}

fn identity_translator() -> DocumentTranslator {
    DocumentTranslator::new(
        Arc::new(WholePageModel),
        Arc::new(SolidRasterizer),
        Arc::new(IdentityTranslator),
        Arc::new(NoFontSource),
    )
}

fn single_threaded() -> TranslateOptions {
    TranslateOptions {
        threads: 1,
        ..TranslateOptions::default()
    }
}

fn page_ids(doc: &Document) -> Vec<ObjectId> {
    doc.get_pages().into_values().collect()
}

fn page_ops(doc: &Document, page_id: ObjectId) -> Vec<Operation> {
    let content = doc.get_page_content(page_id).expect("page content");
    Content::decode(&content).expect("content decodes").operations
}

fn shown_text(ops: &[Operation]) -> Vec<u8> {
    fn collect(obj: &Object, out: &mut Vec<u8>) {
        match obj {
            Object::String(bytes, _) => out.extend_from_slice(bytes),
            Object::Array(items) => items.iter().for_each(|o| collect(o, out)),
            _ => {}
        }
    }
    let mut out = Vec::new();
    for op in ops {
        if matches!(op.operator.as_str(), "Tj" | "TJ" | "'" | "\"") {
            op.operands.iter().for_each(|o| collect(o, &mut out));
        }
    }
    out
}

fn uses_translation_font(ops: &[Operation]) -> bool {
    ops.iter()
        .any(|op| op.operator == "Tf" && op.operands.first() == Some(&Object::Name(b"RstF1".to_vec())))
}

const PAGE_ONE: &str = "BT /F1 12 Tf 72 700 Td (First page text) Tj ET";
const PAGE_TWO: &str = "BT /F1 12 Tf 72 700 Td (Second page text) Tj ET";

// ============================================================================
// Mono output
// ============================================================================

#[test]
fn test_mono_preserves_page_count_and_translates() {
    let input = build_pdf(&[PAGE_ONE, PAGE_TWO]);
    let result = identity_translator()
        .translate_document(&input, &single_threaded())
        .unwrap();
    assert_eq!(result.fallback_units, 0);

    let mono = Document::load_mem(&result.mono).unwrap();
    let pages = page_ids(&mono);
    assert_eq!(pages.len(), 2);

    let first = page_ops(&mono, pages[0]);
    assert!(uses_translation_font(&first));
    let text = shown_text(&first);
    assert_eq!(text, b"First page text");

    let second = page_ops(&mono, pages[1]);
    assert_eq!(shown_text(&second), b"Second page text");
}

#[test]
fn test_page_selection_leaves_other_pages_untouched() {
    let input = build_pdf(&[PAGE_ONE, PAGE_TWO]);
    let options = TranslateOptions {
        pages: Some(vec![2]),
        ..single_threaded()
    };
    let result = identity_translator()
        .translate_document(&input, &options)
        .unwrap();

    let mono = Document::load_mem(&result.mono).unwrap();
    let pages = page_ids(&mono);
    assert_eq!(pages.len(), 2);

    let first = page_ops(&mono, pages[0]);
    assert!(!uses_translation_font(&first), "page 1 was not selected");
    assert!(first.iter().any(|op| op.operator == "Td"), "original ops kept");

    assert!(uses_translation_font(&page_ops(&mono, pages[1])));
}

#[test]
fn test_empty_selection_is_an_error() {
    let input = build_pdf(&[PAGE_ONE]);
    let options = TranslateOptions {
        pages: Some(vec![7]),
        ..single_threaded()
    };
    let result = identity_translator().translate_document(&input, &options);
    assert!(matches!(result, Err(TranslateError::Parse(_))));
}

#[test]
fn test_form_inline_resources_gain_translation_font() {
    let input = build_form_pdf();
    let result = identity_translator()
        .translate_document(&input, &single_threaded())
        .unwrap();

    let mono = Document::load_mem(&result.mono).unwrap();
    let form = mono
        .objects
        .values()
        .find_map(|obj| match obj {
            Object::Stream(s)
                if matches!(
                    s.dict.get(b"Subtype"),
                    Ok(Object::Name(n)) if n.as_slice() == b"Form"
                ) =>
            {
                Some(s)
            }
            _ => None,
        })
        .expect("form XObject survives");

    let content = form
        .decompressed_content()
        .unwrap_or_else(|_| form.content.clone());
    assert!(
        content.windows(5).any(|w| w == b"RstF1"),
        "patched form shows text with the translation font"
    );

    let Ok(Object::Dictionary(res)) = form.dict.get(b"Resources") else {
        panic!("form keeps its inline resources");
    };
    let Ok(Object::Dictionary(fonts)) = res.get(b"Font") else {
        panic!("form resources keep their font dictionary");
    };
    assert!(
        fonts.has(b"RstF1"),
        "translation key registered on the form's own resources"
    );
}

// ============================================================================
// Dual output
// ============================================================================

#[test]
fn test_dual_interleaves_original_and_translated() {
    let input = build_pdf(&[PAGE_ONE, PAGE_TWO]);
    let result = identity_translator()
        .translate_document(&input, &single_threaded())
        .unwrap();

    let dual = Document::load_mem(&result.dual).unwrap();
    let pages = page_ids(&dual);
    assert_eq!(pages.len(), 4, "2N pages for an N-page input");

    // Odd positions hold the untouched originals.
    for (i, expected) in [(0, &b"First"[..]), (2, &b"Second"[..])] {
        let ops = page_ops(&dual, pages[i]);
        assert!(!uses_translation_font(&ops), "page {i} is the original");
        assert!(ops.iter().any(|op| op.operator == "Td"));
        assert!(shown_text(&ops).starts_with(expected));
    }

    // Even positions carry both the reproduced original and the offset
    // translation.
    for (i, expected) in [(1, "First page text"), (3, "Second page text")] {
        let ops = page_ops(&dual, pages[i]);
        assert!(uses_translation_font(&ops), "page {i} is translated");
        assert!(ops.iter().any(|op| op.operator == "TJ"), "original run kept");
        let text = shown_text(&ops);
        let body = String::from_utf8_lossy(&text);
        assert_eq!(
            body.matches(expected).count(),
            2,
            "original and translated copies on page {i}: {body}"
        );
    }
}

#[test]
fn test_dual_preserves_inherited_page_attributes() {
    let input = build_pdf_inherited(&[PAGE_ONE, PAGE_TWO]);
    let result = identity_translator()
        .translate_document(&input, &single_threaded())
        .unwrap();

    let dual = Document::load_mem(&result.dual).unwrap();
    let pages = page_ids(&dual);
    assert_eq!(pages.len(), 4);
    // The flat dual page tree cannot inherit from the severed originals,
    // so every page must carry its own MediaBox.
    for &id in &pages {
        let Ok(Object::Dictionary(page)) = dual.get_object(id) else {
            panic!("page {id:?} is not a dictionary");
        };
        assert!(page.has(b"MediaBox"), "page {id:?} lost its MediaBox");
        assert!(page.has(b"Resources"), "page {id:?} lost its Resources");
    }
}

// ============================================================================
// Degradation and control
// ============================================================================

struct FailingBackend;

impl TranslationBackend for FailingBackend {
    fn translate(&self, _text: &str, _source: &str, _target: &str) -> Result<String> {
        Err(TranslateError::TranslationUnit("backend down".into()))
    }
}

#[test]
fn test_backend_failure_counts_fallbacks_and_keeps_text() {
    let input = build_pdf(&[PAGE_ONE, PAGE_TWO]);
    let translator = DocumentTranslator::new(
        Arc::new(WholePageModel),
        Arc::new(SolidRasterizer),
        Arc::new(FailingBackend),
        Arc::new(NoFontSource),
    );
    let result = translator
        .translate_document(&input, &single_threaded())
        .unwrap();
    assert_eq!(result.fallback_units, 2, "one unit per page fell back");

    let mono = Document::load_mem(&result.mono).unwrap();
    let pages = page_ids(&mono);
    assert_eq!(shown_text(&page_ops(&mono, pages[0])), b"First page text");
}

#[test]
fn test_malformed_page_is_emitted_unmodified() {
    let input = build_pdf(&[PAGE_ONE, "BT (unterminated"]);
    let result = identity_translator()
        .translate_document(&input, &single_threaded())
        .unwrap();

    let mono = Document::load_mem(&result.mono).unwrap();
    let pages = page_ids(&mono);
    assert!(uses_translation_font(&page_ops(&mono, pages[0])));
    let raw = mono.get_page_content(pages[1]).unwrap();
    assert_eq!(raw, b"BT (unterminated");
}

#[test]
fn test_cancellation_before_first_page() {
    let input = build_pdf(&[PAGE_ONE]);
    let cancel = CancelToken::new();
    cancel.cancel();
    let options = TranslateOptions {
        cancel: Some(cancel),
        ..single_threaded()
    };
    let result = identity_translator().translate_document(&input, &options);
    assert!(matches!(result, Err(TranslateError::Cancelled)));
}

#[test]
fn test_progress_callback_sees_every_page() {
    let input = build_pdf(&[PAGE_ONE, PAGE_TWO]);
    let calls = Arc::new(AtomicUsize::new(0));
    let seen_total = Arc::new(AtomicUsize::new(0));
    let (calls_cb, total_cb) = (calls.clone(), seen_total.clone());
    let options = TranslateOptions {
        on_page_done: Some(Arc::new(move |_done, total| {
            calls_cb.fetch_add(1, Ordering::Relaxed);
            total_cb.store(total, Ordering::Relaxed);
        })),
        ..single_threaded()
    };
    identity_translator()
        .translate_document(&input, &options)
        .unwrap();
    assert_eq!(calls.load(Ordering::Relaxed), 2);
    assert_eq!(seen_total.load(Ordering::Relaxed), 2);
}

#[test]
fn test_invalid_document_is_a_parse_error() {
    let result = identity_translator().translate_document(b"not a pdf", &single_threaded());
    assert!(matches!(result, Err(TranslateError::Parse(_))));
}
