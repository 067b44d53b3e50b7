//! Tests for span routing: mask-driven grouping, backend submission,
//! proportional redistribution, and fallback accounting.

use std::sync::atomic::{AtomicUsize, Ordering};

use lopdf::content::Operation;
use lopdf::{Document, Object, StringFormat};
use rosetta_core::font::EmbeddedFont;
use rosetta_core::model::span::TextSpan;
use rosetta_core::model::state::Color;
use rosetta_core::translate::SpanRouter;
use rosetta_core::{
    LayoutBox, RegionClass, RegionMask, Result, TranslateError, TranslationBackend,
};

// ============================================================================
// Fixtures
// ============================================================================

/// Uppercases its input so translated output is distinguishable.
struct UppercaseBackend;

impl TranslationBackend for UppercaseBackend {
    fn translate(&self, text: &str, _source: &str, _target: &str) -> Result<String> {
        Ok(text.to_uppercase())
    }
}

struct FailingBackend;

impl TranslationBackend for FailingBackend {
    fn translate(&self, _text: &str, _source: &str, _target: &str) -> Result<String> {
        Err(TranslateError::TranslationUnit("backend down".into()))
    }
}

struct CountingBackend(AtomicUsize);

impl TranslationBackend for CountingBackend {
    fn translate(&self, text: &str, _source: &str, _target: &str) -> Result<String> {
        self.0.fetch_add(1, Ordering::Relaxed);
        Ok(text.to_string())
    }
}

fn span(text: &str, x: f64, y: f64) -> TextSpan {
    TextSpan {
        text: text.to_string(),
        original: vec![Object::String(
            text.as_bytes().to_vec(),
            StringFormat::Literal,
        )],
        font_name: b"F1".to_vec(),
        size: 12.0,
        matrix: (1.0, 0.0, 0.0, 1.0, x, y),
        color: Color::Gray(0.0),
        charspace: 0.0,
        wordspace: 0.0,
        scaling: 100.0,
        rise: 0.0,
    }
}

fn text_box(x0: f64, y0: f64, x1: f64, y1: f64) -> LayoutBox {
    LayoutBox {
        x0,
        y0,
        x1,
        y1,
        class: RegionClass::PlainText,
        confidence: 0.9,
    }
}

/// Whole 200x200 page as one text region.
fn whole_mask() -> RegionMask {
    RegionMask::build(200, 200, &[text_box(0.0, 0.0, 200.0, 200.0)])
}

fn builtin_font() -> EmbeddedFont {
    let mut doc = Document::with_version("1.5");
    EmbeddedFont::builtin(&mut doc)
}

fn shown_strings(ops: &[Operation]) -> Vec<Vec<u8>> {
    ops.iter()
        .filter(|op| op.operator == "Tj")
        .filter_map(|op| match op.operands.first() {
            Some(Object::String(bytes, _)) => Some(bytes.clone()),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Grouping and redistribution
// ============================================================================

#[test]
fn test_unit_translated_and_redistributed() {
    let mask = whole_mask();
    let font = builtin_font();
    let backend = UppercaseBackend;
    let mut router = SpanRouter::new(&mask, &backend, &font, "en", "de", 2000, 1.0);

    let spans = [span("alpha beta", 10.0, 100.0), span("gamma", 80.0, 100.0)];
    let (mono, _dual) = router.materialize(&spans);

    // Two source words out of three land on the first span.
    assert_eq!(
        shown_strings(&mono),
        vec![b"ALPHA BETA".to_vec(), b"GAMMA".to_vec()]
    );
    assert_eq!(router.fallback_units(), 0);
}

#[test]
fn test_consecutive_same_group_is_one_unit() {
    let mask = whole_mask();
    let font = builtin_font();
    let backend = CountingBackend(AtomicUsize::new(0));
    let mut router = SpanRouter::new(&mask, &backend, &font, "en", "de", 2000, 1.0);

    let spans = [
        span("one", 10.0, 100.0),
        span("two", 40.0, 100.0),
        span("three", 70.0, 100.0),
    ];
    router.materialize(&spans);
    assert_eq!(backend.0.load(Ordering::Relaxed), 1);
}

#[test]
fn test_group_change_splits_units() {
    // Two stacked regions; the middle span belongs to the other one.
    let mask = RegionMask::build(
        200,
        200,
        &[
            text_box(0.0, 110.0, 200.0, 200.0),
            text_box(0.0, 0.0, 200.0, 90.0),
        ],
    );
    let font = builtin_font();
    let backend = CountingBackend(AtomicUsize::new(0));
    let mut router = SpanRouter::new(&mask, &backend, &font, "en", "de", 2000, 1.0);

    // Image y 110..200 maps to device y 0..90 and vice versa.
    let spans = [
        span("low", 10.0, 40.0),
        span("high", 10.0, 160.0),
        span("low again", 10.0, 40.0),
    ];
    router.materialize(&spans);
    assert_eq!(backend.0.load(Ordering::Relaxed), 3);
}

#[test]
fn test_dual_gets_original_plus_offset_translation() {
    let mask = whole_mask();
    let font = builtin_font();
    let backend = UppercaseBackend;
    let mut router = SpanRouter::new(&mask, &backend, &font, "en", "de", 2000, 1.0);

    let spans = [span("hello", 20.0, 100.0)];
    let (mono, dual) = router.materialize(&spans);

    assert_eq!(shown_strings(&mono), vec![b"HELLO".to_vec()]);
    // Dual keeps the original TJ run and adds the translated Tj.
    assert!(dual.iter().any(|op| op.operator == "TJ"));
    assert_eq!(shown_strings(&dual), vec![b"HELLO".to_vec()]);
    let tms: Vec<&Operation> = dual.iter().filter(|op| op.operator == "Tm").collect();
    assert_eq!(tms.len(), 2);
    // 2.5 em above a 12pt baseline at y=100.
    assert_eq!(tms[1].operands[5], Object::Real(130.0));
}

// ============================================================================
// Passthrough classes
// ============================================================================

#[test]
fn test_protected_span_passes_through() {
    let mask = RegionMask::build(
        200,
        200,
        &[LayoutBox {
            class: RegionClass::IsolateFormula,
            ..text_box(0.0, 0.0, 200.0, 200.0)
        }],
    );
    let font = builtin_font();
    let backend = UppercaseBackend;
    let mut router = SpanRouter::new(&mask, &backend, &font, "en", "de", 2000, 1.0);

    let (mono, dual) = router.materialize(&[span("E = mc2", 10.0, 100.0)]);
    for ops in [&mono, &dual] {
        assert!(ops.iter().any(|op| op.operator == "TJ"));
        assert!(shown_strings(ops).is_empty(), "no translated run");
    }
}

#[test]
fn test_unassigned_span_passes_through() {
    let mask = RegionMask::empty(200, 200);
    let font = builtin_font();
    let backend = UppercaseBackend;
    let mut router = SpanRouter::new(&mask, &backend, &font, "en", "de", 2000, 1.0);

    let (mono, _) = router.materialize(&[span("margin note", 10.0, 100.0)]);
    assert!(mono.iter().any(|op| op.operator == "TJ"));
    assert!(shown_strings(&mono).is_empty());
}

#[test]
fn test_whitespace_only_unit_passes_through() {
    let mask = whole_mask();
    let font = builtin_font();
    let backend = CountingBackend(AtomicUsize::new(0));
    let mut router = SpanRouter::new(&mask, &backend, &font, "en", "de", 2000, 1.0);

    let (mono, _) = router.materialize(&[span("   \t ", 10.0, 100.0)]);
    assert_eq!(backend.0.load(Ordering::Relaxed), 0, "backend not called");
    assert!(mono.iter().any(|op| op.operator == "TJ"));
}

// ============================================================================
// Degradation
// ============================================================================

#[test]
fn test_backend_failure_reuses_source_text() {
    let mask = whole_mask();
    let font = builtin_font();
    let backend = FailingBackend;
    let mut router = SpanRouter::new(&mask, &backend, &font, "en", "de", 2000, 1.0);

    let (mono, _) = router.materialize(&[span("keep me", 10.0, 100.0)]);
    assert_eq!(router.fallback_units(), 1);
    assert_eq!(shown_strings(&mono), vec![b"keep me".to_vec()]);
}

#[test]
fn test_font_scale_applied_to_translated_run() {
    let mask = whole_mask();
    let font = builtin_font();
    let backend = UppercaseBackend;
    let mut router = SpanRouter::new(&mask, &backend, &font, "en", "de", 2000, 0.5);

    let (mono, _) = router.materialize(&[span("small", 10.0, 100.0)]);
    let tf = mono.iter().find(|op| op.operator == "Tf").unwrap();
    assert_eq!(tf.operands[1], Object::Real(6.0));
}
