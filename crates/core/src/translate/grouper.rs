//! Span classification and translation grouping.
//!
//! The interpreter hands every captured [`TextSpan`] of one execution
//! context to a [`SpanRouter`], which samples the region mask at each
//! span's device-space origin, groups consecutive translatable spans that
//! share a mask id into translation units, calls the backend once per
//! unit, and materializes the replacement operator streams for the mono
//! and dual output variants.

use itertools::Itertools;
use lopdf::Object;
use lopdf::content::Operation;
use tracing::debug;

use crate::font::embed::EmbeddedFont;
use crate::model::layout::{OwnerTag, RegionMask};
use crate::model::span::TextSpan;
use crate::model::state::Color;
use crate::translate::{TranslationBackend, sanitize, translate_chunked};
use crate::utils::apply_matrix_norm;

/// Vertical offset of the translated run in the dual variant, as a
/// multiple of the font size.
const DUAL_OFFSET_FACTOR: f64 = 2.5;

pub struct SpanRouter<'a> {
    mask: &'a RegionMask,
    backend: &'a dyn TranslationBackend,
    font: &'a EmbeddedFont,
    source_lang: &'a str,
    target_lang: &'a str,
    chunk_limit: usize,
    font_scale: f64,
    fallback_units: usize,
}

impl<'a> SpanRouter<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mask: &'a RegionMask,
        backend: &'a dyn TranslationBackend,
        font: &'a EmbeddedFont,
        source_lang: &'a str,
        target_lang: &'a str,
        chunk_limit: usize,
        font_scale: f64,
    ) -> Self {
        SpanRouter {
            mask,
            backend,
            font,
            source_lang,
            target_lang,
            chunk_limit,
            font_scale,
            fallback_units: 0,
        }
    }

    /// Number of units whose translation failed and fell back to the
    /// source text.
    pub fn fallback_units(&self) -> usize {
        self.fallback_units
    }

    /// Consumes the spans of one execution context, in stream order, and
    /// returns the replacement operations for the mono and dual variants.
    pub fn materialize(&mut self, spans: &[TextSpan]) -> (Vec<Operation>, Vec<Operation>) {
        let mut mono = Vec::new();
        let mut dual = Vec::new();
        let mask = self.mask;
        let runs = spans.iter().chunk_by(|span| {
            let (x, y) = span.device_origin();
            mask.tag_at(x, y)
        });
        for (tag, run) in &runs {
            match tag {
                OwnerTag::TextGroup(_) => {
                    let unit: Vec<&TextSpan> = run.collect();
                    self.emit_unit(&unit, &mut mono, &mut dual);
                }
                OwnerTag::Protected | OwnerTag::Unassigned => {
                    // Unclassified or protected text passes through
                    // verbatim in both variants.
                    for span in run {
                        mono.extend(passthrough_block(span));
                        dual.extend(passthrough_block(span));
                    }
                }
            }
        }
        (mono, dual)
    }

    fn emit_unit(&mut self, spans: &[&TextSpan], mono: &mut Vec<Operation>, dual: &mut Vec<Operation>) {
        let cleaned: Vec<String> = spans.iter().map(|s| sanitize(&s.text)).collect();
        let joined = cleaned
            .iter()
            .filter(|t| !t.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        if joined.is_empty() {
            for span in spans {
                mono.extend(passthrough_block(span));
                dual.extend(passthrough_block(span));
            }
            return;
        }

        let translated = match translate_chunked(
            self.backend,
            &joined,
            self.source_lang,
            self.target_lang,
            self.chunk_limit,
        ) {
            Ok(t) if !t.is_empty() => t,
            Ok(_) => {
                debug!("backend returned empty text, reusing source");
                self.fallback_units += 1;
                joined.clone()
            }
            Err(err) => {
                debug!(error = %err, "translation failed, reusing source");
                self.fallback_units += 1;
                joined.clone()
            }
        };

        // Redistribute the translated words across the unit's spans in
        // proportion to each span's share of the source words, so
        // multi-span lines keep their origins.
        let words: Vec<&str> = translated.split_whitespace().collect();
        let total_src: usize = cleaned.iter().map(|t| t.split_whitespace().count()).sum();
        let mut cursor = 0usize;
        for (idx, span) in spans.iter().enumerate() {
            let take = if idx + 1 == spans.len() {
                words.len().saturating_sub(cursor)
            } else {
                let src = cleaned[idx].split_whitespace().count();
                if total_src == 0 { 0 } else { words.len() * src / total_src }
            };
            let piece = words[cursor..(cursor + take).min(words.len())].join(" ");
            cursor = (cursor + take).min(words.len());

            dual.extend(passthrough_block(span));
            if !piece.is_empty() {
                mono.extend(self.translated_block(span, &piece, 0.0));
                dual.extend(self.translated_block(span, &piece, DUAL_OFFSET_FACTOR));
            }
        }
    }

    /// A self-contained text object carrying the translated run at the
    /// span's origin, offset in text space by `offset_factor` times the
    /// font size.
    fn translated_block(&self, span: &TextSpan, text: &str, offset_factor: f64) -> Vec<Operation> {
        let (a, b, c, d, e, f) = span.matrix;
        let (dx, dy) = apply_matrix_norm(span.matrix, (0.0, offset_factor * span.size));
        let size = span.size * self.font_scale;
        let mut ops = color_ops(&span.color);
        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new(
            "Tf",
            vec![
                Object::Name(self.font.key().to_vec()),
                Object::Real(size as f32),
            ],
        ));
        ops.push(Operation::new(
            "Tm",
            vec![
                Object::Real(a as f32),
                Object::Real(b as f32),
                Object::Real(c as f32),
                Object::Real(d as f32),
                Object::Real((e + dx) as f32),
                Object::Real((f + dy) as f32),
            ],
        ));
        ops.push(Operation::new("Tj", vec![self.font.encode(text)]));
        ops.push(Operation::new("ET", vec![]));
        ops
    }
}

/// A self-contained text object reproducing the original run: original
/// font resource, text state, matrix, and show operands.
fn passthrough_block(span: &TextSpan) -> Vec<Operation> {
    let (a, b, c, d, e, f) = span.matrix;
    let mut ops = color_ops(&span.color);
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new(
        "Tf",
        vec![
            Object::Name(span.font_name.clone()),
            Object::Real(span.size as f32),
        ],
    ));
    if span.charspace != 0.0 {
        ops.push(Operation::new("Tc", vec![Object::Real(span.charspace as f32)]));
    }
    if span.wordspace != 0.0 {
        ops.push(Operation::new("Tw", vec![Object::Real(span.wordspace as f32)]));
    }
    if span.scaling != 100.0 {
        ops.push(Operation::new("Tz", vec![Object::Real(span.scaling as f32)]));
    }
    if span.rise != 0.0 {
        ops.push(Operation::new("Ts", vec![Object::Real(span.rise as f32)]));
    }
    ops.push(Operation::new(
        "Tm",
        vec![
            Object::Real(a as f32),
            Object::Real(b as f32),
            Object::Real(c as f32),
            Object::Real(d as f32),
            Object::Real(e as f32),
            Object::Real(f as f32),
        ],
    ));
    ops.push(Operation::new("TJ", vec![Object::Array(span.original.clone())]));
    ops.push(Operation::new("ET", vec![]));
    ops
}

fn color_ops(color: &Color) -> Vec<Operation> {
    match *color {
        Color::Gray(g) => vec![Operation::new("g", vec![Object::Real(g as f32)])],
        Color::Rgb(r, g, b) => vec![Operation::new(
            "rg",
            vec![
                Object::Real(r as f32),
                Object::Real(g as f32),
                Object::Real(b as f32),
            ],
        )],
        Color::Cmyk(c, m, y, k) => vec![Operation::new(
            "k",
            vec![
                Object::Real(c as f32),
                Object::Real(m as f32),
                Object::Real(y as f32),
                Object::Real(k as f32),
            ],
        )],
        Color::Other => Vec::new(),
    }
}
