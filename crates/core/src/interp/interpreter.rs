//! The content-stream rewriting state machine.
//!
//! Replays a page's operators while maintaining the graphics and text
//! state, and produces three operator streams per execution context:
//! the `base` stream (every kept operator: state changes, clipping,
//! preserved strokes, image invocations — with fill paints suppressed and
//! text objects removed), and the `mono`/`dual` replacement text streams
//! materialized from the captured spans.
//!
//! Output layout per object:
//! - page: `q {base} Q 1 0 0 1 x0 y0 cm {new}` in a fresh content object,
//!   with the page's original content objects voided;
//! - form XObject: `q {base} Q {inv} cm {new}` replacing the form's own
//!   stream, where `inv` is the inverse of the form matrix composed with
//!   the CTM at invocation, so `new` can carry device-space coordinates.

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::document::{PageInfo, resolve};
use crate::error::{Result, TranslateError};
use crate::font::SpanDecoder;
use crate::model::span::TextSpan;
use crate::model::state::{Color, GraphicState, TextState};
use crate::translate::SpanRouter;
use crate::utils::{
    Matrix, Point, apply_matrix_pt, invert_matrix, mult_matrix, translate_matrix,
};

/// How unknown operators are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteMode {
    /// Unknown operators are dropped with a debug log.
    Permissive,
    /// Unknown operators abort the page with a malformed-stream error.
    Strict,
}

/// Everything one page's rewrite produced.
pub struct RewriteOutcome {
    /// Replacement bytes for the page's fresh content object.
    pub page_mono: Vec<u8>,
    pub page_dual: Vec<u8>,
    /// Replacement bytes per visited form XObject.
    pub form_patches: Vec<(ObjectId, Vec<u8>, Vec<u8>)>,
    /// Translation units that fell back to their source text.
    pub fallback_units: usize,
}

/// Kind tag for current-path points; only an `m`+`l` pair can qualify for
/// stroke preservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathKind {
    Move,
    Line,
    Other,
}

struct ExecContext {
    resources: Dictionary,
    ctm: Matrix,
    ts: TextState,
    gs: GraphicState,
    stack: Vec<(Matrix, TextState, GraphicState)>,
    base: Vec<Operation>,
    spans: Vec<TextSpan>,
    path: Vec<(PathKind, Point)>,
    decoders: FxHashMap<Vec<u8>, SpanDecoder>,
    /// BX/EX nesting depth; unknown operators inside are tolerated even
    /// in strict mode.
    compat: usize,
}

impl ExecContext {
    fn new(resources: Dictionary, ctm: Matrix) -> Self {
        ExecContext {
            resources,
            ctm,
            ts: TextState::new(),
            gs: GraphicState::new(),
            stack: Vec::new(),
            base: Vec::new(),
            spans: Vec::new(),
            path: Vec::new(),
            decoders: FxHashMap::default(),
            compat: 0,
        }
    }
}

struct ContextOutput {
    base: Vec<Operation>,
    mono: Vec<Operation>,
    dual: Vec<Operation>,
}

/// Rewrites one page (and the forms it reaches) against a region mask.
pub struct StreamRewriter<'a> {
    doc: &'a Document,
    router: SpanRouter<'a>,
    mode: RewriteMode,
    page_number: usize,
    /// Form objects on the current recursion path, for cycle termination.
    visited: FxHashSet<ObjectId>,
    form_patches: Vec<(ObjectId, Vec<u8>, Vec<u8>)>,
    fallback_decoder: SpanDecoder,
}

impl<'a> StreamRewriter<'a> {
    pub fn new(
        doc: &'a Document,
        router: SpanRouter<'a>,
        mode: RewriteMode,
        page_number: usize,
    ) -> Self {
        StreamRewriter {
            doc,
            router,
            mode,
            page_number,
            visited: FxHashSet::default(),
            form_patches: Vec::new(),
            fallback_decoder: SpanDecoder::fallback(),
        }
    }

    /// Runs the page's content stream and materializes the page patch.
    pub fn rewrite_page(mut self, page: &PageInfo) -> Result<RewriteOutcome> {
        let content = Content::decode(&page.content).map_err(|e| {
            TranslateError::MalformedStream {
                page: page.number,
                msg: e.to_string(),
            }
        })?;
        // lopdf's decoder is permissive: a broken stream can come back as
        // zero operations instead of an error. Treat that as malformed so
        // the page keeps its original appearance.
        if content.operations.is_empty() && page.content.iter().any(|b| !b.is_ascii_whitespace()) {
            return Err(TranslateError::MalformedStream {
                page: page.number,
                msg: "content stream decoded to no operations".into(),
            });
        }

        let (x0, y0, x1, y1) = page.cropbox;
        // Fold the crop-box origin and page rotation into the initial CTM;
        // the origin is re-added by the trailing cm in the page patch.
        let ctm: Matrix = match page.rotate {
            90 => (0.0, -1.0, 1.0, 0.0, -y0, x1),
            180 => (-1.0, 0.0, 0.0, -1.0, x1, y1),
            270 => (0.0, 1.0, -1.0, 0.0, y1, -x0),
            _ => (1.0, 0.0, 0.0, 1.0, -x0, -y0),
        };

        let out = self.run(content.operations, page.resources.clone(), ctm)?;
        let restore: Matrix = (1.0, 0.0, 0.0, 1.0, x0, y0);
        let page_mono = encode(wrap(&out.base, restore, out.mono))?;
        let page_dual = encode(wrap(&out.base, restore, out.dual))?;

        Ok(RewriteOutcome {
            page_mono,
            page_dual,
            form_patches: self.form_patches,
            fallback_units: self.router.fallback_units(),
        })
    }

    fn run(
        &mut self,
        operations: Vec<Operation>,
        resources: Dictionary,
        ctm: Matrix,
    ) -> Result<ContextOutput> {
        let mut ctx = ExecContext::new(resources, ctm);
        for op in operations {
            self.execute(&mut ctx, op)?;
        }
        let (mono, dual) = self.router.materialize(&ctx.spans);
        Ok(ContextOutput {
            base: ctx.base,
            mono,
            dual,
        })
    }

    fn execute(&mut self, ctx: &mut ExecContext, op: Operation) -> Result<()> {
        let operator = op.operator.clone();
        match operator.as_str() {
            // ---- graphics state ----
            "q" => {
                ctx.stack.push((ctx.ctm, ctx.ts.clone(), ctx.gs.clone()));
                ctx.base.push(op);
            }
            "Q" => {
                if let Some((ctm, ts, gs)) = ctx.stack.pop() {
                    ctx.ctm = ctm;
                    ctx.ts = ts;
                    ctx.gs = gs;
                }
                ctx.base.push(op);
            }
            "cm" => {
                if let Some(m) = matrix_operands(&op.operands) {
                    ctx.ctm = mult_matrix(m, ctx.ctm);
                }
                ctx.base.push(op);
            }
            "w" => {
                if let Some(v) = number_at(&op.operands, 0) {
                    ctx.gs.linewidth = v;
                }
                ctx.base.push(op);
            }
            "J" | "j" | "M" | "d" | "ri" | "i" | "gs" => ctx.base.push(op),

            // ---- color ----
            "G" => {
                if let Some(v) = number_at(&op.operands, 0) {
                    ctx.gs.scolor = Color::Gray(v);
                }
                ctx.base.push(op);
            }
            "g" => {
                if let Some(v) = number_at(&op.operands, 0) {
                    ctx.gs.ncolor = Color::Gray(v);
                }
                ctx.base.push(op);
            }
            "RG" => {
                if let Some(c) = rgb_operands(&op.operands) {
                    ctx.gs.scolor = c;
                }
                ctx.base.push(op);
            }
            "rg" => {
                if let Some(c) = rgb_operands(&op.operands) {
                    ctx.gs.ncolor = c;
                }
                ctx.base.push(op);
            }
            "K" => {
                if let Some(c) = cmyk_operands(&op.operands) {
                    ctx.gs.scolor = c;
                }
                ctx.base.push(op);
            }
            "k" => {
                if let Some(c) = cmyk_operands(&op.operands) {
                    ctx.gs.ncolor = c;
                }
                ctx.base.push(op);
            }
            "CS" | "cs" => ctx.base.push(op),
            "SC" | "SCN" => {
                ctx.gs.scolor = component_color(&op.operands);
                ctx.base.push(op);
            }
            "sc" | "scn" => {
                ctx.gs.ncolor = component_color(&op.operands);
                ctx.base.push(op);
            }

            // ---- path construction ----
            "m" => {
                if let Some(p) = point_at(&op.operands, 0) {
                    ctx.path.push((PathKind::Move, p));
                }
                ctx.base.push(op);
            }
            "l" => {
                if let Some(p) = point_at(&op.operands, 0) {
                    ctx.path.push((PathKind::Line, p));
                }
                ctx.base.push(op);
            }
            "c" | "v" | "y" | "re" | "h" => {
                ctx.path.push((PathKind::Other, (0.0, 0.0)));
                ctx.base.push(op);
            }

            // ---- path painting ----
            "S" => {
                if self.preserve_stroke(ctx) {
                    ctx.base.push(op);
                } else {
                    ctx.base.push(Operation::new("n", vec![]));
                }
                ctx.path.clear();
            }
            // Close-and-stroke never qualifies as a bare two-point segment.
            "s" => {
                ctx.base.push(Operation::new("n", vec![]));
                ctx.path.clear();
            }
            // Fill paints are suppressed; `n` still ends the path so a
            // pending clip takes effect.
            "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" => {
                ctx.base.push(Operation::new("n", vec![]));
                ctx.path.clear();
            }
            "n" => {
                ctx.base.push(op);
                ctx.path.clear();
            }
            "W" | "W*" => ctx.base.push(op),
            "sh" => {}

            // ---- text ----
            "BT" => ctx.ts.reset(),
            "ET" => {}
            "Tc" => {
                if let Some(v) = number_at(&op.operands, 0) {
                    ctx.ts.charspace = v;
                }
            }
            "Tw" => {
                if let Some(v) = number_at(&op.operands, 0) {
                    ctx.ts.wordspace = v;
                }
            }
            "Tz" => {
                if let Some(v) = number_at(&op.operands, 0) {
                    ctx.ts.scaling = v;
                }
            }
            "TL" => {
                if let Some(v) = number_at(&op.operands, 0) {
                    ctx.ts.leading = v;
                }
            }
            "Ts" => {
                if let Some(v) = number_at(&op.operands, 0) {
                    ctx.ts.rise = v;
                }
            }
            "Tr" => {
                if let Some(v) = number_at(&op.operands, 0) {
                    ctx.ts.render = v as i64;
                }
            }
            "Tf" => self.select_font(ctx, &op.operands),
            "Td" => {
                if let (Some(tx), Some(ty)) = (number_at(&op.operands, 0), number_at(&op.operands, 1))
                {
                    ctx.ts.matrix = translate_matrix(ctx.ts.matrix, (tx, ty));
                    ctx.ts.linematrix = (0.0, 0.0);
                }
            }
            "TD" => {
                if let (Some(tx), Some(ty)) = (number_at(&op.operands, 0), number_at(&op.operands, 1))
                {
                    ctx.ts.leading = -ty;
                    ctx.ts.matrix = translate_matrix(ctx.ts.matrix, (tx, ty));
                    ctx.ts.linematrix = (0.0, 0.0);
                }
            }
            "Tm" => {
                if let Some(m) = matrix_operands(&op.operands) {
                    ctx.ts.matrix = m;
                    ctx.ts.linematrix = (0.0, 0.0);
                }
            }
            "T*" => next_line(&mut ctx.ts),
            "Tj" | "TJ" => {
                let items = show_items(op.operands);
                self.show(ctx, items);
            }
            "'" => {
                next_line(&mut ctx.ts);
                let items = show_items(op.operands);
                self.show(ctx, items);
            }
            "\"" => {
                if let (Some(aw), Some(ac)) = (number_at(&op.operands, 0), number_at(&op.operands, 1))
                {
                    ctx.ts.wordspace = aw;
                    ctx.ts.charspace = ac;
                }
                next_line(&mut ctx.ts);
                let items: Vec<Object> = op.operands.into_iter().skip(2).collect();
                self.show(ctx, show_items(items));
            }

            // ---- XObjects ----
            "Do" => self.invoke_xobject(ctx, op)?,

            // Inline images and marked content do not survive the rewrite.
            "BI" | "ID" | "EI" => {}
            "BMC" | "BDC" | "EMC" | "MP" | "DP" => {}

            // Compatibility sections.
            "BX" => {
                ctx.compat += 1;
                ctx.base.push(op);
            }
            "EX" => {
                ctx.compat = ctx.compat.saturating_sub(1);
                ctx.base.push(op);
            }

            // Type 3 glyph metrics.
            "d0" | "d1" => ctx.base.push(op),

            other => {
                if self.mode == RewriteMode::Strict && ctx.compat == 0 {
                    return Err(TranslateError::MalformedStream {
                        page: self.page_number,
                        msg: format!("unknown operator {other:?}"),
                    });
                }
                debug!(operator = other, "ignoring unknown operator");
            }
        }
        Ok(())
    }

    /// A stroke survives only for an exactly-two-point segment that is
    /// horizontal after the CTM and painted pure black: fraction bars,
    /// underlines, and table rules.
    fn preserve_stroke(&self, ctx: &ExecContext) -> bool {
        if ctx.path.len() != 2 {
            return false;
        }
        let (k0, p0) = ctx.path[0];
        let (k1, p1) = ctx.path[1];
        if k0 != PathKind::Move || k1 != PathKind::Line {
            return false;
        }
        let (_, y0) = apply_matrix_pt(ctx.ctm, p0);
        let (_, y1) = apply_matrix_pt(ctx.ctm, p1);
        (y0 - y1).abs() < 1e-6 && ctx.gs.scolor.is_black()
    }

    fn select_font(&self, ctx: &mut ExecContext, operands: &[Object]) {
        let Some(Object::Name(name)) = operands.first() else {
            return;
        };
        if let Some(size) = number_at(operands, 1) {
            ctx.ts.fontsize = size;
        }
        ctx.ts.fontname = name.clone();
        if !ctx.decoders.contains_key(name) {
            let decoder = self
                .font_dict(&ctx.resources, name)
                .map(|font| SpanDecoder::from_font(self.doc, font))
                .unwrap_or_else(SpanDecoder::fallback);
            ctx.decoders.insert(name.clone(), decoder);
        }
    }

    fn font_dict<'d>(&self, resources: &'d Dictionary, name: &[u8]) -> Option<&'d Dictionary>
    where
        'a: 'd,
    {
        let fonts = resources.get(b"Font").ok()?;
        let fonts = match resolve(self.doc, fonts) {
            Object::Dictionary(d) => d,
            _ => return None,
        };
        match resolve(self.doc, fonts.get(name).ok()?) {
            Object::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    /// Captures one show operation as a span and advances the text matrix.
    fn show(&mut self, ctx: &mut ExecContext, items: Vec<Object>) {
        if !items
            .iter()
            .any(|o| matches!(o, Object::String(..)))
        {
            return;
        }
        let decoder = ctx
            .decoders
            .get(&ctx.ts.fontname)
            .unwrap_or(&self.fallback_decoder);

        let size = ctx.ts.fontsize;
        let scale = ctx.ts.scaling / 100.0;
        let origin = translate_matrix(ctx.ts.matrix, ctx.ts.linematrix);
        let mut text = String::new();
        let mut advance = 0.0f64;
        for item in &items {
            match item {
                Object::String(bytes, _) => {
                    text.push_str(&decoder.decode(bytes));
                    for code in decoder.codes(bytes) {
                        advance += decoder.width(code.cid) / 1000.0 * size + ctx.ts.charspace;
                        if code.is_space {
                            advance += ctx.ts.wordspace;
                        }
                    }
                }
                Object::Integer(n) => advance -= *n as f64 / 1000.0 * size,
                Object::Real(n) => advance -= *n as f64 / 1000.0 * size,
                _ => {}
            }
        }
        ctx.ts.linematrix.0 += advance * scale;

        ctx.spans.push(TextSpan {
            text,
            original: items,
            font_name: ctx.ts.fontname.clone(),
            size,
            matrix: mult_matrix(origin, ctx.ctm),
            color: ctx.gs.ncolor,
            charspace: ctx.ts.charspace,
            wordspace: ctx.ts.wordspace,
            scaling: ctx.ts.scaling,
            rise: ctx.ts.rise,
        });
    }

    fn invoke_xobject(&mut self, ctx: &mut ExecContext, op: Operation) -> Result<()> {
        let Some(Object::Name(name)) = op.operands.first().cloned() else {
            ctx.base.push(op);
            return Ok(());
        };
        let Some((form_id, dict, content)) = self.form_target(ctx, &name) else {
            // Image XObjects (and anything unresolvable) pass through.
            ctx.base.push(op);
            return Ok(());
        };

        if !self.visited.insert(form_id) {
            warn!(?form_id, "form XObject cycle, leaving invocation as is");
            ctx.base.push(op);
            return Ok(());
        }
        let result = self.rewrite_form(ctx, form_id, &dict, &content);
        self.visited.remove(&form_id);
        result?;
        ctx.base.push(op);
        Ok(())
    }

    /// Resolves a `Do` target to a form object worth recursing into.
    fn form_target(
        &self,
        ctx: &ExecContext,
        name: &[u8],
    ) -> Option<(ObjectId, Dictionary, Vec<u8>)> {
        let xobjects = match resolve(self.doc, ctx.resources.get(b"XObject").ok()?) {
            Object::Dictionary(d) => d,
            _ => return None,
        };
        let &Object::Reference(form_id) = xobjects.get(name).ok()? else {
            return None;
        };
        let Ok(Object::Stream(stream)) = self.doc.get_object(form_id) else {
            return None;
        };
        match stream.dict.get(b"Subtype") {
            Ok(Object::Name(subtype)) if subtype.as_slice() == b"Form" => {}
            _ => return None,
        }
        let content = stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone());
        Some((form_id, stream.dict.clone(), content))
    }

    fn rewrite_form(
        &mut self,
        ctx: &ExecContext,
        form_id: ObjectId,
        dict: &Dictionary,
        content: &[u8],
    ) -> Result<()> {
        if dict.get(b"BBox").is_err() {
            debug!(?form_id, "form without BBox, left untouched");
            return Ok(());
        }
        let form_matrix = dict
            .get(b"Matrix")
            .ok()
            .and_then(|o| match resolve(self.doc, o) {
                Object::Array(items) => matrix_operands(items),
                _ => None,
            })
            .unwrap_or(crate::utils::MATRIX_IDENTITY);
        let composed = mult_matrix(form_matrix, ctx.ctm);
        let Some(inverse) = invert_matrix(composed) else {
            warn!(?form_id, "singular form transform, left untouched");
            return Ok(());
        };

        let decoded = match Content::decode(content) {
            Ok(c) if !c.operations.is_empty()
                || content.iter().all(|b| b.is_ascii_whitespace()) =>
            {
                Some(c.operations)
            }
            Ok(_) => None,
            Err(e) => {
                if self.mode == RewriteMode::Strict {
                    return Err(TranslateError::MalformedStream {
                        page: self.page_number,
                        msg: format!("form {form_id:?}: {e}"),
                    });
                }
                debug!(?form_id, error = %e, "undecodable form, left untouched");
                return Ok(());
            }
        };
        let Some(operations) = decoded else {
            if self.mode == RewriteMode::Strict {
                return Err(TranslateError::MalformedStream {
                    page: self.page_number,
                    msg: format!("form {form_id:?}: stream decoded to no operations"),
                });
            }
            debug!(?form_id, "form decoded to no operations, left untouched");
            return Ok(());
        };
        let resources = dict
            .get(b"Resources")
            .ok()
            .map(|o| resolve(self.doc, o))
            .and_then(|o| match o {
                Object::Dictionary(d) => Some(d.clone()),
                _ => None,
            })
            .unwrap_or_else(|| ctx.resources.clone());

        let out = self.run(operations, resources, composed)?;
        let mono = encode(wrap(&out.base, inverse, out.mono))?;
        let dual = encode(wrap(&out.base, inverse, out.dual))?;
        self.form_patches.push((form_id, mono, dual));
        Ok(())
    }
}

fn next_line(ts: &mut TextState) {
    ts.matrix = translate_matrix(ts.matrix, (0.0, -ts.leading));
    ts.linematrix = (0.0, 0.0);
}

/// Normalizes Tj/'/" operands and TJ arrays into one item list of
/// strings and kerning numbers.
fn show_items(operands: Vec<Object>) -> Vec<Object> {
    match operands.into_iter().next() {
        Some(Object::Array(items)) => items,
        Some(obj @ Object::String(..)) => vec![obj],
        _ => Vec::new(),
    }
}

/// `q {base} Q {restore} cm {new}`
fn wrap(base: &[Operation], restore: Matrix, new_ops: Vec<Operation>) -> Vec<Operation> {
    let mut ops = Vec::with_capacity(base.len() + new_ops.len() + 3);
    ops.push(Operation::new("q", vec![]));
    ops.extend_from_slice(base);
    ops.push(Operation::new("Q", vec![]));
    let (a, b, c, d, e, f) = restore;
    ops.push(Operation::new(
        "cm",
        vec![
            Object::Real(a as f32),
            Object::Real(b as f32),
            Object::Real(c as f32),
            Object::Real(d as f32),
            Object::Real(e as f32),
            Object::Real(f as f32),
        ],
    ));
    ops.extend(new_ops);
    ops
}

fn encode(operations: Vec<Operation>) -> Result<Vec<u8>> {
    Content { operations }
        .encode()
        .map_err(|e| TranslateError::Parse(e.to_string()))
}

fn number(obj: &Object) -> Option<f64> {
    match *obj {
        Object::Integer(i) => Some(i as f64),
        Object::Real(r) => Some(r as f64),
        _ => None,
    }
}

fn number_at(operands: &[Object], index: usize) -> Option<f64> {
    operands.get(index).and_then(number)
}

fn point_at(operands: &[Object], index: usize) -> Option<Point> {
    Some((number_at(operands, index)?, number_at(operands, index + 1)?))
}

fn matrix_operands(operands: &[Object]) -> Option<Matrix> {
    if operands.len() < 6 {
        return None;
    }
    Some((
        number(&operands[0])?,
        number(&operands[1])?,
        number(&operands[2])?,
        number(&operands[3])?,
        number(&operands[4])?,
        number(&operands[5])?,
    ))
}

fn rgb_operands(operands: &[Object]) -> Option<Color> {
    Some(Color::Rgb(
        number_at(operands, 0)?,
        number_at(operands, 1)?,
        number_at(operands, 2)?,
    ))
}

fn cmyk_operands(operands: &[Object]) -> Option<Color> {
    Some(Color::Cmyk(
        number_at(operands, 0)?,
        number_at(operands, 1)?,
        number_at(operands, 2)?,
        number_at(operands, 3)?,
    ))
}

/// Approximates the color set by SC/SCN/sc/scn from its operand shape.
fn component_color(operands: &[Object]) -> Color {
    if operands
        .iter()
        .any(|o| matches!(o, Object::Name(_)))
    {
        return Color::Other;
    }
    let nums: Vec<f64> = operands.iter().filter_map(number).collect();
    match nums.as_slice() {
        [g] => Color::Gray(*g),
        [r, g, b] => Color::Rgb(*r, *g, *b),
        [c, m, y, k] => Color::Cmyk(*c, *m, *y, *k),
        _ => Color::Other,
    }
}
