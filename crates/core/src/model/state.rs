//! Interpreter state: colors, text state, graphic state.
//!
//! One `TextState`/`GraphicState` pair exists per content-stream execution
//! context (page or nested form) and is saved/restored by `q`/`Q`.

use crate::utils::{EPSILON, MATRIX_IDENTITY, Matrix, Point, approx_eq};

/// A device-independent color in one of the PDF base color models.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Color {
    Gray(f64),
    Rgb(f64, f64, f64),
    Cmyk(f64, f64, f64, f64),
    /// Pattern or other colorspace we do not model component-wise.
    Other,
}

impl Color {
    /// Pure black in any of the base color models.
    pub fn is_black(&self) -> bool {
        match *self {
            Color::Gray(g) => approx_eq(g, 0.0, EPSILON),
            Color::Rgb(r, g, b) => {
                approx_eq(r, 0.0, EPSILON) && approx_eq(g, 0.0, EPSILON) && approx_eq(b, 0.0, EPSILON)
            }
            Color::Cmyk(c, m, y, k) => {
                approx_eq(c, 0.0, EPSILON)
                    && approx_eq(m, 0.0, EPSILON)
                    && approx_eq(y, 0.0, EPSILON)
                    && approx_eq(k, 1.0, EPSILON)
            }
            Color::Other => false,
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::Gray(0.0)
    }
}

/// Text state as mutated by `Tf`, `Tc`, `Tw`, `Tz`, `TL`, `Ts`, `Tr`, and
/// the text-positioning operators.
#[derive(Debug, Clone)]
pub struct TextState {
    /// Resource name of the active font (the `Tf` operand).
    pub fontname: Vec<u8>,
    pub fontsize: f64,
    pub charspace: f64,
    pub wordspace: f64,
    /// Horizontal scaling in percent.
    pub scaling: f64,
    pub leading: f64,
    /// Text rendering mode.
    pub render: i64,
    pub rise: f64,
    /// Text matrix, valid between BT and ET.
    pub matrix: Matrix,
    /// Line matrix (start of the current line).
    pub linematrix: Point,
}

impl TextState {
    pub fn new() -> Self {
        TextState {
            fontname: Vec::new(),
            fontsize: 0.0,
            charspace: 0.0,
            wordspace: 0.0,
            scaling: 100.0,
            leading: 0.0,
            render: 0,
            rise: 0.0,
            matrix: MATRIX_IDENTITY,
            linematrix: (0.0, 0.0),
        }
    }

    /// Resets the per-text-object portion of the state (BT).
    pub fn reset(&mut self) {
        self.matrix = MATRIX_IDENTITY;
        self.linematrix = (0.0, 0.0);
    }
}

impl Default for TextState {
    fn default() -> Self {
        TextState::new()
    }
}

/// Graphic state as mutated by the general graphics state operators.
#[derive(Debug, Clone)]
pub struct GraphicState {
    pub linewidth: f64,
    /// Stroking color.
    pub scolor: Color,
    /// Non-stroking (fill) color.
    pub ncolor: Color,
}

impl GraphicState {
    pub fn new() -> Self {
        GraphicState {
            linewidth: 1.0,
            scolor: Color::default(),
            ncolor: Color::default(),
        }
    }
}

impl Default for GraphicState {
    fn default() -> Self {
        GraphicState::new()
    }
}
