//! Transient text spans surfaced by the interpreter during stream replay.
//! A span does not outlive one page's rewrite pass.

use lopdf::Object;

use crate::model::state::Color;
use crate::utils::Matrix;

/// One show-text operation captured during stream replay.
///
/// `matrix` is the text matrix composed with the CTM at the time of the
/// show, so its translation component is the glyph origin in device space.
/// `original` keeps the operation's string/kerning operands so the run can
/// be re-emitted verbatim.
#[derive(Debug, Clone)]
pub struct TextSpan {
    /// Decoded Unicode content.
    pub text: String,
    /// Original show operands (strings and kerning numbers, TJ-shaped).
    pub original: Vec<Object>,
    /// Resource name of the font active at show time.
    pub font_name: Vec<u8>,
    pub size: f64,
    /// Text matrix composed with the CTM at show time.
    pub matrix: Matrix,
    /// Fill color at show time.
    pub color: Color,
    pub charspace: f64,
    pub wordspace: f64,
    /// Horizontal scaling in percent.
    pub scaling: f64,
    pub rise: f64,
}

impl TextSpan {
    /// Glyph origin in device space.
    pub fn device_origin(&self) -> (f64, f64) {
        (self.matrix.4, self.matrix.5)
    }
}
