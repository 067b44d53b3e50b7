//! Font handling: TrueType parsing and subsetting, Type0 embedding,
//! language-based resolution, and decoding of the input document's
//! existing fonts.

pub mod decoder;
pub mod embed;
pub mod resolver;
pub mod truetype;

pub use decoder::SpanDecoder;
pub use embed::{EmbeddedFont, TRANSLATION_FONT_KEY};
pub use resolver::{DirFontSource, FontSource, NoFontSource, resolve_font};
pub use truetype::TrueTypeFace;
