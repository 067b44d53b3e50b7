//! rosetta - layout-preserving PDF translation engine.
//!
//! Translates the natural-language text of a PDF in place while leaving
//! vector graphics, images, tables, and formulas untouched. The pipeline:
//! rasterize each page for a layout detector, build a per-pixel region mask,
//! replay the page's content stream through a rewriting interpreter, group
//! text spans into translation units, and assemble mono (translated only)
//! and dual (original interleaved with translation) output documents.

pub mod document;
pub mod error;
pub mod font;
pub mod high_level;
pub mod interp;
pub mod layout;
pub mod model;
pub mod translate;
pub mod utils;

pub use error::{Result, TranslateError};
pub use font::{DirFontSource, FontSource, NoFontSource};
pub use high_level::{
    CancelToken, DocumentTranslator, TranslateOptions, TranslatedDocument, clamp_threads,
};
pub use layout::{LayoutModel, Rasterizer, SolidRasterizer, WholePageModel};
pub use model::layout::{LayoutBox, OwnerTag, RegionClass, RegionMask};
pub use translate::{IdentityTranslator, TranslationBackend};
