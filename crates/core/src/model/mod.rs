//! Data model for the rewriting pipeline: interpreter state, layout
//! classification output, and transient text spans.

pub mod layout;
pub mod span;
pub mod state;

pub use layout::{LayoutBox, OwnerTag, RegionClass, RegionMask};
pub use span::TextSpan;
pub use state::{Color, GraphicState, TextState};
