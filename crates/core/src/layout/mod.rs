//! Layout detection seam: the classifier and rasterizer contracts plus
//! the built-in trivial implementations.
//!
//! The neural detector itself is a black box behind [`LayoutModel`];
//! the `onnx` module (feature-gated) wraps the bundled ONNX runtime.

#[cfg(feature = "onnx")]
pub mod onnx;

use image::RgbImage;

use crate::document::PageInfo;
use crate::error::Result;
use crate::model::layout::{LayoutBox, RegionClass};

/// A pretrained layout detector. Implementations return boxes in image
/// coordinates (y grows downward), sorted by descending confidence.
pub trait LayoutModel: Send + Sync {
    fn predict(&self, image: &RgbImage, tile_size: u32) -> Result<Vec<LayoutBox>>;
}

/// Produces the raster image the detector classifies. One rasterization
/// per page, at one pixel per PDF point, in display orientation: a page
/// with `/Rotate 90` or `270` yields a raster with the crop box's extents
/// transposed, matching the device space the rewriter works in.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, page: &PageInfo) -> Result<RgbImage>;
}

/// Rasterizer that paints nothing: a white page of the crop-box size.
///
/// Rendering glyphs and graphics is a rendering-engine concern; for
/// detectors that only need page geometry (and for tests) a blank page
/// of the correct dimensions is sufficient.
#[derive(Debug, Default)]
pub struct SolidRasterizer;

impl Rasterizer for SolidRasterizer {
    fn rasterize(&self, page: &PageInfo) -> Result<RgbImage> {
        let (x0, y0, x1, y1) = page.cropbox;
        let mut width = (x1 - x0).abs().ceil().max(1.0) as u32;
        let mut height = (y1 - y0).abs().ceil().max(1.0) as u32;
        if page.rotate % 180 != 0 {
            std::mem::swap(&mut width, &mut height);
        }
        Ok(RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255])))
    }
}

/// Degenerate model that tags the whole page as one ordinary text region.
/// Used when no detector is configured: every span becomes translatable
/// and nothing is protected.
#[derive(Debug, Default)]
pub struct WholePageModel;

impl LayoutModel for WholePageModel {
    fn predict(&self, image: &RgbImage, _tile_size: u32) -> Result<Vec<LayoutBox>> {
        Ok(vec![LayoutBox {
            x0: 0.0,
            y0: 0.0,
            x1: image.width() as f64,
            y1: image.height() as f64,
            class: RegionClass::PlainText,
            confidence: 1.0,
        }])
    }
}
