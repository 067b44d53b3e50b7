//! ONNX runtime wrapper for pretrained document layout detectors.
//!
//! Expects a YOLO-style model: input `[1, 3, H, W]` normalized to
//! `[0, 1]`, output rows of `(x0, y0, x1, y1, confidence, class_id)`
//! with non-maximum suppression already applied inside the graph.

use std::path::Path;
use std::sync::Mutex;

use image::RgbImage;
use image::imageops::FilterType;
use ndarray::Array4;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::TensorRef;
use tracing::debug;

use crate::error::{Result, TranslateError};
use crate::model::layout::{LayoutBox, RegionClass};

use super::LayoutModel;

const DEFAULT_INPUT_SIZE: u32 = 1024;
const CONFIDENCE_THRESHOLD: f32 = 0.25;
const PAD_VALUE: f32 = 114.0 / 255.0;

/// Letterbox geometry needed to map detections back to page pixels.
struct Letterbox {
    input: Array4<f32>,
    gain: f64,
    pad_x: f64,
    pad_y: f64,
}

pub struct OnnxLayoutModel {
    // ort sessions take `&mut self` to run; the engine predicts from
    // several page workers at once.
    session: Mutex<Session>,
    input_size: u32,
}

impl OnnxLayoutModel {
    pub fn load(path: &Path) -> Result<Self> {
        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| TranslateError::Layout(e.to_string()))?;
        Ok(OnnxLayoutModel {
            session: Mutex::new(session),
            input_size: DEFAULT_INPUT_SIZE,
        })
    }

    /// Scales the long side to `input_size`, pads the remainder to a
    /// multiple of `stride` with neutral gray, centered.
    fn letterbox(&self, image: &RgbImage, stride: u32) -> Letterbox {
        let stride = stride.max(1);
        let (w, h) = (image.width(), image.height());
        let size = f64::from(self.input_size);
        let gain = (size / f64::from(h)).min(size / f64::from(w)).min(1.0);
        let resized_w = ((f64::from(w) * gain).round() as u32).max(1);
        let resized_h = ((f64::from(h) * gain).round() as u32).max(1);

        let pad_w = (stride - resized_w % stride) % stride;
        let pad_h = (stride - resized_h % stride) % stride;
        let (full_w, full_h) = (resized_w + pad_w, resized_h + pad_h);
        let (left, top) = (pad_w / 2, pad_h / 2);

        let resized = image::imageops::resize(image, resized_w, resized_h, FilterType::Triangle);
        let mut input =
            Array4::from_elem((1, 3, full_h as usize, full_w as usize), PAD_VALUE);
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (col, row) = ((x + left) as usize, (y + top) as usize);
            for c in 0..3 {
                input[[0, c, row, col]] = f32::from(pixel.0[c]) / 255.0;
            }
        }

        Letterbox {
            input,
            gain,
            pad_x: f64::from(left),
            pad_y: f64::from(top),
        }
    }
}

impl LayoutModel for OnnxLayoutModel {
    fn predict(&self, image: &RgbImage, tile_size: u32) -> Result<Vec<LayoutBox>> {
        let letterbox = self.letterbox(image, tile_size);
        let (page_w, page_h) = (f64::from(image.width()), f64::from(image.height()));

        let mut session = self.session.lock().expect("session lock poisoned");
        let tensor = TensorRef::from_array_view(&letterbox.input)
            .map_err(|e| TranslateError::Layout(e.to_string()))?;
        let outputs = session
            .run(ort::inputs!["images" => tensor])
            .map_err(|e| TranslateError::Layout(e.to_string()))?;
        let (_, value) = outputs
            .iter()
            .next()
            .ok_or_else(|| TranslateError::Layout("model produced no outputs".into()))?;
        let preds = value
            .try_extract_array::<f32>()
            .map_err(|e| TranslateError::Layout(e.to_string()))?;

        let cols = preds.shape().last().copied().unwrap_or(0);
        if cols < 6 {
            return Err(TranslateError::Layout(format!(
                "unexpected detector output width {cols}"
            )));
        }

        let rows: Vec<f32> = preds.iter().copied().collect();
        let mut boxes = Vec::new();
        for row in rows.chunks_exact(cols) {
            let confidence = row[4];
            if confidence <= CONFIDENCE_THRESHOLD {
                continue;
            }
            let Some(class) = RegionClass::from_class_id(row[5] as usize) else {
                continue;
            };
            let unpad = |v: f32, pad: f64| (f64::from(v) - pad) / letterbox.gain;
            boxes.push(LayoutBox {
                x0: unpad(row[0], letterbox.pad_x).clamp(0.0, page_w),
                y0: unpad(row[1], letterbox.pad_y).clamp(0.0, page_h),
                x1: unpad(row[2], letterbox.pad_x).clamp(0.0, page_w),
                y1: unpad(row[3], letterbox.pad_y).clamp(0.0, page_h),
                class,
                confidence,
            });
        }
        boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        debug!(detections = boxes.len(), "layout inference done");
        Ok(boxes)
    }
}
