//! Layout classification output and the per-page region mask.
//!
//! The detector reports boxes in raster-image coordinates (y grows
//! downward). The mask flips them into PDF device space (y grows upward)
//! at build time, so sampling takes plain PDF points.

/// Region classes reported by the layout detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionClass {
    Title,
    PlainText,
    Abandon,
    Figure,
    FigureCaption,
    Table,
    TableCaption,
    TableFootnote,
    IsolateFormula,
    FormulaCaption,
}

impl RegionClass {
    /// Classes whose content must never be altered. Text falling under a
    /// protected box is reproduced verbatim regardless of any overlapping
    /// ordinary-text box.
    pub fn is_protected(&self) -> bool {
        matches!(
            self,
            RegionClass::Figure
                | RegionClass::Table
                | RegionClass::IsolateFormula
                | RegionClass::FormulaCaption
                | RegionClass::Abandon
        )
    }

    /// Maps a detector class id to a region class.
    pub fn from_class_id(id: usize) -> Option<RegionClass> {
        match id {
            0 => Some(RegionClass::Title),
            1 => Some(RegionClass::PlainText),
            2 => Some(RegionClass::Abandon),
            3 => Some(RegionClass::Figure),
            4 => Some(RegionClass::FigureCaption),
            5 => Some(RegionClass::Table),
            6 => Some(RegionClass::TableCaption),
            7 => Some(RegionClass::TableFootnote),
            8 => Some(RegionClass::IsolateFormula),
            9 => Some(RegionClass::FormulaCaption),
            _ => None,
        }
    }
}

/// One detection: an axis-aligned box in image coordinates with class and
/// confidence. Lists arrive sorted by descending confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    pub class: RegionClass,
    pub confidence: f32,
}

/// Ownership of one mask cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerTag {
    /// Never covered by any box; treated as non-translatable.
    Unassigned,
    /// Covered by a protected-class box; wins over any text group.
    Protected,
    /// Covered by an ordinary-text box; the id is the box's detection
    /// order, used purely as a grouping key.
    TextGroup(u32),
}

/// Per-page occupancy grid, one cell per raster pixel, indexed in PDF
/// device space (row 0 is the bottom of the page).
#[derive(Debug, Clone)]
pub struct RegionMask {
    width: usize,
    height: usize,
    cells: Vec<OwnerTag>,
}

impl RegionMask {
    /// Builds the mask for one page.
    ///
    /// Two passes: ordinary boxes stamp `TextGroup(index)` first, then
    /// protected boxes stamp `Protected` unconditionally, so a cell under
    /// both is always protected regardless of box order. The vertical
    /// interval is widened by one pixel on each side, clipped to the page.
    pub fn build(width: usize, height: usize, boxes: &[LayoutBox]) -> RegionMask {
        let mut mask = RegionMask {
            width,
            height,
            cells: vec![OwnerTag::Unassigned; width * height],
        };
        for (index, bx) in boxes.iter().enumerate() {
            if !bx.class.is_protected() {
                mask.stamp(bx, OwnerTag::TextGroup(index as u32));
            }
        }
        for bx in boxes.iter() {
            if bx.class.is_protected() {
                mask.stamp(bx, OwnerTag::Protected);
            }
        }
        mask
    }

    /// An empty mask (everything unassigned).
    pub fn empty(width: usize, height: usize) -> RegionMask {
        RegionMask {
            width,
            height,
            cells: vec![OwnerTag::Unassigned; width * height],
        }
    }

    fn stamp(&mut self, bx: &LayoutBox, tag: OwnerTag) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        let h = self.height as f64;
        let clamp_x = |v: f64| (v.floor().max(0.0) as usize).min(self.width);
        let clamp_y = |v: f64| (v.floor().max(0.0) as usize).min(self.height);
        // Flip image rows (y down) to device rows (y up), padding the
        // vertical interval by one pixel on each side.
        let x0 = clamp_x(bx.x0 - 1.0);
        let x1 = clamp_x(bx.x1 + 1.0);
        let y0 = clamp_y(h - bx.y1 - 1.0);
        let y1 = clamp_y(h - bx.y0 + 1.0);
        for y in y0..y1 {
            let row = y * self.width;
            for x in x0..x1 {
                self.cells[row + x] = tag;
            }
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Samples the mask at a PDF device-space point (1 cell per point).
    /// Out-of-range points are unassigned.
    pub fn tag_at(&self, x: f64, y: f64) -> OwnerTag {
        if x < 0.0 || y < 0.0 {
            return OwnerTag::Unassigned;
        }
        let xi = x.floor() as usize;
        let yi = y.floor() as usize;
        if xi >= self.width || yi >= self.height {
            return OwnerTag::Unassigned;
        }
        self.cells[yi * self.width + xi]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn test_unassigned_by_default() {
        let mask = RegionMask::build(10, 10, &[]);
        assert_eq!(mask.tag_at(5.0, 5.0), OwnerTag::Unassigned);
    }

    #[test]
    fn test_out_of_range_is_unassigned() {
        let mask = RegionMask::build(10, 10, &[text_box(0.0, 0.0, 10.0, 10.0)]);
        assert_eq!(mask.tag_at(-1.0, 5.0), OwnerTag::Unassigned);
        assert_eq!(mask.tag_at(5.0, 11.0), OwnerTag::Unassigned);
    }

    #[test]
    fn test_image_to_device_flip() {
        // A box hugging the top of a 100px image covers the top of the
        // device-space mask, i.e. high y values.
        let mask = RegionMask::build(100, 100, &[text_box(10.0, 0.0, 90.0, 20.0)]);
        assert_eq!(mask.tag_at(50.0, 90.0), OwnerTag::TextGroup(0));
        assert_eq!(mask.tag_at(50.0, 10.0), OwnerTag::Unassigned);
    }

    #[test]
    fn test_protected_wins_in_any_order() {
        let text = text_box(0.0, 0.0, 50.0, 50.0);
        let figure = LayoutBox {
            class: RegionClass::Figure,
            ..text_box(20.0, 20.0, 40.0, 40.0)
        };
        let a = RegionMask::build(100, 100, &[text.clone(), figure.clone()]);
        let b = RegionMask::build(100, 100, &[figure, text]);
        for mask in [&a, &b] {
            assert_eq!(mask.tag_at(30.0, 70.0), OwnerTag::Protected);
            assert!(matches!(mask.tag_at(10.0, 90.0), OwnerTag::TextGroup(_)));
        }
        // The text-group id reflects detection order.
        assert_eq!(a.tag_at(10.0, 90.0), OwnerTag::TextGroup(0));
        assert_eq!(b.tag_at(10.0, 90.0), OwnerTag::TextGroup(1));
    }
}
