//! Split-screen layout math: quarter-turn correction, aspect-fill crops and slots

use crate::types::Dimensions;

/// Rotation correction rounded to the nearest quarter turn (clockwise)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuarterTurn {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl QuarterTurn {
    /// Round an arbitrary angle in degrees; non-finite angles mean no rotation
    pub fn from_degrees(degrees: f32) -> Self {
        if !degrees.is_finite() {
            return QuarterTurn::None;
        }
        let quarters = (degrees / 90.0).round() as i64;
        match quarters.rem_euclid(4) {
            1 => QuarterTurn::Cw90,
            2 => QuarterTurn::Cw180,
            3 => QuarterTurn::Cw270,
            _ => QuarterTurn::None,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            QuarterTurn::None => 0,
            QuarterTurn::Cw90 => 90,
            QuarterTurn::Cw180 => 180,
            QuarterTurn::Cw270 => 270,
        }
    }

    /// Frame size after applying this rotation
    pub fn rotated(&self, size: Dimensions) -> Dimensions {
        match self {
            QuarterTurn::Cw90 | QuarterTurn::Cw270 => size.transposed(),
            QuarterTurn::None | QuarterTurn::Cw180 => size,
        }
    }
}

/// Rotation angles for the two sensors, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RotationAngles {
    pub back: f32,
    pub front: f32,
}

/// Axis-aligned rectangle in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn size(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// Front occupies the top half, back the bottom half
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitLayout {
    pub front: Rect,
    pub back: Rect,
}

impl SplitLayout {
    pub fn for_canvas(canvas: Dimensions) -> Self {
        let top = canvas.height / 2;
        Self {
            front: Rect {
                x: 0,
                y: 0,
                width: canvas.width,
                height: top,
            },
            back: Rect {
                x: 0,
                y: top,
                width: canvas.width,
                height: canvas.height - top,
            },
        }
    }
}

/// Source region that, scaled uniformly, exactly covers `slot` (aspect fill)
///
/// The region is centered; the axis that overflows is cropped symmetrically.
pub fn aspect_fill_crop(source: Dimensions, slot: Dimensions) -> Rect {
    let (sw, sh) = (source.width as u64, source.height as u64);
    let (tw, th) = (slot.width.max(1) as u64, slot.height.max(1) as u64);

    // Compare sw/sh with tw/th without floating point
    let (width, height) = if sw * th > tw * sh {
        // Source is wider than the slot: keep full height
        let w = ((sh * tw + th / 2) / th).clamp(1, sw);
        (w, sh)
    } else {
        let h = ((sw * th + tw / 2) / tw).clamp(1, sh);
        (sw, h)
    };

    Rect {
        x: ((sw - width) / 2) as u32,
        y: ((sh - height) / 2) as u32,
        width: width as u32,
        height: height as u32,
    }
}
