//! Pointer-to-page coordinate mapping
//!
//! Annotations persist percentages of page width/height, so the same
//! stored point maps back to the right pixel after any zoom change: only
//! the page rectangle handed in by the caller differs.

use doc_model::PercentPoint;

/// Screen-space position in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelPoint {
    pub x: f32,
    pub y: f32,
}

impl PixelPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Bounding rectangle of the rendered page element, in screen pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PageRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }
}

/// Percentage pair that may lie outside [0, 100]
///
/// Out-of-bounds pointer positions are allowed; whether to clamp or
/// extrapolate is the caller's choice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnclampedPercent {
    pub x: f32,
    pub y: f32,
}

impl UnclampedPercent {
    pub fn clamped(self) -> PercentPoint {
        PercentPoint::new(self.x, self.y)
    }
}

/// Map a pointer position to percentages of the page rectangle
pub fn to_percent(pixel: PixelPoint, rect: PageRect) -> UnclampedPercent {
    if rect.width <= 0.0 || rect.height <= 0.0 {
        return UnclampedPercent { x: 0.0, y: 0.0 };
    }
    UnclampedPercent {
        x: (pixel.x - rect.x) / rect.width * 100.0,
        y: (pixel.y - rect.y) / rect.height * 100.0,
    }
}

/// Map a stored percentage pair back to screen pixels for rendering
pub fn to_pixel(percent: PercentPoint, rect: PageRect) -> PixelPoint {
    PixelPoint {
        x: rect.x + percent.x / 100.0 * rect.width,
        y: rect.y + percent.y / 100.0 * rect.height,
    }
}
