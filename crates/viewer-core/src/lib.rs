//! Pure viewer logic for the annotation overlay
//!
//! No I/O and no annotation ownership: the overlay consumes pointer
//! events and emits commands; the session layer applies them to the
//! program record. Keeping all interaction state inside [`OverlayState`]
//! lets multiple viewer instances coexist without interference.

mod coords;
mod overlay;
mod render;

pub use coords::{to_percent, to_pixel, PageRect, PixelPoint, UnclampedPercent};
pub use overlay::{
    Gesture, HitTarget, OverlayCommand, OverlayEvent, OverlayState, Tool, RESIZE_DISTANCE_NORM,
};
pub use render::{RenderRequestKey, RenderTracker};
