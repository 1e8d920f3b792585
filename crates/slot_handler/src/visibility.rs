//! Viewport intersection queries for placement elements.

use std::sync::Arc;

/// A viewport-relative rectangle in CSS pixels.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    #[inline]
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Right edge.
    #[inline]
    #[must_use]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    /// Bottom edge.
    #[inline]
    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// True when the box has no area, e.g. before the element has been laid out.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Grow the rectangle by `margin` pixels on every side.
    #[inline]
    #[must_use]
    pub fn inflate(&self, margin: f64) -> Self {
        Self {
            x: self.x - margin,
            y: self.y - margin,
            width: self.width + 2.0 * margin,
            height: self.height + 2.0 * margin,
        }
    }

    /// Edge-inclusive overlap test.
    #[inline]
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.x <= other.right()
            && other.x <= self.right()
            && self.y <= other.bottom()
            && other.y <= self.bottom()
    }
}

/// An element that has been laid out by the host page.
pub trait LayoutElement: Send + Sync {
    /// Current border box relative to the viewport origin.
    fn bounding_client_rect(&self) -> Rect;
}

/// The host page's visible area.
pub trait Viewport: Send + Sync {
    /// Current `(width, height)` of the viewport in CSS pixels.
    fn size(&self) -> (f64, f64);
}

/// Answers whether a placement is close enough to the viewport to be requested.
///
/// The oracle holds no state of its own and can be queried at any frequency.
#[derive(Clone)]
pub struct VisibilityOracle {
    viewport: Arc<dyn Viewport>,
}

impl VisibilityOracle {
    #[inline]
    #[must_use]
    pub fn new(viewport: Arc<dyn Viewport>) -> Self {
        Self { viewport }
    }

    /// The viewport this oracle measures against.
    #[inline]
    #[must_use]
    pub fn viewport(&self) -> &dyn Viewport {
        self.viewport.as_ref()
    }

    /// Returns true iff the element's box, widened by `preload_margin` on all
    /// sides, overlaps the viewport rectangle. Boxes without area never qualify.
    #[must_use]
    pub fn is_eligible(&self, element: &dyn LayoutElement, preload_margin: u32) -> bool {
        let rect = element.bounding_client_rect();
        if rect.is_empty() {
            return false;
        }
        let (width, height) = self.viewport.size();
        let viewport = Rect::new(0.0, 0.0, width, height);
        rect.inflate(f64::from(preload_margin)).intersects(&viewport)
    }
}
