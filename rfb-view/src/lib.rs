//! Scroll/view geometry for a remote framebuffer larger than the local window.
//!
//! This crate tracks the mapping between a local visible area and a larger
//! remote framebuffer: the current scroll offset (`slide`), whether either
//! axis needs a scrollbar, and the clamped visible rectangle in remote
//! coordinates. It models geometry only; the actual pixel blit and buffer
//! flip belong to the host display collaborator.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use rfb_common::{Point, Rect};

/// Width, in pixels, reserved for a scrollbar along an axis that needs one.
pub const SCROLL_SIZE: i32 = 11;

/// Distance, in pixels, from a window edge within which the pointer triggers
/// edge auto-scroll.
pub const EDGE_THRESHOLD: i32 = 3;

/// Distance, in pixels, that edge auto-scroll nudges the slide per trigger.
pub const EDGE_NUDGE: i32 = 8;

/// Tracks the visible window into a remote framebuffer that may be larger
/// than the local window in either dimension.
#[derive(Debug, Clone)]
pub struct ScrollView {
    window_width: u32,
    window_height: u32,
    framebuffer_width: u32,
    framebuffer_height: u32,
    slide: Point,
}

impl ScrollView {
    /// Create a view for the given window and framebuffer dimensions, with
    /// the slide starting at the framebuffer origin.
    #[must_use]
    pub fn new(window_width: u32, window_height: u32, framebuffer_width: u32, framebuffer_height: u32) -> Self {
        let mut view = Self {
            window_width,
            window_height,
            framebuffer_width,
            framebuffer_height,
            slide: Point::new(0, 0),
        };
        view.clamp_slide();
        view
    }

    /// Update the window size, re-clamping the slide.
    pub fn set_window_size(&mut self, width: u32, height: u32) {
        self.window_width = width;
        self.window_height = height;
        self.clamp_slide();
    }

    /// Update the framebuffer size, re-clamping the slide.
    pub fn set_framebuffer_size(&mut self, width: u32, height: u32) {
        self.framebuffer_width = width;
        self.framebuffer_height = height;
        self.clamp_slide();
    }

    /// Whether the horizontal axis needs a scrollbar (framebuffer wider than window).
    #[must_use]
    pub fn needs_horizontal_scrollbar(&self) -> bool {
        self.framebuffer_width > self.window_width
    }

    /// Whether the vertical axis needs a scrollbar (framebuffer taller than window).
    #[must_use]
    pub fn needs_vertical_scrollbar(&self) -> bool {
        self.framebuffer_height > self.window_height
    }

    /// The portion of the window available for drawing framebuffer pixels,
    /// after reserving space for any needed scrollbar.
    #[must_use]
    pub fn drawable_area(&self) -> Rect {
        let w = self.window_width as i32 - if self.needs_vertical_scrollbar() { SCROLL_SIZE } else { 0 };
        let h = self.window_height as i32 - if self.needs_horizontal_scrollbar() { SCROLL_SIZE } else { 0 };
        Rect::new(0, 0, w.max(0) as u32, h.max(0) as u32)
    }

    /// The current slide: the upper-left corner of the visible region, in
    /// remote framebuffer coordinates.
    #[must_use]
    pub fn slide(&self) -> Point {
        self.slide
    }

    /// Set the slide directly, clamped so the visible area never extends
    /// past the framebuffer's far edge.
    pub fn set_slide(&mut self, x: i32, y: i32) {
        self.slide = Point::new(x, y);
        self.clamp_slide();
    }

    /// Scroll by a relative delta in remote framebuffer pixels.
    pub fn scroll_by(&mut self, dx: i32, dy: i32) {
        self.set_slide(self.slide.x + dx, self.slide.y + dy);
    }

    /// The currently visible region, in remote framebuffer coordinates.
    #[must_use]
    pub fn visible_framebuffer_rect(&self) -> Rect {
        let area = self.drawable_area();
        Rect::new(self.slide.x, self.slide.y, area.width, area.height)
    }

    /// If the pointer is within [`EDGE_THRESHOLD`] pixels of a drawable-area
    /// edge that still has framebuffer content beyond it, nudge the slide by
    /// [`EDGE_NUDGE`] pixels toward that edge. Returns `true` if the slide moved.
    pub fn nudge_for_pointer(&mut self, window_x: i32, window_y: i32) -> bool {
        let area = self.drawable_area();
        let mut dx = 0;
        let mut dy = 0;

        if window_x <= EDGE_THRESHOLD {
            dx = -EDGE_NUDGE;
        } else if window_x >= area.right() - EDGE_THRESHOLD {
            dx = EDGE_NUDGE;
        }

        if window_y <= EDGE_THRESHOLD {
            dy = -EDGE_NUDGE;
        } else if window_y >= area.bottom() - EDGE_THRESHOLD {
            dy = EDGE_NUDGE;
        }

        if dx == 0 && dy == 0 {
            return false;
        }

        let before = self.slide;
        self.scroll_by(dx, dy);
        self.slide != before
    }

    /// Map a point in window coordinates to remote framebuffer coordinates.
    #[must_use]
    pub fn window_to_framebuffer(&self, window_point: Point) -> Point {
        Point::new(window_point.x + self.slide.x, window_point.y + self.slide.y)
    }

    /// Map a point in remote framebuffer coordinates to window coordinates.
    #[must_use]
    pub fn framebuffer_to_window(&self, fb_point: Point) -> Point {
        Point::new(fb_point.x - self.slide.x, fb_point.y - self.slide.y)
    }

    fn clamp_slide(&mut self) {
        let area = self.drawable_area();
        let max_x = (self.framebuffer_width as i32 - area.width as i32).max(0);
        let max_y = (self.framebuffer_height as i32 - area.height as i32).max(0);
        self.slide = Point::new(self.slide.x.clamp(0, max_x), self.slide.y.clamp(0, max_y));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_scrollbars_when_framebuffer_fits() {
        let view = ScrollView::new(800, 600, 800, 600);
        assert!(!view.needs_horizontal_scrollbar());
        assert!(!view.needs_vertical_scrollbar());
        assert_eq!(view.slide(), Point::new(0, 0));
    }

    #[test]
    fn scrollbar_reserved_when_framebuffer_larger() {
        let view = ScrollView::new(800, 600, 1600, 600);
        assert!(view.needs_horizontal_scrollbar());
        assert!(!view.needs_vertical_scrollbar());
        let area = view.drawable_area();
        assert_eq!(area.height, 600 - SCROLL_SIZE as u32);
        assert_eq!(area.width, 800);
    }

    #[test]
    fn slide_clamped_to_framebuffer_bounds() {
        let mut view = ScrollView::new(800, 600, 1600, 1200);
        view.set_slide(10_000, 10_000);
        let area = view.drawable_area();
        assert_eq!(view.slide().x, 1600 - area.width as i32);
        assert_eq!(view.slide().y, 1200 - area.height as i32);
    }

    #[test]
    fn slide_never_negative() {
        let mut view = ScrollView::new(800, 600, 1600, 1200);
        view.set_slide(-500, -500);
        assert_eq!(view.slide(), Point::new(0, 0));
    }

    #[test]
    fn edge_nudge_scrolls_toward_pointer() {
        let mut view = ScrollView::new(800, 600, 1600, 1200);
        view.set_slide(100, 100);
        let moved = view.nudge_for_pointer(1, 300);
        assert!(moved);
        assert_eq!(view.slide().x, 100 - EDGE_NUDGE);
    }

    #[test]
    fn edge_nudge_noop_away_from_edges() {
        let mut view = ScrollView::new(800, 600, 1600, 1200);
        view.set_slide(100, 100);
        let moved = view.nudge_for_pointer(400, 300);
        assert!(!moved);
        assert_eq!(view.slide(), Point::new(100, 100));
    }

    #[test]
    fn coordinate_round_trip() {
        let mut view = ScrollView::new(800, 600, 1600, 1200);
        view.set_slide(200, 150);
        let window_point = Point::new(50, 60);
        let fb_point = view.window_to_framebuffer(window_point);
        assert_eq!(fb_point, Point::new(250, 210));
        assert_eq!(view.framebuffer_to_window(fb_point), window_point);
    }

    #[test]
    fn resizing_window_reclamps_slide() {
        let mut view = ScrollView::new(800, 600, 1600, 1200);
        view.set_slide(800, 600);
        view.set_window_size(1600, 1200);
        assert_eq!(view.slide(), Point::new(0, 0));
    }
}
