//! Mapping between the on-screen image preview and original image pixels.
//!
//! The preview shows the image scaled to fit its widget with the aspect ratio
//! preserved and the result centered, so selections drawn over the widget have
//! to be shifted by the letterbox offset and rescaled before they can address
//! pixels in the original image.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Rectangle in widget coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Normalizes a drag gesture into a rectangle regardless of drag direction.
    pub fn from_corners(start: Point, end: Point) -> Self {
        let left = start.x.min(end.x);
        let top = start.y.min(end.y);
        let width = start.x.abs_diff(end.x);
        let height = start.y.abs_diff(end.y);
        Self::new(left, top, width, height)
    }

    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Rectangle in original image pixels, always inside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ImageRegion {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Largest size with the aspect ratio of `source` that fits inside `bounds`.
pub fn scale_to_fit(source: Size, bounds: Size) -> Size {
    if source.is_empty() || bounds.is_empty() {
        return Size::new(0, 0);
    }

    let source_width = u64::from(source.width);
    let source_height = u64::from(source.height);
    let bounds_width = u64::from(bounds.width);
    let bounds_height = u64::from(bounds.height);

    let width_at_full_height = bounds_height * source_width / source_height;
    if width_at_full_height <= bounds_width {
        let width = u32::try_from(width_at_full_height.max(1)).unwrap_or(bounds.width);
        Size::new(width, bounds.height)
    } else {
        let height_at_full_width = (bounds_width * source_height / source_width).max(1);
        let height = u32::try_from(height_at_full_width).unwrap_or(bounds.height);
        Size::new(bounds.width, height)
    }
}

/// Maps a selection drawn over the preview widget into original image pixels.
///
/// Returns `None` when nothing of the image is selected, which callers treat
/// as "use the full image".
pub fn map_selection_to_image(
    selection: Rect,
    original: Size,
    widget: Size,
) -> Option<ImageRegion> {
    if selection.is_empty() || original.is_empty() || widget.is_empty() {
        return None;
    }

    let scaled = scale_to_fit(original, widget);
    if scaled.is_empty() {
        return None;
    }

    let (left, right) = map_span(
        selection.x,
        selection.width,
        widget.width,
        scaled.width,
        original.width,
    );
    let (top, bottom) = map_span(
        selection.y,
        selection.height,
        widget.height,
        scaled.height,
        original.height,
    );

    let width = right.saturating_sub(left);
    let height = bottom.saturating_sub(top);
    if width == 0 || height == 0 {
        return None;
    }

    Some(ImageRegion::new(left, top, width, height))
}

/// Projects `start..start + length` on one widget axis onto the image axis.
///
/// Works in exact integers: the centering offset `(widget - scaled) / 2` is
/// kept doubled so half pixels are not lost. Each corner is floored, then
/// clamped to `0..=original`.
fn map_span(start: i32, length: u32, widget: u32, scaled: u32, original: u32) -> (u32, u32) {
    let margin = i128::from(widget) - i128::from(scaled);
    let denominator = 2 * i128::from(scaled);
    let project = |position: i128| {
        let value = ((2 * position - margin) * i128::from(original)).div_euclid(denominator);
        u32::try_from(value.clamp(0, i128::from(original))).unwrap_or(original)
    };
    let start = i128::from(start);
    (project(start), project(start + i128::from(length)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_to_fit_matches_exact_aspect() {
        assert_eq!(
            scale_to_fit(Size::new(1000, 500), Size::new(800, 400)),
            Size::new(800, 400)
        );
    }

    #[test]
    fn scale_to_fit_letterboxes_on_the_constrained_axis() {
        assert_eq!(
            scale_to_fit(Size::new(1000, 1000), Size::new(800, 400)),
            Size::new(400, 400)
        );
        assert_eq!(
            scale_to_fit(Size::new(1600, 400), Size::new(800, 400)),
            Size::new(800, 200)
        );
    }

    #[test]
    fn scale_to_fit_upscales_small_images() {
        assert_eq!(
            scale_to_fit(Size::new(100, 50), Size::new(800, 600)),
            Size::new(800, 400)
        );
    }

    #[test]
    fn maps_selection_without_letterbox() {
        let region = map_selection_to_image(
            Rect::new(100, 100, 200, 100),
            Size::new(1000, 500),
            Size::new(800, 400),
        );
        assert_eq!(region, Some(ImageRegion::new(125, 125, 250, 125)));
    }

    #[test]
    fn mapped_corners_truncate() {
        // scale 10/3: corners 3.33 and 6.67 become 3 and 6
        let region = map_selection_to_image(
            Rect::new(1, 1, 1, 1),
            Size::new(1000, 1000),
            Size::new(300, 300),
        );
        assert_eq!(region, Some(ImageRegion::new(3, 3, 3, 3)));
    }

    #[test]
    fn full_widget_selection_maps_to_full_image() {
        let cases = [
            (Size::new(1000, 500), Size::new(800, 400)),
            (Size::new(1000, 1000), Size::new(800, 400)),
            (Size::new(300, 900), Size::new(640, 480)),
            (Size::new(1920, 1080), Size::new(333, 777)),
            (Size::new(7, 3), Size::new(1024, 1024)),
        ];
        for (original, widget) in cases {
            let region = map_selection_to_image(
                Rect::new(0, 0, widget.width, widget.height),
                original,
                widget,
            );
            assert_eq!(
                region,
                Some(ImageRegion::new(0, 0, original.width, original.height)),
                "original={original:?} widget={widget:?}"
            );
        }
    }

    #[test]
    fn selection_inside_letterbox_margin_is_unusable() {
        // 1000x1000 in 800x400 leaves 200px margins left and right.
        let original = Size::new(1000, 1000);
        let widget = Size::new(800, 400);
        assert_eq!(
            map_selection_to_image(Rect::new(0, 0, 200, 400), original, widget),
            None
        );
        assert_eq!(
            map_selection_to_image(Rect::new(610, 50, 150, 100), original, widget),
            None
        );
    }

    #[test]
    fn selection_partly_in_margin_clamps_to_image_bounds() {
        let original = Size::new(1000, 1000);
        let widget = Size::new(800, 400);
        let region = map_selection_to_image(Rect::new(100, 0, 200, 100), original, widget)
            .expect("selection overlaps the image");
        // widget x 200..300 covers image x 0..250 at scale 2.5
        assert_eq!(region, ImageRegion::new(0, 0, 250, 250));

        let region = map_selection_to_image(Rect::new(500, 300, 400, 400), original, widget)
            .expect("selection overlaps the image");
        assert_eq!(region, ImageRegion::new(750, 750, 250, 250));
    }

    #[test]
    fn mapping_is_deterministic() {
        let selection = Rect::new(37, 81, 123, 59);
        let original = Size::new(4032, 3024);
        let widget = Size::new(641, 359);
        let first = map_selection_to_image(selection, original, widget);
        let second = map_selection_to_image(selection, original, widget);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_inputs_yield_no_selection() {
        let widget = Size::new(800, 400);
        assert_eq!(
            map_selection_to_image(Rect::new(10, 10, 0, 50), Size::new(100, 100), widget),
            None
        );
        assert_eq!(
            map_selection_to_image(Rect::new(10, 10, 50, 50), Size::new(0, 100), widget),
            None
        );
        assert_eq!(
            map_selection_to_image(
                Rect::new(10, 10, 50, 50),
                Size::new(100, 100),
                Size::new(0, 0)
            ),
            None
        );
    }

    #[test]
    fn from_corners_normalizes_reverse_drags() {
        let rect = Rect::from_corners(Point::new(300, 200), Point::new(100, 100));
        assert_eq!(rect, Rect::new(100, 100, 200, 100));
        assert!(Rect::from_corners(Point::new(5, 5), Point::new(5, 40)).is_empty());
    }
}
