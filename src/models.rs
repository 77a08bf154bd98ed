use serde::{Deserialize, Serialize};

/// Pixel (camera space) or screen coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// One frame's detection result.
///
/// Either both eyes are present with `left.x <= right.x` (camera space, before
/// any mirroring), or the pair is a miss. `None` is the "not detected" sentinel
/// and serializes as `null`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EyePair {
    pub left: Option<Point2D>,
    pub right: Option<Point2D>,
}

impl EyePair {
    pub fn new(left: Point2D, right: Point2D) -> Self {
        if left.x <= right.x {
            Self { left: Some(left), right: Some(right) }
        } else {
            Self { left: Some(right), right: Some(left) }
        }
    }

    pub fn missing() -> Self {
        Self::default()
    }

    /// Build a pair from raw detections. A single detection is kept in `left`
    /// so callers can still see it; more than two is a miss.
    pub fn from_points(points: &[Point2D]) -> Self {
        match points {
            [a, b] => Self::new(*a, *b),
            [a] => Self { left: Some(*a), right: None },
            _ => Self::missing(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }

    /// Number of detected eyes (0, 1 or 2).
    pub fn detected(&self) -> usize {
        self.left.is_some() as usize + self.right.is_some() as usize
    }

    /// Flattened `(leftX, leftY, rightX, rightY)` feature vector.
    pub fn features(&self) -> Option<[f64; 4]> {
        match (self.left, self.right) {
            (Some(l), Some(r)) => Some([l.x, l.y, r.x, r.y]),
            _ => None,
        }
    }
}

/// Integer box in image space, as produced by the region locators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn center(&self) -> Point2D {
        Point2D::new(
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    /// Shift a box found inside a crop back into the parent image.
    pub fn offset(&self, dx: u32, dy: u32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Clamp to an image of the given dimensions. Returns `None` when nothing
    /// of the box remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Self::new(self.x, self.y, w, h))
    }
}

/// Bounding box of the largest face in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl FaceBox {
    /// Component-wise average. `None` for an empty input.
    pub fn average<'a>(boxes: impl IntoIterator<Item = &'a FaceBox>) -> Option<FaceBox> {
        let mut sum = FaceBox { x: 0.0, y: 0.0, width: 0.0, height: 0.0 };
        let mut count = 0usize;
        for b in boxes {
            sum.x += b.x;
            sum.y += b.y;
            sum.width += b.width;
            sum.height += b.height;
            count += 1;
        }
        if count == 0 {
            return None;
        }
        let n = count as f64;
        Some(FaceBox {
            x: sum.x / n,
            y: sum.y / n,
            width: sum.width / n,
            height: sum.height / n,
        })
    }

    /// Integer search region, rounded outward and clamped to the frame.
    pub fn to_region(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let x = self.x.max(0.0).floor() as u32;
        let y = self.y.max(0.0).floor() as u32;
        let w = (self.x + self.width).ceil().max(0.0) as u32;
        let h = (self.y + self.height).ceil().max(0.0) as u32;
        BoundingBox::new(x, y, w.saturating_sub(x), h.saturating_sub(y)).clamp_to(width, height)
    }
}

impl From<BoundingBox> for FaceBox {
    fn from(b: BoundingBox) -> Self {
        Self {
            x: b.x as f64,
            y: b.y as f64,
            width: b.width as f64,
            height: b.height as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: f64,
    pub height: f64,
}

impl ScreenSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> Point2D {
        Point2D::new(self.width / 2.0, self.height / 2.0)
    }

    pub fn clamp(&self, p: Point2D) -> Point2D {
        Point2D::new(p.x.clamp(0.0, self.width), p.y.clamp(0.0, self.height))
    }
}

impl Default for ScreenSize {
    fn default() -> Self {
        Self::new(1920.0, 1080.0)
    }
}

/// Connected region of foreground pixels in a binary image.
#[derive(Debug, Clone)]
pub struct Blob {
    pub label: u32,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    pub pixel_count: u32,
    pub sum_x: u64,
    pub sum_y: u64,
}

impl Blob {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    pub fn area(&self) -> u32 {
        self.pixel_count
    }

    pub fn aspect_ratio(&self) -> f32 {
        let w = self.width() as f32;
        let h = self.height() as f32;
        if h == 0.0 {
            return 0.0;
        }
        w / h
    }

    /// Pixel centroid, in the coordinates of the image the blob was found in.
    pub fn centroid(&self) -> Point2D {
        let n = self.pixel_count.max(1) as f64;
        Point2D::new(self.sum_x as f64 / n, self.sum_y as f64 / n)
    }

    /// How much of the bounding box the blob fills (1.0 for a solid rectangle,
    /// about 0.785 for a disc).
    pub fn fill_ratio(&self) -> f32 {
        let box_area = (self.width() * self.height()) as f32;
        if box_area == 0.0 {
            return 0.0;
        }
        self.pixel_count as f32 / box_area
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eye_pair_orders_by_x() {
        let pair = EyePair::new(Point2D::new(300.0, 10.0), Point2D::new(100.0, 12.0));
        assert_eq!(pair.left, Some(Point2D::new(100.0, 12.0)));
        assert_eq!(pair.right, Some(Point2D::new(300.0, 10.0)));
    }

    #[test]
    fn eye_pair_from_wrong_count_is_miss() {
        let one = EyePair::from_points(&[Point2D::new(1.0, 1.0)]);
        assert!(!one.is_complete());
        assert_eq!(one.detected(), 1);
        assert_eq!(EyePair::from_points(&[]).detected(), 0);
        let three = [Point2D::new(1.0, 1.0); 3];
        assert!(EyePair::from_points(&three).features().is_none());
    }

    #[test]
    fn missing_eye_serializes_as_null() {
        let pair = EyePair { left: Some(Point2D::new(1.0, 2.0)), right: None };
        let json = serde_json::to_string(&pair).unwrap();
        assert_eq!(json, r#"{"left":{"x":1.0,"y":2.0},"right":null}"#);
    }

    #[test]
    fn face_box_average() {
        let a = FaceBox { x: 0.0, y: 10.0, width: 100.0, height: 80.0 };
        let b = FaceBox { x: 10.0, y: 20.0, width: 120.0, height: 100.0 };
        let avg = FaceBox::average([&a, &b]).unwrap();
        assert_eq!(avg, FaceBox { x: 5.0, y: 15.0, width: 110.0, height: 90.0 });
        assert!(FaceBox::average(std::iter::empty()).is_none());
    }

    #[test]
    fn bounding_box_clamp() {
        let b = BoundingBox::new(90, 40, 20, 20);
        assert_eq!(b.clamp_to(100, 50), Some(BoundingBox::new(90, 40, 10, 10)));
        assert_eq!(b.clamp_to(80, 50), None);
    }
}
