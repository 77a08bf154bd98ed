//! Post-processing over raw locator hits. Each function is a plain
//! transformation so the detector can chain them explicitly.

use crate::models::{BoundingBox, Point2D};

/// Reduce boxes to their centers
pub fn box_centers(boxes: &[BoundingBox]) -> Vec<Point2D> {
    boxes.iter().map(BoundingBox::center).collect()
}

/// Keep the two topmost candidates (smallest y). Eyes sit above most false
/// positives (nostrils, mouth corners), so the lower hits are dropped.
pub fn keep_two_topmost<T: Clone>(items: &[T], y_of: impl Fn(&T) -> f64) -> Vec<T> {
    let mut sorted = items.to_vec();
    sorted.sort_by(|a, b| y_of(a).total_cmp(&y_of(b)));
    sorted.truncate(2);
    sorted
}

/// Order points left to right by camera-space x
pub fn order_left_to_right(mut points: Vec<Point2D>) -> Vec<Point2D> {
    points.sort_by(|a, b| a.x.total_cmp(&b.x));
    points
}

/// Pick the largest box by area. Earlier boxes win ties.
pub fn largest(boxes: &[BoundingBox]) -> Option<BoundingBox> {
    boxes.iter().copied().reduce(|best, b| if b.area() > best.area() { b } else { best })
}
