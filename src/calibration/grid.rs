use serde::{Deserialize, Serialize};

use crate::models::{Point2D, ScreenSize};

/// One on-screen fixation point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTarget {
    pub screen_point: Point2D,
    pub index: usize,
}

/// N×N fixation points in row-major order (top row first, left to right)
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationGrid {
    size: usize,
    targets: Vec<CalibrationTarget>,
}

impl CalibrationGrid {
    /// Lay out `size`² targets with the outer rows and columns `margin` pixels
    /// from the screen edges. A 1×1 grid is the screen center.
    pub fn new(size: usize, screen: ScreenSize, margin: f64) -> Self {
        let axis = |extent: f64, i: usize| {
            if size <= 1 {
                extent / 2.0
            } else {
                margin + i as f64 * (extent - 2.0 * margin) / (size - 1) as f64
            }
        };

        let targets = (0..size * size)
            .map(|index| CalibrationTarget {
                screen_point: Point2D::new(axis(screen.width, index % size), axis(screen.height, index / size)),
                index,
            })
            .collect();

        Self { size, targets }
    }

    /// Rebuild a grid from stored screen points
    pub fn from_points(points: &[Point2D]) -> Option<Self> {
        let size = square_side(points.len())?;
        let targets = points
            .iter()
            .enumerate()
            .map(|(index, p)| CalibrationTarget { screen_point: *p, index })
            .collect();
        Some(Self { size, targets })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn targets(&self) -> &[CalibrationTarget] {
        &self.targets
    }

    pub fn target(&self, index: usize) -> Option<&CalibrationTarget> {
        self.targets.get(index)
    }

    /// The middle target. Only odd grids have one.
    pub fn center_index(&self) -> Option<usize> {
        center_index(self.targets.len())
    }
}

/// Side length of a non-empty square count
pub fn square_side(count: usize) -> Option<usize> {
    if count == 0 {
        return None;
    }
    let side = (count as f64).sqrt().round() as usize;
    (side * side == count).then_some(side)
}

/// Index of the grid's middle target for `count` targets
pub fn center_index(count: usize) -> Option<usize> {
    let side = square_side(count)?;
    (side % 2 == 1).then_some(count / 2)
}
