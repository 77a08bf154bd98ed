use nalgebra::{DMatrix, Matrix5x2, RowVector5};

use super::GazeModelError;
use crate::calibration::CalibrationRecord;
use crate::models::Point2D;

/// Relative cutoff below which singular values count as zero
const RANK_TOLERANCE: f64 = 1e-10;

/// Ordinary least squares from `(1, lx, ly, rx, ry)` to both screen axes at
/// once.
///
/// The solve goes through an SVD and returns the minimum-norm solution, so
/// rank-deficient calibrations (both eyes moving identically, fewer samples
/// than coefficients) still fit and interpolate their training points.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearRegression {
    coefficients: Matrix5x2<f64>,
}

impl LinearRegression {
    pub fn fit(record: &CalibrationRecord) -> Result<Self, GazeModelError> {
        let rows = record.training_rows();
        if rows.is_empty() {
            return Err(GazeModelError::NotEnoughSamples { needed: 1, found: 0 });
        }

        let n = rows.len();
        let x = DMatrix::from_fn(n, 5, |r, c| if c == 0 { 1.0 } else { rows[r].0[c - 1] });
        let y = DMatrix::from_fn(n, 2, |r, c| if c == 0 { rows[r].1.x } else { rows[r].1.y });

        let svd = x.svd(true, true);
        let eps = svd.singular_values.max() * RANK_TOLERANCE;
        let beta = svd
            .solve(&y, eps)
            .map_err(|e| GazeModelError::Degenerate(e.to_string()))?;

        let coefficients = Matrix5x2::from_fn(|r, c| beta[(r, c)]);
        if coefficients.iter().any(|v| !v.is_finite()) {
            return Err(GazeModelError::Degenerate("non-finite regression coefficients".to_string()));
        }
        Ok(Self { coefficients })
    }

    pub fn predict(&self, features: &[f64; 4]) -> Point2D {
        let x = RowVector5::new(1.0, features[0], features[1], features[2], features[3]);
        let out = x * self.coefficients;
        Point2D::new(out[0], out[1])
    }
}
