use super::GazeModelError;
use crate::calibration::CalibrationRecord;
use crate::models::Point2D;

/// Small-angle geometric mapping.
///
/// Pupil displacement from the center fixation is proportional to the tangent
/// of the gaze angle, which for small angles is the angle itself, and the
/// screen displacement is that tangent times the eye-to-screen distance. One
/// scale per axis absorbs both factors and is fitted through the origin from
/// both eyes' offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct TangentGeometric {
    /// `(lx, ly, rx, ry)` at the center target
    center_eyes: [f64; 4],
    center_screen: Point2D,
    scale_x: f64,
    scale_y: f64,
}

impl TangentGeometric {
    pub fn fit(record: &CalibrationRecord) -> Result<Self, GazeModelError> {
        let center = record.center_sample().ok_or(GazeModelError::MissingCenterSample)?;
        let center_eyes = center.eyes.features().ok_or(GazeModelError::MissingCenterSample)?;
        let center_screen = center.target.screen_point;

        let rows = record.training_rows();
        if rows.len() < 2 {
            return Err(GazeModelError::NotEnoughSamples { needed: 2, found: rows.len() });
        }

        // Least squares through the origin: k = Σ(ds·d) / Σ(d²) over both eyes
        let scale = |eye_axes: [usize; 2], screen_of: fn(&Point2D) -> f64| {
            let (mut num, mut den) = (0.0, 0.0);
            for (features, target) in &rows {
                let ds = screen_of(target) - screen_of(&center_screen);
                for i in eye_axes {
                    let d = features[i] - center_eyes[i];
                    num += ds * d;
                    den += d * d;
                }
            }
            if den <= f64::EPSILON {
                None
            } else {
                Some(num / den)
            }
        };

        let scale_x = scale([0, 2], |p| p.x)
            .ok_or_else(|| GazeModelError::Degenerate("no horizontal eye movement".to_string()))?;
        let scale_y = scale([1, 3], |p| p.y)
            .ok_or_else(|| GazeModelError::Degenerate("no vertical eye movement".to_string()))?;

        Ok(Self { center_eyes, center_screen, scale_x, scale_y })
    }

    pub fn predict(&self, f: &[f64; 4]) -> Point2D {
        let c = &self.center_eyes;
        let dx = (self.scale_x * (f[0] - c[0]) + self.scale_x * (f[2] - c[2])) / 2.0;
        let dy = (self.scale_y * (f[1] - c[1]) + self.scale_y * (f[3] - c[3])) / 2.0;
        Point2D::new(self.center_screen.x + dx, self.center_screen.y + dy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EyePair;

    fn grid_record(center_missing: bool) -> CalibrationRecord {
        let mut eyes = Vec::new();
        let mut targets = Vec::new();
        for row in 0..3 {
            for col in 0..3 {
                let (ex, ey) = (col as f64, row as f64);
                let pair = if center_missing && row == 1 && col == 1 {
                    EyePair::missing()
                } else {
                    EyePair::new(Point2D::new(ex, ey), Point2D::new(ex + 10.0, ey))
                };
                eyes.push(pair);
                targets.push(Point2D::new(50.0 + 100.0 * ex, 50.0 + 100.0 * ey));
            }
        }
        CalibrationRecord::from_parts(eyes, targets, None).unwrap()
    }

    #[test]
    fn recovers_per_axis_scale() {
        let model = TangentGeometric::fit(&grid_record(false)).unwrap();
        let p = model.predict(&[2.0, 0.0, 12.0, 0.0]);
        assert!((p.x - 250.0).abs() < 1e-9 && (p.y - 50.0).abs() < 1e-9);
    }

    #[test]
    fn requires_center_sample() {
        assert_eq!(TangentGeometric::fit(&grid_record(true)), Err(GazeModelError::MissingCenterSample));
    }

    #[test]
    fn even_grid_has_no_center() {
        let eyes = vec![EyePair::new(Point2D::new(0.0, 0.0), Point2D::new(1.0, 0.0)); 4];
        let rec = CalibrationRecord::from_parts(eyes, vec![Point2D::new(0.0, 0.0); 4], None).unwrap();
        assert_eq!(TangentGeometric::fit(&rec), Err(GazeModelError::MissingCenterSample));
    }
}
