use super::GazeModelError;
use crate::calibration::CalibrationRecord;
use crate::models::{Point2D, ScreenSize};

/// Which screen edge an axis should head for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toward {
    /// Left or top edge (coordinate 0)
    Start,
    /// Right or bottom edge (the screen's width or height)
    End,
}

impl Toward {
    fn resolve(self, extent: f64) -> f64 {
        match self {
            Self::Start => 0.0,
            Self::End => extent,
        }
    }

    fn flipped(self) -> Self {
        match self {
            Self::Start => Self::End,
            Self::End => Self::Start,
        }
    }
}

/// Where the cursor should head on each axis. `None` leaves that axis where
/// it is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoystickIntent {
    pub x: Option<Toward>,
    pub y: Option<Toward>,
}

impl JoystickIntent {
    pub fn is_still(&self) -> bool {
        self.x.is_none() && self.y.is_none()
    }

    /// Resolve against the current cursor position and the screen edges
    pub fn target_from(&self, current: Point2D, screen: ScreenSize) -> Point2D {
        Point2D::new(
            self.x.map_or(current.x, |t| t.resolve(screen.width)),
            self.y.map_or(current.y, |t| t.resolve(screen.height)),
        )
    }
}

/// Reference bands for one eye coordinate
#[derive(Debug, Clone, Copy, PartialEq)]
struct Band {
    low: f64,
    high: f64,
}

/// Per-axis gaze direction from both eyes' bands
#[derive(Debug, Clone, Copy, PartialEq)]
struct Axis {
    left: Band,
    right: Band,
    /// Edge for "both eyes below their low band"
    on_low: Toward,
}

impl Axis {
    /// Strict comparisons: a value equal to a band mean is inside the band
    fn intent(&self, left: f64, right: f64) -> Option<Toward> {
        if left < self.left.low && right < self.right.low {
            Some(self.on_low)
        } else if left > self.left.high && right > self.right.high {
            Some(self.on_low.flipped())
        } else {
            None
        }
    }
}

/// Turns gaze into a four-way joystick instead of an absolute position
#[derive(Debug, Clone, PartialEq)]
pub struct JoystickThreshold {
    x: Axis,
    y: Axis,
}

/// Size of the low and high bands: ⌊√n⌋, at least 3, never more than n
pub fn band_size(samples: usize) -> usize {
    ((samples as f64).sqrt().floor() as usize).max(3).min(samples)
}

impl JoystickThreshold {
    pub fn fit(record: &CalibrationRecord) -> Result<Self, GazeModelError> {
        let rows = record.training_rows();
        if rows.len() < 3 {
            return Err(GazeModelError::NotEnoughSamples { needed: 3, found: rows.len() });
        }
        let k = band_size(rows.len());

        let band = |i: usize| {
            let mut values: Vec<f64> = rows.iter().map(|(f, _)| f[i]).collect();
            values.sort_by(f64::total_cmp);
            let mean = |s: &[f64]| s.iter().sum::<f64>() / s.len() as f64;
            Band { low: mean(&values[..k]), high: mean(&values[values.len() - k..]) }
        };

        let axis = |eyes: [usize; 2], screen_of: fn(&Point2D) -> f64| -> Result<Axis, GazeModelError> {
            let screen: Vec<f64> = rows.iter().map(|(_, t)| screen_of(t)).collect();
            let eye: Vec<f64> = rows.iter().map(|(f, _)| (f[eyes[0]] + f[eyes[1]]) / 2.0).collect();

            let cov = covariance(&eye, &screen);
            if cov == 0.0 || !cov.is_finite() {
                return Err(GazeModelError::Degenerate("eye and screen positions do not co-vary".to_string()));
            }
            // Mirrored setups move the pupil against the screen axis
            let on_low = if cov > 0.0 { Toward::Start } else { Toward::End };
            Ok(Axis { left: band(eyes[0]), right: band(eyes[1]), on_low })
        };

        Ok(Self {
            x: axis([0, 2], |p| p.x)?,
            y: axis([1, 3], |p| p.y)?,
        })
    }

    pub fn predict(&self, f: &[f64; 4]) -> JoystickIntent {
        JoystickIntent {
            x: self.x.intent(f[0], f[2]),
            y: self.y.intent(f[1], f[3]),
        }
    }
}

fn covariance(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    a.iter().zip(b).map(|(x, y)| (x - mean_a) * (y - mean_b)).sum::<f64>() / n
}
