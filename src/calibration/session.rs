use image::DynamicImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::grid::{CalibrationGrid, CalibrationTarget};
use super::record::{CalibrationRecord, CalibrationSample};
use crate::detection::PupilDetector;
use crate::models::{EyePair, FaceBox, Point2D};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Target `i` is on screen, waiting for the user to fixate
    Presenting(usize),
    /// Burst sampling for target `i`
    Capturing(usize),
    Complete,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled)
    }
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("cannot {action} while {state:?}")]
    InvalidTransition { state: SessionState, action: &'static str },
    #[error("calibration incomplete: {captured} of {expected} targets captured")]
    Incomplete { captured: usize, expected: usize },
}

/// How many frames a capture may read, and how many good ones end it early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstPolicy {
    pub max_frames: usize,
    pub usable_frames: usize,
}

impl Default for BurstPolicy {
    fn default() -> Self {
        Self { max_frames: 30, usable_frames: 5 }
    }
}

/// What the detector saw in one frame of a burst
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Observation {
    pub eyes: EyePair,
    pub face: Option<FaceBox>,
}

/// Walks the user through the grid one target at a time.
///
/// Samples only leave the session through [`CalibrationSession::finish`],
/// which requires every target to be captured. Cancelling drops them.
#[derive(Debug)]
pub struct CalibrationSession {
    grid: CalibrationGrid,
    burst: BurstPolicy,
    state: SessionState,
    samples: Vec<CalibrationSample>,
    face_boxes: Vec<FaceBox>,
}

impl CalibrationSession {
    pub fn new(grid: CalibrationGrid, burst: BurstPolicy) -> Self {
        Self {
            grid,
            burst,
            state: SessionState::Idle,
            samples: Vec::new(),
            face_boxes: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn grid(&self) -> &CalibrationGrid {
        &self.grid
    }

    /// `(captured, total)` targets
    pub fn progress(&self) -> (usize, usize) {
        (self.samples.len(), self.grid.len())
    }

    pub fn samples(&self) -> &[CalibrationSample] {
        &self.samples
    }

    /// The target the user should look at now
    pub fn current_target(&self) -> Option<&CalibrationTarget> {
        match self.state {
            SessionState::Presenting(i) | SessionState::Capturing(i) => self.grid.target(i),
            _ => None,
        }
    }

    pub fn start(&mut self) -> Result<(), CalibrationError> {
        if self.state != SessionState::Idle {
            return Err(self.invalid("start"));
        }
        if self.grid.is_empty() {
            self.state = SessionState::Complete;
        } else {
            self.state = SessionState::Presenting(0);
            info!(targets = self.grid.len(), "calibration started");
        }
        Ok(())
    }

    /// Burst-sample the current target from `observe` and move on to the next
    /// one. `observe` returns `None` when no frame could be read.
    pub fn capture(
        &mut self,
        mut observe: impl FnMut() -> Option<Observation>,
    ) -> Result<CalibrationSample, CalibrationError> {
        let SessionState::Presenting(index) = self.state else {
            return Err(self.invalid("capture"));
        };
        let Some(target) = self.grid.target(index).copied() else {
            return Err(self.invalid("capture"));
        };
        self.state = SessionState::Capturing(index);

        let mut usable = Vec::new();
        let mut faces = Vec::new();
        for _ in 0..self.burst.max_frames {
            let Some(observation) = observe() else {
                continue;
            };
            if let Some(face) = observation.face {
                faces.push(face);
            }
            if observation.eyes.is_complete() {
                usable.push(observation.eyes);
                if usable.len() >= self.burst.usable_frames {
                    break;
                }
            }
        }

        let eyes = median_eye_pair(&usable);
        if !eyes.is_complete() {
            warn!(target = index, "no usable frames for calibration target");
        }
        debug!(target = index, usable = usable.len(), faces = faces.len(), "calibration burst done");
        if let Some(face) = FaceBox::average(&faces) {
            self.face_boxes.push(face);
        }

        let sample = CalibrationSample { eyes, target };
        self.samples.push(sample);
        self.state = if index + 1 < self.grid.len() {
            SessionState::Presenting(index + 1)
        } else {
            info!("calibration targets complete");
            SessionState::Complete
        };
        Ok(sample)
    }

    /// Burst-sample the current target straight from a frame supplier
    pub fn capture_frames(
        &mut self,
        mut next_frame: impl FnMut() -> Option<DynamicImage>,
        detector: &PupilDetector,
    ) -> Result<CalibrationSample, CalibrationError> {
        self.capture(|| {
            let gray = next_frame()?.to_luma8();
            let detection = detector.detect_gray(&gray);
            // A face-first search already ran the face locator on this frame
            let face = match detection.face {
                None if !detector.config().strategy.uses_face() => detector.largest_face(&gray).map(FaceBox::from),
                face => face,
            };
            Some(Observation { eyes: detection.eyes(), face })
        })
    }

    /// Abandon the session and drop everything captured so far
    pub fn cancel(&mut self) -> Result<(), CalibrationError> {
        if self.state.is_terminal() {
            return Err(self.invalid("cancel"));
        }
        info!(captured = self.samples.len(), "calibration cancelled");
        self.samples.clear();
        self.face_boxes.clear();
        self.state = SessionState::Cancelled;
        Ok(())
    }

    /// Hand over the finished record
    pub fn finish(self) -> Result<CalibrationRecord, CalibrationError> {
        if self.state != SessionState::Complete || self.samples.len() != self.grid.len() {
            return Err(CalibrationError::Incomplete {
                captured: self.samples.len(),
                expected: self.grid.len(),
            });
        }
        Ok(CalibrationRecord {
            face_box: FaceBox::average(&self.face_boxes),
            samples: self.samples,
        })
    }

    fn invalid(&self, action: &'static str) -> CalibrationError {
        CalibrationError::InvalidTransition { state: self.state, action }
    }
}

/// Per-coordinate median of the complete pairs. An empty burst gives the
/// missing pair.
pub fn median_eye_pair(pairs: &[EyePair]) -> EyePair {
    let rows: Vec<[f64; 4]> = pairs.iter().filter_map(EyePair::features).collect();
    if rows.is_empty() {
        return EyePair::missing();
    }
    let m: Vec<f64> = (0..4).map(|i| median(rows.iter().map(|r| r[i]).collect())).collect();
    EyePair::new(Point2D::new(m[0], m[1]), Point2D::new(m[2], m[3]))
}

/// Median of a non-empty list; even lengths average the middle two
fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScreenSize;

    fn pair(lx: f64, ly: f64, rx: f64, ry: f64) -> EyePair {
        EyePair::new(Point2D::new(lx, ly), Point2D::new(rx, ry))
    }

    fn session(n: usize) -> CalibrationSession {
        CalibrationSession::new(CalibrationGrid::new(n, ScreenSize::new(300.0, 300.0), 0.0), BurstPolicy::default())
    }

    #[test]
    fn median_ignores_outlier() {
        let pairs = [pair(10.0, 10.0, 50.0, 10.0), pair(11.0, 12.0, 51.0, 11.0), pair(900.0, 900.0, 950.0, 900.0)];
        assert_eq!(median_eye_pair(&pairs), pair(11.0, 12.0, 51.0, 11.0));
    }

    #[test]
    fn median_of_even_count_averages_middle() {
        let pairs = [pair(1.0, 1.0, 5.0, 1.0), pair(3.0, 3.0, 7.0, 3.0)];
        assert_eq!(median_eye_pair(&pairs), pair(2.0, 2.0, 6.0, 2.0));
    }

    #[test]
    fn empty_burst_is_missing() {
        assert_eq!(median_eye_pair(&[]), EyePair::missing());
    }

    #[test]
    fn burst_stops_after_usable_frames() {
        let mut s = session(2);
        s.start().unwrap();
        let mut calls = 0;
        s.capture(|| {
            calls += 1;
            Some(Observation { eyes: pair(1.0, 1.0, 2.0, 1.0), face: None })
        })
        .unwrap();
        assert_eq!(calls, 5);
        assert_eq!(s.state(), SessionState::Presenting(1));
    }

    #[test]
    fn burst_is_bounded_when_eyes_never_show() {
        let mut s = session(2);
        s.start().unwrap();
        let mut calls = 0;
        let sample = s
            .capture(|| {
                calls += 1;
                Some(Observation { eyes: EyePair::from_points(&[Point2D::new(1.0, 1.0)]), face: None })
            })
            .unwrap();
        assert_eq!(calls, 30);
        assert_eq!(sample.eyes, EyePair::missing());
    }

    #[test]
    fn full_session_averages_faces() {
        let mut s = session(2);
        s.start().unwrap();
        for i in 0..4 {
            let face = FaceBox { x: i as f64 * 10.0, y: 0.0, width: 100.0, height: 100.0 };
            s.capture(|| Some(Observation { eyes: pair(1.0, 1.0, 2.0, 1.0), face: Some(face) })).unwrap();
        }
        assert_eq!(s.state(), SessionState::Complete);
        let record = s.finish().unwrap();
        assert_eq!(record.len(), 4);
        assert_eq!(record.face_box.map(|f| f.x), Some(15.0));
    }

    #[test]
    fn cancel_discards_samples() {
        let mut s = session(3);
        s.start().unwrap();
        for _ in 0..3 {
            s.capture(|| Some(Observation { eyes: pair(1.0, 1.0, 2.0, 1.0), face: None })).unwrap();
        }
        s.cancel().unwrap();
        assert!(s.samples().is_empty());
        assert!(matches!(s.cancel(), Err(CalibrationError::InvalidTransition { .. })));
        assert!(matches!(s.finish(), Err(CalibrationError::Incomplete { captured: 0, expected: 9 })));
    }

    #[test]
    fn capture_before_start_is_rejected() {
        let mut s = session(3);
        let result = s.capture(|| None);
        assert!(matches!(result, Err(CalibrationError::InvalidTransition { state: SessionState::Idle, .. })));
    }
}
