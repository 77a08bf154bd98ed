use tracing::{debug, trace};

use crate::gaze::{GazeModel, GazeModelError, Prediction};
use crate::models::{EyePair, Point2D, ScreenSize};

/// Default exponential smoothing factor
pub const DEFAULT_SMOOTHING: f64 = 0.1;

/// Turns per-frame eye pairs into a stable cursor target.
///
/// Every call returns a usable screen coordinate. When the frame or the model
/// gives nothing to go on, the previous position is repeated and
/// [`GazeTracker::skip_movement`] is raised.
#[derive(Debug, Clone)]
pub struct GazeTracker {
    /// 0 = never move, 1 = no smoothing
    smoothing: f64,
    screen: ScreenSize,
    last: Option<Point2D>,
    skip_movement: bool,
}

impl GazeTracker {
    pub fn new(smoothing: f64, screen: ScreenSize) -> Self {
        Self {
            smoothing: smoothing.clamp(0.0, 1.0),
            screen,
            last: None,
            skip_movement: false,
        }
    }

    pub fn screen(&self) -> ScreenSize {
        self.screen
    }

    /// Last position handed out, if any
    pub fn position(&self) -> Option<Point2D> {
        self.last
    }

    /// Whether the last computed target was a hold rather than a move
    pub fn skip_movement(&self) -> bool {
        self.skip_movement
    }

    /// Forget the smoothed position, e.g. after recalibration
    pub fn reset(&mut self) {
        self.last = None;
        self.skip_movement = false;
    }

    pub fn compute_target(&mut self, eyes: &EyePair, model: Option<&GazeModel>) -> Point2D {
        if !eyes.is_complete() {
            trace!(detected = eyes.detected(), "holding: incomplete eye pair");
            return self.hold();
        }
        let Some(model) = model else {
            return self.hold();
        };

        let raw = match model.predict(eyes) {
            Ok(prediction) if !prediction.is_finite() => {
                debug!(?prediction, "holding: non-finite prediction");
                return self.hold();
            }
            Ok(Prediction::Position(p)) => p,
            Ok(Prediction::Direction(intent)) if intent.is_still() => return self.hold(),
            Ok(Prediction::Direction(intent)) => intent.target_from(self.current(), self.screen),
            Err(GazeModelError::NotFitted) => {
                trace!("holding: gaze model not fitted");
                return self.hold();
            }
            Err(e) => {
                debug!("holding: {e}");
                return self.hold();
            }
        };

        self.move_toward(self.screen.clamp(raw))
    }

    fn current(&self) -> Point2D {
        self.last.unwrap_or_else(|| self.screen.center())
    }

    fn hold(&mut self) -> Point2D {
        let p = self.current();
        self.last = Some(p);
        self.skip_movement = true;
        p
    }

    fn move_toward(&mut self, raw: Point2D) -> Point2D {
        let next = match self.last {
            Some(prev) => Point2D::new(
                prev.x + (raw.x - prev.x) * self.smoothing,
                prev.y + (raw.y - prev.y) * self.smoothing,
            ),
            None => raw,
        };
        self.last = Some(next);
        self.skip_movement = false;
        next
    }
}

impl Default for GazeTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING, ScreenSize::default())
    }
}
