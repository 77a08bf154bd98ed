#![allow(dead_code)]

mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from eyecursor for tests
pub use eyecursor::calibration::{BurstPolicy, CalibrationGrid, CalibrationRecord, CalibrationSession, Observation};
pub use eyecursor::gaze::{GazeModel, GazeModelError, InterpolationKind, Prediction};
pub use eyecursor::models::ScreenSize;
pub use eyecursor::tracker::GazeTracker;
pub use eyecursor::{EyePair, Point2D};
