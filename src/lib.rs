pub mod calibration;
pub mod config;
pub mod detection;
pub mod gaze;
pub mod models;
pub mod pipeline;
pub mod runtime;
pub mod tracker;

pub use calibration::{CalibrationRecord, CalibrationSession};
pub use config::AppConfig;
pub use detection::{DetectionStrategy, PupilDetector};
pub use gaze::{GazeModel, InterpolationKind, Prediction};
pub use models::{EyePair, FaceBox, Point2D, ScreenSize};
pub use pipeline::{DebugConfig, MetadataValue, Pipeline, PipelineContext, PipelineData, PipelineStep};
pub use tracker::GazeTracker;
