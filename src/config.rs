//! Application configuration.
//!
//! A single JSON file with three sections. Every field has a default, so a
//! missing file or a partial one is fine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calibration::{BurstPolicy, CalibrationGrid};
use crate::detection::cascade::{CascadeClassifier, RegionLocator, ScanParams};
use crate::detection::{DetectionStrategy, DetectorConfig, DetectorProfile, MAX_THRESHOLD_LEVEL, PupilDetector};
use crate::gaze::InterpolationKind;
use crate::models::ScreenSize;
use crate::tracker::{DEFAULT_SMOOTHING, GazeTracker};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub detector: DetectorSection,
    pub calibration: CalibrationSection,
    pub tracking: TrackingSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSection {
    /// Speed runs eye boxes over the whole frame, accuracy finds the face first
    pub profile: DetectorProfile,
    /// Overrides `profile` when set
    pub strategy: Option<DetectionStrategy>,
    /// 0-20, binarization cutoff is `40 + 5 * level`
    pub threshold_level: u8,
    pub blur_iterations: u32,
    pub min_blob_area: u32,
    /// OpenCV Haar XML, or JSON for any other extension
    pub eye_cascade: PathBuf,
    pub face_cascade: Option<PathBuf>,
    pub eye_scan: ScanParams,
    pub face_scan: ScanParams,
}

impl Default for DetectorSection {
    fn default() -> Self {
        let defaults = DetectorConfig::default();
        Self {
            profile: DetectorProfile::Accuracy,
            strategy: None,
            threshold_level: defaults.threshold_level,
            blur_iterations: defaults.blur_iterations,
            min_blob_area: defaults.min_blob_area,
            eye_cascade: PathBuf::from("models/haarcascade_eye.xml"),
            face_cascade: Some(PathBuf::from("models/haarcascade_frontalface_default.xml")),
            eye_scan: ScanParams::default(),
            face_scan: ScanParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSection {
    /// Targets per row and column
    pub grid_size: usize,
    /// Distance of the outer targets from the screen edges, in pixels
    pub margin: f64,
    pub burst_frames: usize,
    /// Stop a burst after this many frames with both eyes
    pub usable_frames: usize,
    pub file: PathBuf,
}

impl Default for CalibrationSection {
    fn default() -> Self {
        let burst = BurstPolicy::default();
        Self {
            grid_size: 3,
            margin: 50.0,
            burst_frames: burst.max_frames,
            usable_frames: burst.usable_frames,
            file: PathBuf::from("calibration.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSection {
    pub model: InterpolationKind,
    /// Exponential smoothing factor α in (0, 1]
    pub smoothing: f64,
    pub screen: ScreenSize,
}

impl Default for TrackingSection {
    fn default() -> Self {
        Self {
            model: InterpolationKind::default(),
            smoothing: DEFAULT_SMOOTHING,
            screen: ScreenSize::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, or the defaults if there is no file
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) if p.exists() => {
                info!("Loading config: {}", p.display());
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config {}", p.display()))?;
                serde_json::from_str(&content).with_context(|| format!("Invalid config {}", p.display()))?
            }
            Some(p) => {
                debug!("Config not found, using defaults: {}", p.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        let t = &self.tracking;
        if !(t.smoothing > 0.0 && t.smoothing <= 1.0) {
            bail!("tracking.smoothing must be in (0, 1], got {}", t.smoothing);
        }
        if !(t.screen.width > 0.0 && t.screen.height > 0.0) {
            bail!("tracking.screen must have a positive size");
        }

        let c = &self.calibration;
        if c.grid_size < 2 {
            bail!("calibration.grid_size must be at least 2, got {}", c.grid_size);
        }
        if c.burst_frames == 0 {
            bail!("calibration.burst_frames must be positive");
        }
        if c.usable_frames == 0 || c.usable_frames > c.burst_frames {
            bail!(
                "calibration.usable_frames must be between 1 and burst_frames ({}), got {}",
                c.burst_frames,
                c.usable_frames
            );
        }
        if c.margin < 0.0 || 2.0 * c.margin >= t.screen.width.min(t.screen.height) {
            bail!("calibration.margin {} does not fit the screen", c.margin);
        }

        let d = &self.detector;
        if d.threshold_level > MAX_THRESHOLD_LEVEL {
            bail!("detector.threshold_level must be 0-{MAX_THRESHOLD_LEVEL}, got {}", d.threshold_level);
        }
        if self.strategy().uses_face() && d.face_cascade.is_none() {
            bail!("detector strategy {:?} needs detector.face_cascade", self.strategy());
        }
        Ok(())
    }

    pub fn strategy(&self) -> DetectionStrategy {
        self.detector.strategy.unwrap_or_else(|| self.detector.profile.strategy())
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            strategy: self.strategy(),
            threshold_level: self.detector.threshold_level,
            blur_iterations: self.detector.blur_iterations,
            min_blob_area: self.detector.min_blob_area,
            ..DetectorConfig::default()
        }
    }

    /// Load the cascade models and assemble the detector
    pub fn build_detector(&self) -> Result<PupilDetector> {
        let d = &self.detector;
        let eyes: Arc<dyn RegionLocator> = Arc::new(
            CascadeClassifier::from_file(&d.eye_cascade, d.eye_scan).context("Failed to load eye cascade")?,
        );
        let faces = match &d.face_cascade {
            Some(path) if self.strategy().uses_face() || path.exists() => {
                let face: Arc<dyn RegionLocator> =
                    Arc::new(CascadeClassifier::from_file(path, d.face_scan).context("Failed to load face cascade")?);
                Some(face)
            }
            _ => None,
        };
        Ok(PupilDetector::new(eyes, faces, self.detector_config())?)
    }

    pub fn grid(&self) -> CalibrationGrid {
        CalibrationGrid::new(self.calibration.grid_size, self.tracking.screen, self.calibration.margin)
    }

    pub fn burst(&self) -> BurstPolicy {
        BurstPolicy {
            max_frames: self.calibration.burst_frames,
            usable_frames: self.calibration.usable_frames,
        }
    }

    pub fn tracker(&self) -> GazeTracker {
        GazeTracker::new(self.tracking.smoothing, self.tracking.screen)
    }
}
