pub mod blobs;
pub mod cascade;
pub mod filters;
pub mod preprocessing;
pub mod steps;
pub mod tuning;

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{BoundingBox, EyePair, FaceBox, Point2D};
use crate::pipeline::{Pipeline, PipelineData};
use cascade::RegionLocator;
use steps::{BlobStep, SmoothStep, ThresholdStep, TrimTopStep};

/// Which stages run to turn a frame into pupil points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    /// Eye boxes only; each pupil is its box center
    EyeCascade,
    /// Eye boxes refined by thresholding and blob extraction
    EyeCascadeBlob,
    /// Largest face first, eye boxes only inside it
    FaceEyeCascade,
    /// Largest face first, then blob refinement
    FaceEyeCascadeBlob,
}

impl DetectionStrategy {
    pub fn uses_face(&self) -> bool {
        matches!(self, Self::FaceEyeCascade | Self::FaceEyeCascadeBlob)
    }

    pub fn uses_blob(&self) -> bool {
        matches!(self, Self::EyeCascadeBlob | Self::FaceEyeCascadeBlob)
    }
}

/// User-facing choice between the fast and the accurate pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorProfile {
    Speed,
    Accuracy,
}

impl DetectorProfile {
    pub fn strategy(&self) -> DetectionStrategy {
        match self {
            Self::Speed => DetectionStrategy::EyeCascadeBlob,
            Self::Accuracy => DetectionStrategy::FaceEyeCascadeBlob,
        }
    }
}

/// Largest user-facing threshold level
pub const MAX_THRESHOLD_LEVEL: u8 = 20;

/// Map the 0-20 threshold level to a grayscale cutoff. Level 1 is 45, the
/// cutoff that works for most dark irises under indoor light.
pub fn threshold_from_level(level: u8) -> u8 {
    40 + 5 * level.min(MAX_THRESHOLD_LEVEL)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub strategy: DetectionStrategy,
    pub threshold_level: u8,
    pub blur_iterations: u32,
    pub min_blob_area: u32,
    /// Fraction of each eye crop dropped from the top before blob search
    pub top_trim: f32,
}

impl DetectorConfig {
    pub fn cutoff(&self) -> u8 {
        threshold_from_level(self.threshold_level)
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            strategy: DetectionStrategy::FaceEyeCascadeBlob,
            threshold_level: 1,
            blur_iterations: 3,
            min_blob_area: 6,
            top_trim: 0.25,
        }
    }
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("strategy {0:?} needs a face locator")]
    MissingFaceLocator(DetectionStrategy),
}

/// Everything one detection pass found
#[derive(Debug, Clone, Default)]
pub struct Detection {
    /// At most two points, left to right
    pub points: Vec<Point2D>,
    /// Face the eyes were searched in (face-first strategies only)
    pub face: Option<FaceBox>,
    /// How many points came from a blob rather than a box center
    pub blob_hits: usize,
}

impl Detection {
    pub fn eyes(&self) -> EyePair {
        EyePair::from_points(&self.points)
    }
}

/// Finds zero, one or two pupils in a frame
#[derive(Clone)]
pub struct PupilDetector {
    eye_locator: Arc<dyn RegionLocator>,
    face_locator: Option<Arc<dyn RegionLocator>>,
    config: DetectorConfig,
    search_anchor: Option<FaceBox>,
    pupil_pipeline: Pipeline,
}

impl PupilDetector {
    pub fn new(
        eye_locator: Arc<dyn RegionLocator>,
        face_locator: Option<Arc<dyn RegionLocator>>,
        config: DetectorConfig,
    ) -> Result<Self, DetectorError> {
        if config.strategy.uses_face() && face_locator.is_none() {
            return Err(DetectorError::MissingFaceLocator(config.strategy));
        }
        let pupil_pipeline = build_pupil_pipeline(&config, Pipeline::new());
        Ok(Self {
            eye_locator,
            face_locator,
            config,
            search_anchor: None,
            pupil_pipeline,
        })
    }

    /// Dump intermediate pupil images of every detection into `dir`
    pub fn with_debug(mut self, dir: PathBuf) -> anyhow::Result<Self> {
        self.pupil_pipeline = build_pupil_pipeline(&self.config, Pipeline::new().with_debug(dir)?);
        Ok(self)
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn set_strategy(&mut self, strategy: DetectionStrategy) -> Result<(), DetectorError> {
        if strategy.uses_face() && self.face_locator.is_none() {
            return Err(DetectorError::MissingFaceLocator(strategy));
        }
        self.config.strategy = strategy;
        Ok(())
    }

    pub fn set_threshold_level(&mut self, level: u8) {
        self.config.threshold_level = level.min(MAX_THRESHOLD_LEVEL);
        self.rebuild();
    }

    pub fn set_blur_iterations(&mut self, iterations: u32) {
        self.config.blur_iterations = iterations;
        self.rebuild();
    }

    /// Restrict eye-only strategies to a fixed region, normally the averaged
    /// face box from calibration
    pub fn anchor_to(&mut self, face: Option<FaceBox>) {
        self.search_anchor = face;
    }

    pub fn anchor(&self) -> Option<FaceBox> {
        self.search_anchor
    }

    fn rebuild(&mut self) {
        let base = std::mem::take(&mut self.pupil_pipeline);
        self.pupil_pipeline = build_pupil_pipeline(&self.config, base.without_steps());
    }

    /// Pupils in `frame`, left to right
    pub fn detect(&self, frame: &DynamicImage) -> EyePair {
        self.detect_gray(&frame.to_luma8()).eyes()
    }

    pub fn detect_gray(&self, gray: &GrayImage) -> Detection {
        let (boxes, face) = self.eye_boxes(gray);
        let (points, blob_hits) = if self.config.strategy.uses_blob() {
            self.refine_pupils(&self.pupil_pipeline, gray, &boxes)
        } else {
            (filters::box_centers(&boxes), 0)
        };
        let points = filters::order_left_to_right(points);
        if points.len() < 2 {
            debug!(found = points.len(), "eye detection miss");
        }
        Detection { points, face, blob_hits }
    }

    /// Largest face in the frame, if a face locator is configured
    pub fn detect_face(&self, frame: &DynamicImage) -> Option<FaceBox> {
        let gray = frame.to_luma8();
        self.largest_face(&gray).map(FaceBox::from)
    }

    pub(crate) fn largest_face(&self, gray: &GrayImage) -> Option<BoundingBox> {
        let locator = self.face_locator.as_ref()?;
        filters::largest(&locator.locate(gray))
    }

    /// Candidate eye boxes in frame coordinates, already reduced to the two
    /// topmost
    pub(crate) fn eye_boxes(&self, gray: &GrayImage) -> (Vec<BoundingBox>, Option<FaceBox>) {
        let (width, height) = gray.dimensions();
        let (region, face) = if self.config.strategy.uses_face() {
            match self.largest_face(gray) {
                Some(face) => (Some(face), Some(FaceBox::from(face))),
                None => {
                    debug!("no face found");
                    return (Vec::new(), None);
                }
            }
        } else {
            (self.search_anchor.and_then(|a| a.to_region(width, height)), None)
        };

        let boxes: Vec<BoundingBox> = match region.and_then(|r| r.clamp_to(width, height)) {
            Some(r) => {
                let crop = image::imageops::crop_imm(gray, r.x, r.y, r.width, r.height).to_image();
                self.eye_locator
                    .locate(&crop)
                    .into_iter()
                    .map(|b| b.offset(r.x, r.y))
                    .collect()
            }
            None => self.eye_locator.locate(gray),
        };

        (filters::keep_two_topmost(&boxes, |b| b.center().y), face)
    }

    pub(crate) fn refine_pupils(
        &self,
        pipeline: &Pipeline,
        gray: &GrayImage,
        boxes: &[BoundingBox],
    ) -> (Vec<Point2D>, usize) {
        let items: Vec<PipelineData> = boxes
            .iter()
            .filter_map(|b| PipelineData::from_eye_box(gray, *b))
            .collect();

        match pipeline.run(items) {
            Ok(refined) => {
                let hits = refined.iter().filter(|item| item.pupil().is_some()).count();
                (refined.iter().map(PipelineData::pupil_or_center).collect(), hits)
            }
            Err(e) => {
                warn!("pupil pipeline failed, using eye box centers: {e:#}");
                (filters::box_centers(boxes), 0)
            }
        }
    }
}

/// Threshold, trim the eyebrow band, smooth, then extract the pupil blob
pub fn build_pupil_pipeline(config: &DetectorConfig, base: Pipeline) -> Pipeline {
    base.add_step(Arc::new(ThresholdStep { cutoff: config.cutoff() }))
        .add_step(Arc::new(TrimTopStep { fraction: config.top_trim }))
        .add_step(Arc::new(SmoothStep { iterations: config.blur_iterations }))
        .add_step(Arc::new(BlobStep { min_area: config.min_blob_area }))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<BoundingBox>);

    impl RegionLocator for Fixed {
        fn locate(&self, _gray: &GrayImage) -> Vec<BoundingBox> {
            self.0.clone()
        }
    }

    #[test]
    fn threshold_levels_scale_by_five() {
        assert_eq!(threshold_from_level(0), 40);
        assert_eq!(threshold_from_level(1), 45);
        assert_eq!(threshold_from_level(20), 140);
        assert_eq!(threshold_from_level(200), 140);
    }

    #[test]
    fn face_strategy_requires_face_locator() {
        let eyes: Arc<dyn RegionLocator> = Arc::new(Fixed(vec![]));
        let result = PupilDetector::new(eyes, None, DetectorConfig::default());
        assert!(matches!(result, Err(DetectorError::MissingFaceLocator(_))));
    }

    #[test]
    fn eye_cascade_keeps_two_topmost_centers() {
        let eyes: Arc<dyn RegionLocator> = Arc::new(Fixed(vec![
            BoundingBox::new(100, 100, 20, 20),
            BoundingBox::new(10, 10, 20, 20),
            BoundingBox::new(60, 12, 20, 20),
        ]));
        let config = DetectorConfig { strategy: DetectionStrategy::EyeCascade, ..Default::default() };
        let detector = PupilDetector::new(eyes, None, config).unwrap();

        let frame = DynamicImage::new_luma8(200, 200);
        let pair = detector.detect(&frame);
        assert_eq!(pair.left, Some(Point2D::new(20.0, 20.0)));
        assert_eq!(pair.right, Some(Point2D::new(70.0, 22.0)));
    }

    #[test]
    fn no_face_means_no_eyes() {
        let eyes: Arc<dyn RegionLocator> = Arc::new(Fixed(vec![BoundingBox::new(1, 1, 5, 5)]));
        let faces: Arc<dyn RegionLocator> = Arc::new(Fixed(vec![]));
        let config = DetectorConfig { strategy: DetectionStrategy::FaceEyeCascade, ..Default::default() };
        let detector = PupilDetector::new(eyes, Some(faces), config).unwrap();

        let detection = detector.detect_gray(&GrayImage::new(50, 50));
        assert!(detection.points.is_empty());
        assert!(detection.face.is_none());
    }
}
