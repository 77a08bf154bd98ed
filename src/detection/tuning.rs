use image::GrayImage;
use tracing::{debug, info};

use super::{MAX_THRESHOLD_LEVEL, PupilDetector, build_pupil_pipeline};
use crate::models::BoundingBox;
use crate::pipeline::Pipeline;

/// Outcome of a threshold sweep
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSweep {
    pub best_level: u8,
    /// `(level, frames where both pupils were found by the blob stage)`
    pub scores: Vec<(u8, usize)>,
}

/// Try each threshold level on the sample frames and pick the one where the
/// blob stage finds both pupils most often. Ties go to the lower level.
///
/// Eye boxes are located once per frame; only the pupil pipeline is rerun per
/// level. Returns `None` when no frame yields two eye boxes.
pub fn sweep_threshold(
    detector: &PupilDetector,
    frames: &[GrayImage],
    levels: impl IntoIterator<Item = u8>,
) -> Option<ThresholdSweep> {
    let located: Vec<(&GrayImage, Vec<BoundingBox>)> = frames
        .iter()
        .map(|frame| (frame, detector.eye_boxes(frame).0))
        .filter(|(_, boxes)| boxes.len() == 2)
        .collect();

    if located.is_empty() {
        debug!(frames = frames.len(), "threshold sweep found no frame with two eyes");
        return None;
    }

    let mut scores = Vec::new();
    for level in levels {
        let level = level.min(MAX_THRESHOLD_LEVEL);
        let mut config = detector.config().clone();
        config.threshold_level = level;
        let pipeline = build_pupil_pipeline(&config, Pipeline::new());

        let score = located
            .iter()
            .filter(|(frame, boxes)| detector.refine_pupils(&pipeline, frame, boxes).1 == 2)
            .count();
        debug!(level, score, "threshold level scored");
        scores.push((level, score));
    }

    let (best_level, best_score) = scores
        .iter()
        .copied()
        .reduce(|best, s| if s.1 > best.1 || (s.1 == best.1 && s.0 < best.0) { s } else { best })?;
    info!(best_level, best_score, candidates = located.len(), "threshold sweep done");

    Some(ThresholdSweep { best_level, scores })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::cascade::RegionLocator;
    use crate::detection::{DetectionStrategy, DetectorConfig};
    use image::Luma;
    use imageproc::drawing::draw_filled_circle_mut;
    use std::sync::Arc;

    struct Fixed(Vec<BoundingBox>);

    impl RegionLocator for Fixed {
        fn locate(&self, _gray: &GrayImage) -> Vec<BoundingBox> {
            self.0.clone()
        }
    }

    fn detector(boxes: Vec<BoundingBox>) -> PupilDetector {
        let config = DetectorConfig {
            strategy: DetectionStrategy::EyeCascadeBlob,
            blur_iterations: 1,
            ..Default::default()
        };
        PupilDetector::new(Arc::new(Fixed(boxes)), None, config).unwrap()
    }

    #[test]
    fn picks_lowest_level_that_finds_both_pupils() {
        // Pupils at gray 92: level 10 (cutoff 90) misses them, level 11
        // (cutoff 95) is the first to see them.
        let mut frame = GrayImage::from_pixel(120, 60, Luma([200u8]));
        draw_filled_circle_mut(&mut frame, (30, 35), 5, Luma([92u8]));
        draw_filled_circle_mut(&mut frame, (90, 35), 5, Luma([92u8]));
        let det = detector(vec![BoundingBox::new(10, 15, 40, 40), BoundingBox::new(70, 15, 40, 40)]);

        let sweep = sweep_threshold(&det, &[frame], [1, 10, 11, 12, 20]).unwrap();
        assert_eq!(sweep.best_level, 11);
        assert_eq!(sweep.scores[0], (1, 0));
        assert_eq!(sweep.scores[2], (11, 1));
    }

    #[test]
    fn no_eyes_no_sweep() {
        let det = detector(vec![BoundingBox::new(0, 0, 10, 10)]);
        let frame = GrayImage::new(40, 40);
        assert!(sweep_threshold(&det, &[frame], 0..=20).is_none());
    }
}
