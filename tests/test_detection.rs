//! Integration tests for pupil detection.
//!
//! Tests cover:
//! - Blob refinement in frame coordinates
//! - Face-first search with eye boxes found inside the face crop
//! - Fallback to eye-box centers when no blob survives
//! - Runtime threshold changes and the debug image dump
//! - Eye search anchored to the calibration face box
//! - Recalibration searching the whole frame again

mod common;

use std::sync::{Arc, Mutex};

use common::*;
use eyecursor::detection::cascade::RegionLocator;
use eyecursor::detection::{DetectionStrategy, DetectorConfig, PupilDetector};
use eyecursor::FaceBox;
use eyecursor::calibration::record;
use eyecursor::models::BoundingBox;
use eyecursor::runtime::{CalibrationController, CalibrationGate, SharedState};
use image::GrayImage;

#[test]
fn test_blob_pupils_in_frame_coordinates() {
    let detector = blob_detector();
    let detection = detector.detect_gray(&eye_frame(&pupils_for(1, 2)).to_luma8());

    assert_eq!(detection.blob_hits, 2);
    assert_eq!(detection.eyes(), EyePair::new(Point2D::new(40.0, 65.0), Point2D::new(140.0, 65.0)));
}

/// Reports eye boxes relative to whatever image it is given, and records
/// the sizes it was asked to search
struct CropAwareEyes {
    seen: Mutex<Vec<(u32, u32)>>,
}

impl RegionLocator for CropAwareEyes {
    fn locate(&self, gray: &GrayImage) -> Vec<BoundingBox> {
        self.seen.lock().unwrap().push(gray.dimensions());
        vec![
            BoundingBox::new(10, 10, 20, 20),
            BoundingBox::new(50, 12, 20, 20),
            // Lower hit (mouth corner) is dropped by the topmost filter
            BoundingBox::new(30, 60, 20, 20),
        ]
    }
}

#[test]
fn test_face_first_searches_inside_largest_face() {
    let eyes = Arc::new(CropAwareEyes { seen: Default::default() });
    let faces: Arc<dyn RegionLocator> = Arc::new(FixedLocator(vec![BoundingBox::new(0, 0, 20, 20), BoundingBox::new(40, 10, 100, 90)]));
    let config = DetectorConfig { strategy: DetectionStrategy::FaceEyeCascade, ..Default::default() };
    let detector = PupilDetector::new(eyes.clone(), Some(faces), config).unwrap();

    let detection = detector.detect_gray(&GrayImage::new(200, 100));

    assert_eq!(eyes.seen.lock().unwrap().as_slice(), &[(100, 90)]);
    assert_eq!(detection.face.map(|f| (f.x, f.y, f.width, f.height)), Some((40.0, 10.0, 100.0, 90.0)));
    assert_eq!(detection.eyes(), EyePair::new(Point2D::new(60.0, 30.0), Point2D::new(100.0, 32.0)));
}

#[test]
fn test_missing_blob_falls_back_to_box_center() {
    let detector = blob_detector();
    // Only the left eye has a pupil
    let detection = detector.detect_gray(&eye_frame(&[(30, 50)]).to_luma8());

    assert_eq!(detection.blob_hits, 1);
    assert_eq!(detection.eyes(), EyePair::new(Point2D::new(30.0, 50.0), Point2D::new(150.0, 50.0)));
}

#[test]
fn test_threshold_level_changes_take_effect() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let debug_dir = dir.path().join("debug");
    let mut detector = blob_detector().with_debug(debug_dir.clone())?;

    // Gray 92 pupils are invisible at level 1 (cutoff 45)
    let mut img = GrayImage::from_pixel(200, 100, image::Luma([200u8]));
    imageproc::drawing::draw_filled_circle_mut(&mut img, (30, 50), 4, image::Luma([92u8]));
    imageproc::drawing::draw_filled_circle_mut(&mut img, (130, 50), 4, image::Luma([92u8]));

    assert_eq!(detector.detect_gray(&img).blob_hits, 0);
    detector.set_threshold_level(11);
    assert_eq!(detector.config().cutoff(), 95);
    assert_eq!(detector.detect_gray(&img).blob_hits, 2);

    // Debug output survives the rebuild
    assert!(debug_dir.join("00_input").join("eye01.png").exists());
    assert!(debug_dir.join("04_blob_extraction").join("eye02.png").exists());
    Ok(())
}

#[test]
fn test_anchor_confines_eye_search() {
    let eyes = Arc::new(CropAwareEyes { seen: Default::default() });
    let config = DetectorConfig { strategy: DetectionStrategy::EyeCascade, ..Default::default() };
    let mut detector = PupilDetector::new(eyes.clone(), None, config).unwrap();

    // Fractional box rounds outward and is clipped to the 200x100 frame
    detector.anchor_to(Some(FaceBox { x: 40.4, y: 10.6, width: 180.0, height: 60.0 }));
    let detection = detector.detect_gray(&GrayImage::new(200, 100));

    assert_eq!(eyes.seen.lock().unwrap().as_slice(), &[(160, 61)]);
    assert!(detection.face.is_none());
    assert_eq!(detection.eyes(), EyePair::new(Point2D::new(60.0, 30.0), Point2D::new(100.0, 32.0)));

    // Without the anchor the whole frame is searched
    detector.anchor_to(None);
    let detection = detector.detect_gray(&GrayImage::new(200, 100));
    assert_eq!(eyes.seen.lock().unwrap().last(), Some(&(200, 100)));
    assert_eq!(detection.eyes(), EyePair::new(Point2D::new(20.0, 20.0), Point2D::new(60.0, 22.0)));
}

#[test]
fn test_recalibration_ignores_stale_anchor() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let file = dir.path().join("calibration.json");

    // The stored face box sits where the user no longer is
    let mut stale = linear_record();
    let stale_face = FaceBox { x: 150.0, y: 60.0, width: 50.0, height: 40.0 };
    stale.face_box = Some(stale_face);
    let shared = Arc::new(SharedState::new(blob_detector(), InterpolationKind::Linear, Some(stale)));
    assert_eq!(shared.detector.read().unwrap().anchor(), Some(stale_face));
    let anchored = shared.detector.read().unwrap().detect(&eye_frame(&pupils_for(1, 1)));
    assert!(!anchored.is_complete());

    let frames = (0..9).map(|i| eye_frame(&pupils_for(i % 3, i / 3))).collect();
    let burst = BurstPolicy { max_frames: 3, usable_frames: 1 };
    let mut controller = CalibrationController::new(
        Arc::clone(&shared),
        ScriptedCamera::new(frames).shared(),
        Arc::new(CalibrationGate::new()),
        file.clone(),
        burst,
    );

    controller.begin(CalibrationGrid::new(3, ScreenSize::new(1000.0, 1000.0), 100.0))?;
    assert_eq!(shared.detector.read().unwrap().anchor(), None);
    for _ in 0..9 {
        controller.capture()?;
    }
    let outcome = controller.complete()?;

    assert!(outcome.fitted);
    assert_eq!(outcome.record.training_rows().len(), 9);
    assert_eq!(record::load(&file)?.record, outcome.record);
    Ok(())
}

#[test]
fn test_cancelled_recalibration_restores_anchor() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let mut stored = linear_record();
    let face = FaceBox { x: 0.0, y: 0.0, width: 200.0, height: 100.0 };
    stored.face_box = Some(face);
    let shared = Arc::new(SharedState::new(blob_detector(), InterpolationKind::Linear, Some(stored)));

    let mut controller = CalibrationController::new(
        Arc::clone(&shared),
        ScriptedCamera::new(vec![eye_frame(&pupils_for(0, 0))]).shared(),
        Arc::new(CalibrationGate::new()),
        dir.path().join("calibration.json"),
        BurstPolicy::default(),
    );
    controller.begin(CalibrationGrid::new(3, ScreenSize::new(1000.0, 1000.0), 100.0))?;
    assert_eq!(shared.detector.read().unwrap().anchor(), None);
    controller.cancel()?;
    assert_eq!(shared.detector.read().unwrap().anchor(), Some(face));
    Ok(())
}
