use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use eyecursor::calibration::CalibrationRecord;
use eyecursor::detection::cascade::RegionLocator;
use eyecursor::detection::{DetectionStrategy, DetectorConfig, PupilDetector};
use eyecursor::models::BoundingBox;
use eyecursor::runtime::{CursorSink, FrameSource, SharedFrameSource};
use eyecursor::{EyePair, Point2D};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::drawing::draw_filled_circle_mut;

/// Region locator that reports the same boxes for every image
pub struct FixedLocator(pub Vec<BoundingBox>);

impl RegionLocator for FixedLocator {
    fn locate(&self, _gray: &GrayImage) -> Vec<BoundingBox> {
        self.0.clone()
    }
}

/// Eye boxes for the 200x100 synthetic frames: left half and right half
pub fn eye_boxes() -> Vec<BoundingBox> {
    vec![BoundingBox::new(0, 0, 100, 100), BoundingBox::new(100, 0, 100, 100)]
}

/// Blob detector over [`eye_boxes`]
pub fn blob_detector() -> PupilDetector {
    let config = DetectorConfig {
        strategy: DetectionStrategy::EyeCascadeBlob,
        blur_iterations: 1,
        ..Default::default()
    };
    PupilDetector::new(Arc::new(FixedLocator(eye_boxes())), None, config).expect("eye-only strategy")
}

/// 200x100 light frame with a dark pupil disc at each given center
pub fn eye_frame(pupils: &[(i32, i32)]) -> DynamicImage {
    let mut img = GrayImage::from_pixel(200, 100, Luma([200u8]));
    for &center in pupils {
        draw_filled_circle_mut(&mut img, center, 4, Luma([10u8]));
    }
    DynamicImage::ImageLuma8(img)
}

/// Pupil centers for grid cell `(col, row)` of a 3×3 calibration
pub fn pupils_for(col: i32, row: i32) -> [(i32, i32); 2] {
    [(30 + 10 * col, 45 + 10 * row), (130 + 10 * col, 45 + 10 * row)]
}

/// Camera that replays frames in order, cycling at the end
pub struct ScriptedCamera {
    frames: Vec<DynamicImage>,
    pub reads: Arc<AtomicUsize>,
    pub released: Arc<AtomicBool>,
}

impl ScriptedCamera {
    pub fn new(frames: Vec<DynamicImage>) -> Self {
        Self {
            frames,
            reads: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shared(self) -> SharedFrameSource {
        let camera: Box<dyn FrameSource> = Box::new(self);
        Arc::new(Mutex::new(camera))
    }
}

impl FrameSource for ScriptedCamera {
    fn get_frame(&mut self) -> anyhow::Result<DynamicImage> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        anyhow::ensure!(!self.frames.is_empty(), "camera has no frames");
        Ok(self.frames[n % self.frames.len()].clone())
    }

    fn resolution(&self) -> (u32, u32) {
        self.frames.first().map(|f| (f.width(), f.height())).unwrap_or((0, 0))
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Cursor sink that keeps every update
#[derive(Clone, Default)]
pub struct RecordingSink(pub Arc<Mutex<Vec<(Point2D, bool)>>>);

impl CursorSink for RecordingSink {
    fn update(&mut self, target: Point2D, skip_movement: bool) {
        self.0.lock().unwrap().push((target, skip_movement));
    }
}

/// 3×3 calibration with `screen = 100 * eye + 50` on both axes and both
/// eyes at the same coordinate
pub fn linear_record() -> CalibrationRecord {
    let mut eyes = Vec::new();
    let mut targets = Vec::new();
    for row in 0..3 {
        for col in 0..3 {
            let e = Point2D::new(col as f64, row as f64);
            eyes.push(EyePair::new(e, e));
            targets.push(Point2D::new(100.0 * e.x + 50.0, 100.0 * e.y + 50.0));
        }
    }
    CalibrationRecord::from_parts(eyes, targets, None).unwrap()
}

/// Both eyes at the same point
pub fn same_eyes(x: f64, y: f64) -> EyePair {
    EyePair::new(Point2D::new(x, y), Point2D::new(x, y))
}

/// Tiny deterministic generator for property-style loops
pub struct Lcg(pub u64);

impl Lcg {
    pub fn next_f64(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }
}
