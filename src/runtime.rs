//! Wiring between the camera, the acquisition loop and the calibration flow.
//!
//! The acquisition loop and calibration share one [`FrameSource`]. A
//! [`CalibrationGate`] gives calibration exclusive use of it: while a
//! [`GateGuard`] is alive the loop parks on a condition variable instead of
//! reading frames.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use image::DynamicImage;
use tracing::{debug, info, warn};

use crate::calibration::{BurstPolicy, CalibrationGrid, CalibrationRecord, CalibrationSample, CalibrationSession, record};
use crate::detection::PupilDetector;
use crate::gaze::{GazeModel, InterpolationKind};
use crate::models::Point2D;
use crate::tracker::GazeTracker;

/// Camera collaborator
pub trait FrameSource: Send {
    fn get_frame(&mut self) -> Result<DynamicImage>;

    fn resolution(&self) -> (u32, u32);

    /// Let go of the device. Called once when the acquisition loop stops.
    fn release(&mut self) {}
}

/// Cursor-control collaborator
pub trait CursorSink: Send {
    /// `skip_movement` is set when `target` only repeats the previous position
    fn update(&mut self, target: Point2D, skip_movement: bool);
}

pub type SharedFrameSource = Arc<Mutex<Box<dyn FrameSource>>>;

/// Pause after a failed frame read before trying again
const READ_RETRY_DELAY: Duration = Duration::from_millis(10);

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}

/// Binary "calibration in progress" signal
#[derive(Debug, Default)]
pub struct CalibrationGate {
    calibrating: Mutex<bool>,
    released: Condvar,
}

/// Held by calibration for the length of a burst. Dropping it reopens the gate.
#[derive(Debug)]
pub struct GateGuard<'a> {
    gate: &'a CalibrationGate,
}

impl CalibrationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_calibrating(&self) -> bool {
        *lock(&self.calibrating)
    }

    /// Close the gate, waiting for any other holder to finish first
    pub fn acquire(&self) -> GateGuard<'_> {
        let mut calibrating = lock(&self.calibrating);
        while *calibrating {
            calibrating = self.released.wait(calibrating).unwrap_or_else(PoisonError::into_inner);
        }
        *calibrating = true;
        GateGuard { gate: self }
    }

    /// Block while calibration holds the gate. Returns `false` if `should_exit`
    /// was raised while waiting.
    pub fn wait_until_open(&self, should_exit: &AtomicBool) -> bool {
        let mut calibrating = lock(&self.calibrating);
        while *calibrating {
            if should_exit.load(Ordering::Relaxed) {
                return false;
            }
            calibrating = self
                .released
                .wait_timeout(calibrating, Duration::from_millis(100))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        !should_exit.load(Ordering::Relaxed)
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        *lock(&self.gate.calibrating) = false;
        self.gate.released.notify_all();
    }
}

/// State read by the acquisition loop and replaced by calibration
pub struct SharedState {
    pub detector: RwLock<PupilDetector>,
    pub model: RwLock<GazeModel>,
    pub record: RwLock<Option<CalibrationRecord>>,
}

impl SharedState {
    /// Fit `kind` against `record` if there is one. A failed fit leaves the
    /// model unfitted rather than failing startup.
    pub fn new(mut detector: PupilDetector, kind: InterpolationKind, record: Option<CalibrationRecord>) -> Self {
        let mut model = GazeModel::new(kind);
        if let Some(record) = &record {
            if let Err(e) = model.fit(record) {
                warn!("starting with an unfitted gaze model: {e}");
            }
            detector.anchor_to(record.face_box);
        }
        Self {
            detector: RwLock::new(detector),
            model: RwLock::new(model),
            record: RwLock::new(record),
        }
    }

    pub fn model_snapshot(&self) -> GazeModel {
        read(&self.model).clone()
    }

    pub fn record_snapshot(&self) -> Option<CalibrationRecord> {
        read(&self.record).clone()
    }

    /// Switch strategy by refitting the current calibration. The old model
    /// stays active if the new one cannot be fitted.
    pub fn set_model_kind(&self, kind: InterpolationKind) -> Result<()> {
        let model = match read(&self.record).as_ref() {
            Some(record) => GazeModel::fitted(kind, record).with_context(|| format!("cannot switch to {kind}"))?,
            None => GazeModel::new(kind),
        };
        *write(&self.model) = model;
        info!(model = %kind, "gaze model switched");
        Ok(())
    }
}

/// The frame → detector → tracker → cursor loop
pub struct AcquisitionLoop {
    shared: Arc<SharedState>,
    camera: SharedFrameSource,
    gate: Arc<CalibrationGate>,
    tracker: GazeTracker,
    sink: Box<dyn CursorSink>,
    should_exit: Arc<AtomicBool>,
}

impl AcquisitionLoop {
    pub fn new(
        shared: Arc<SharedState>,
        camera: SharedFrameSource,
        gate: Arc<CalibrationGate>,
        tracker: GazeTracker,
        sink: Box<dyn CursorSink>,
        should_exit: Arc<AtomicBool>,
    ) -> Self {
        Self { shared, camera, gate, tracker, sink, should_exit }
    }

    /// Process one frame. A failed frame read is logged and skipped.
    pub fn step(&mut self) -> Option<Point2D> {
        let frame = match lock(&self.camera).get_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("frame read failed: {e:#}");
                return None;
            }
        };

        let eyes = read(&self.shared.detector).detect(&frame);
        let target = {
            let model = read(&self.shared.model);
            self.tracker.compute_target(&eyes, Some(&*model))
        };
        self.sink.update(target, self.tracker.skip_movement());
        Some(target)
    }

    /// Run until `should_exit` is raised, then release the camera
    pub fn run(mut self) {
        info!("acquisition loop started");
        let mut frames = 0u64;
        while !self.should_exit.load(Ordering::Relaxed) {
            if !self.gate.wait_until_open(&self.should_exit) {
                break;
            }
            match self.step() {
                Some(_) => frames += 1,
                None => std::thread::sleep(READ_RETRY_DELAY),
            }
        }
        lock(&self.camera).release();
        info!(frames, "acquisition loop stopped");
    }

    pub fn spawn(self) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || self.run())
            .context("failed to spawn acquisition thread")
    }
}

/// What finishing a calibration achieved
#[derive(Debug)]
pub struct CalibrationOutcome {
    pub record: CalibrationRecord,
    pub saved: bool,
    pub fitted: bool,
}

/// Drives a [`CalibrationSession`] against the shared camera and swaps the
/// result into [`SharedState`]
pub struct CalibrationController {
    shared: Arc<SharedState>,
    camera: SharedFrameSource,
    gate: Arc<CalibrationGate>,
    file: PathBuf,
    burst: BurstPolicy,
    session: Option<CalibrationSession>,
}

impl CalibrationController {
    pub fn new(
        shared: Arc<SharedState>,
        camera: SharedFrameSource,
        gate: Arc<CalibrationGate>,
        file: PathBuf,
        burst: BurstPolicy,
    ) -> Self {
        Self { shared, camera, gate, file, burst, session: None }
    }

    pub fn session(&self) -> Option<&CalibrationSession> {
        self.session.as_ref()
    }

    /// Start a new session, abandoning any unfinished one. The eye search is
    /// unanchored until the session completes, since the user may have moved
    /// away from the stored face box.
    pub fn begin(&mut self, grid: CalibrationGrid) -> Result<()> {
        if let Some(mut old) = self.session.take() {
            if !old.state().is_terminal() {
                old.cancel()?;
            }
        }
        write(&self.shared.detector).anchor_to(None);
        let mut session = CalibrationSession::new(grid, self.burst);
        session.start()?;
        self.session = Some(session);
        Ok(())
    }

    /// Burst-sample the current target with exclusive camera access
    pub fn capture(&mut self) -> Result<CalibrationSample> {
        let session = self.session.as_mut().context("no calibration in progress")?;

        let _gate = self.gate.acquire();
        let mut camera = lock(&self.camera);
        let detector = read(&self.shared.detector);
        let sample = session.capture_frames(
            || match camera.get_frame() {
                Ok(frame) => Some(frame),
                Err(e) => {
                    warn!("calibration frame read failed: {e:#}");
                    None
                }
            },
            &detector,
        )?;
        let (captured, total) = session.progress();
        info!(captured, total, "calibration target captured");
        Ok(sample)
    }

    /// Drop the session and go back to the stored calibration's anchor
    pub fn cancel(&mut self) -> Result<()> {
        if let Some(session) = self.session.as_mut() {
            session.cancel()?;
        }
        self.session = None;
        let face = read(&self.shared.record).as_ref().and_then(|r| r.face_box);
        write(&self.shared.detector).anchor_to(face);
        Ok(())
    }

    /// Finish the session: save the record, refit the active strategy and
    /// swap it in. If fitting fails the previous model stays active; the
    /// record is still saved so the strategy can be switched later.
    pub fn complete(&mut self) -> Result<CalibrationOutcome> {
        let session = self.session.take().context("no calibration in progress")?;
        let record = session.finish()?;

        let saved = match record::save(&record, &self.file) {
            Ok(_) => true,
            Err(e) => {
                warn!("calibration not saved: {e}");
                false
            }
        };

        let kind = read(&self.shared.model).kind();
        let fitted = match GazeModel::fitted(kind, &record) {
            Ok(model) => {
                *write(&self.shared.model) = model;
                true
            }
            Err(e) => {
                warn!(model = %kind, "keeping previous gaze model: {e}");
                false
            }
        };

        write(&self.shared.detector).anchor_to(record.face_box);
        *write(&self.shared.record) = Some(record.clone());
        debug!(saved, fitted, "calibration complete");

        Ok(CalibrationOutcome { record, saved, fitted })
    }
}
