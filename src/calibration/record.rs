use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};
use uuid::Uuid;

use super::grid::{CalibrationTarget, center_index, square_side};
use crate::models::{EyePair, FaceBox, Point2D};

const FORMAT_VERSION: u32 = 1;

/// One median-filtered observation for one target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationSample {
    pub eyes: EyePair,
    pub target: CalibrationTarget,
}

/// A completed calibration: one sample per grid target, in grid order
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationRecord {
    pub samples: Vec<CalibrationSample>,
    pub face_box: Option<FaceBox>,
}

impl CalibrationRecord {
    /// Pair stored eye samples with their targets. Fails unless both lists
    /// have the same, square, non-zero length.
    pub fn from_parts(
        eyes: Vec<EyePair>,
        targets: Vec<Point2D>,
        face_box: Option<FaceBox>,
    ) -> Result<Self, RecordError> {
        if eyes.len() != targets.len() {
            return Err(RecordError::Inconsistent(format!(
                "{} samples for {} targets",
                eyes.len(),
                targets.len()
            )));
        }
        if square_side(eyes.len()).is_none() {
            return Err(RecordError::Inconsistent(format!("{} targets is not a square grid", eyes.len())));
        }
        if let Some(i) = eyes.iter().position(|e| matches!((e.left, e.right), (Some(l), Some(r)) if l.x > r.x)) {
            return Err(RecordError::Inconsistent(format!("sample {i} has its eyes out of order")));
        }

        let samples = eyes
            .into_iter()
            .zip(targets)
            .enumerate()
            .map(|(index, (eyes, screen_point))| CalibrationSample {
                eyes,
                target: CalibrationTarget { screen_point, index },
            })
            .collect();
        Ok(Self { samples, face_box })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples with both eyes present, as `(features, screen point)` rows
    pub fn training_rows(&self) -> Vec<([f64; 4], Point2D)> {
        self.samples
            .iter()
            .filter_map(|s| Some((s.eyes.features()?, s.target.screen_point)))
            .collect()
    }

    /// The sample taken at the middle grid target, if the grid has one
    pub fn center_sample(&self) -> Option<&CalibrationSample> {
        self.samples.get(center_index(self.samples.len())?)
    }

    pub fn targets(&self) -> Vec<Point2D> {
        self.samples.iter().map(|s| s.target.screen_point).collect()
    }
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("failed to access calibration file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("calibration file is not valid JSON")]
    Json(#[from] serde_json::Error),
    #[error("unsupported calibration file version {0}")]
    Version(u32),
    #[error("inconsistent calibration record: {0}")]
    Inconsistent(String),
    #[error("invalid calibration timestamp")]
    Timestamp(#[from] time::error::Parse),
    #[error("failed to format calibration timestamp")]
    Format(#[from] time::error::Format),
    #[error("failed to replace calibration file")]
    Persist(#[from] tempfile::PersistError),
}

/// On-disk layout. Samples and targets are parallel lists in grid order;
/// a missing eye is `null`.
#[derive(Debug, Serialize, Deserialize)]
struct CalibrationFile {
    version: u32,
    session_id: Uuid,
    created_at: String,
    samples: Vec<EyePair>,
    targets: Vec<Point2D>,
    face_box: Option<FaceBox>,
}

/// A record together with the metadata it was stored with
#[derive(Debug, Clone)]
pub struct StoredCalibration {
    pub session_id: Uuid,
    pub created_at: OffsetDateTime,
    pub record: CalibrationRecord,
}

/// Write the record to `path`, replacing any previous file atomically.
/// Returns the new session id.
pub fn save(record: &CalibrationRecord, path: &Path) -> Result<Uuid, RecordError> {
    let io_err = |source| RecordError::Io { path: path.to_path_buf(), source };

    let session_id = Uuid::new_v4();
    let created_at = OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .format(&Rfc3339)?;
    let file = CalibrationFile {
        version: FORMAT_VERSION,
        session_id,
        created_at,
        samples: record.samples.iter().map(|s| s.eyes).collect(),
        targets: record.targets(),
        face_box: record.face_box,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(io_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    serde_json::to_writer_pretty(&mut tmp, &file)?;
    tmp.flush().map_err(io_err)?;
    tmp.persist(path)?;

    info!(path = %path.display(), %session_id, targets = record.len(), "calibration saved");
    Ok(session_id)
}

/// Read a calibration file. Any inconsistency rejects the whole file.
pub fn load(path: &Path) -> Result<StoredCalibration, RecordError> {
    let bytes = std::fs::read(path).map_err(|source| RecordError::Io { path: path.to_path_buf(), source })?;
    let file: CalibrationFile = serde_json::from_slice(&bytes)?;
    if file.version != FORMAT_VERSION {
        return Err(RecordError::Version(file.version));
    }
    let created_at = OffsetDateTime::parse(&file.created_at, &Rfc3339)?;
    let record = CalibrationRecord::from_parts(file.samples, file.targets, file.face_box)?;

    Ok(StoredCalibration {
        session_id: file.session_id,
        created_at,
        record,
    })
}

/// Load a calibration, treating a missing or unreadable file as uncalibrated
pub fn load_or_uncalibrated(path: &Path) -> Option<StoredCalibration> {
    if !path.exists() {
        info!(path = %path.display(), "no calibration file, starting uncalibrated");
        return None;
    }
    match load(path) {
        Ok(stored) => Some(stored),
        Err(e) => {
            warn!(path = %path.display(), "ignoring calibration file: {e}");
            None
        }
    }
}
