pub mod grid;
pub mod record;
pub mod session;

pub use grid::{CalibrationGrid, CalibrationTarget};
pub use record::{CalibrationRecord, CalibrationSample, RecordError, StoredCalibration};
pub use session::{BurstPolicy, CalibrationError, CalibrationSession, Observation, SessionState, median_eye_pair};
