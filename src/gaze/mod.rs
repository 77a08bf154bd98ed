//! Mappings from a pupil pair to the screen.
//!
//! A [`GazeModel`] names the strategy in use and holds its fitted parameters,
//! if any. Fitting builds a fresh set of parameters and only replaces the old
//! ones on success, so a failed refit leaves the previous mapping active.

pub mod joystick;
pub mod linear;
pub mod logistic;
pub mod tangent;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

use crate::calibration::CalibrationRecord;
use crate::models::{EyePair, Point2D};
pub use joystick::{JoystickIntent, JoystickThreshold, Toward};
pub use linear::LinearRegression;
pub use logistic::LogisticRegression;
pub use tangent::TangentGeometric;

#[derive(Debug, Error, PartialEq)]
pub enum GazeModelError {
    #[error("gaze model has not been fitted")]
    NotFitted,
    #[error("both eyes are required")]
    IncompleteEyes,
    #[error("need at least {needed} usable calibration samples, found {found}")]
    NotEnoughSamples { needed: usize, found: usize },
    #[error("calibration has no usable center sample")]
    MissingCenterSample,
    #[error("calibration data is degenerate: {0}")]
    Degenerate(String),
    #[error("classifier failed: {0}")]
    Classifier(String),
}

/// Which mapping strategy is active
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationKind {
    #[default]
    Linear,
    Logistic,
    Tangent,
    Joystick,
}

impl InterpolationKind {
    pub const ALL: [InterpolationKind; 4] = [Self::Linear, Self::Logistic, Self::Tangent, Self::Joystick];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Logistic => "logistic",
            Self::Tangent => "tangent",
            Self::Joystick => "joystick",
        }
    }
}

impl fmt::Display for InterpolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for InterpolationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown gaze model '{s}' (expected linear, logistic, tangent or joystick)"))
    }
}

/// What a model makes of one eye pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prediction {
    /// Absolute screen position
    Position(Point2D),
    /// Directional intent from the joystick model
    Direction(JoystickIntent),
}

impl Prediction {
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Position(p) => p.is_finite(),
            Self::Direction(_) => true,
        }
    }
}

/// Fitted parameters of one strategy
#[derive(Debug, Clone, PartialEq)]
pub enum FittedModel {
    Linear(LinearRegression),
    Logistic(LogisticRegression),
    Tangent(TangentGeometric),
    Joystick(JoystickThreshold),
}

impl FittedModel {
    pub fn fit(kind: InterpolationKind, record: &CalibrationRecord) -> Result<Self, GazeModelError> {
        Ok(match kind {
            InterpolationKind::Linear => Self::Linear(LinearRegression::fit(record)?),
            InterpolationKind::Logistic => Self::Logistic(LogisticRegression::fit(record)?),
            InterpolationKind::Tangent => Self::Tangent(TangentGeometric::fit(record)?),
            InterpolationKind::Joystick => Self::Joystick(JoystickThreshold::fit(record)?),
        })
    }

    pub fn predict(&self, features: &[f64; 4]) -> Prediction {
        match self {
            Self::Linear(m) => Prediction::Position(m.predict(features)),
            Self::Logistic(m) => Prediction::Position(m.predict(features)),
            Self::Tangent(m) => Prediction::Position(m.predict(features)),
            Self::Joystick(m) => Prediction::Direction(m.predict(features)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GazeModel {
    kind: InterpolationKind,
    fitted: Option<FittedModel>,
}

impl GazeModel {
    pub fn new(kind: InterpolationKind) -> Self {
        Self { kind, fitted: None }
    }

    /// Build and fit in one go
    pub fn fitted(kind: InterpolationKind, record: &CalibrationRecord) -> Result<Self, GazeModelError> {
        let mut model = Self::new(kind);
        model.fit(record)?;
        Ok(model)
    }

    pub fn kind(&self) -> InterpolationKind {
        self.kind
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Fit against `record`. On failure the previous parameters stay in place.
    pub fn fit(&mut self, record: &CalibrationRecord) -> Result<(), GazeModelError> {
        match FittedModel::fit(self.kind, record) {
            Ok(fitted) => {
                info!(model = %self.kind, samples = record.training_rows().len(), "gaze model fitted");
                self.fitted = Some(fitted);
                Ok(())
            }
            Err(e) => {
                warn!(model = %self.kind, "gaze model fit failed: {e}");
                Err(e)
            }
        }
    }

    pub fn predict(&self, eyes: &EyePair) -> Result<Prediction, GazeModelError> {
        let fitted = self.fitted.as_ref().ok_or(GazeModelError::NotFitted)?;
        let features = eyes.features().ok_or(GazeModelError::IncompleteEyes)?;
        Ok(fitted.predict(&features))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in InterpolationKind::ALL {
            assert_eq!(kind.to_string().parse::<InterpolationKind>(), Ok(kind));
        }
        assert!("rbf".parse::<InterpolationKind>().is_err());
    }

    #[test]
    fn unfitted_model_reports_not_fitted() {
        let model = GazeModel::new(InterpolationKind::Linear);
        let eyes = EyePair::new(Point2D::new(1.0, 1.0), Point2D::new(2.0, 1.0));
        assert_eq!(model.predict(&eyes), Err(GazeModelError::NotFitted));
    }
}
