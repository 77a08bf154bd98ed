use nalgebra::{DMatrix, RowDVector};

use super::GazeModelError;
use crate::calibration::CalibrationRecord;
use crate::models::Point2D;

const ITERATIONS: usize = 2000;
const LEARNING_RATE: f64 = 0.5;
const L2_PENALTY: f64 = 1e-4;

/// Classify the eye pair as one of the calibration targets.
///
/// Every usable calibration sample is its own class; the prediction is the
/// screen point of the most probable class, so output is quantized to the
/// grid. Multinomial logistic regression over standardized features, trained
/// by full-batch gradient descent from zero weights (deterministic).
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticRegression {
    mean: [f64; 4],
    scale: [f64; 4],
    /// 5 × classes, first row is the bias
    weights: DMatrix<f64>,
    classes: Vec<Point2D>,
}

impl LogisticRegression {
    pub fn fit(record: &CalibrationRecord) -> Result<Self, GazeModelError> {
        let rows = record.training_rows();
        if rows.len() < 2 {
            return Err(GazeModelError::NotEnoughSamples { needed: 2, found: rows.len() });
        }
        let n = rows.len();

        let mut mean = [0.0; 4];
        let mut scale = [1.0; 4];
        for i in 0..4 {
            mean[i] = rows.iter().map(|(f, _)| f[i]).sum::<f64>() / n as f64;
            let var = rows.iter().map(|(f, _)| (f[i] - mean[i]).powi(2)).sum::<f64>() / n as f64;
            if var > f64::EPSILON {
                scale[i] = var.sqrt();
            }
        }

        let x = DMatrix::from_fn(n, 5, |r, c| {
            if c == 0 { 1.0 } else { (rows[r].0[c - 1] - mean[c - 1]) / scale[c - 1] }
        });
        let onehot = DMatrix::<f64>::identity(n, n);
        let xt = x.transpose();

        let mut weights = DMatrix::<f64>::zeros(5, n);
        for _ in 0..ITERATIONS {
            let mut probs = &x * &weights;
            softmax_rows(&mut probs);
            let grad = &xt * (probs - &onehot) / n as f64 + &weights * L2_PENALTY;
            weights -= grad * LEARNING_RATE;
        }

        if weights.iter().any(|w| !w.is_finite()) {
            return Err(GazeModelError::Classifier("training diverged".to_string()));
        }

        Ok(Self {
            mean,
            scale,
            weights,
            classes: rows.into_iter().map(|(_, target)| target).collect(),
        })
    }

    /// Class probabilities for one feature vector
    pub fn probabilities(&self, f: &[f64; 4]) -> Vec<f64> {
        let x = RowDVector::from_fn(5, |_, c| {
            if c == 0 { 1.0 } else { (f[c - 1] - self.mean[c - 1]) / self.scale[c - 1] }
        });
        let mut logits = DMatrix::from_row_slice(1, self.classes.len(), (x * &self.weights).as_slice());
        softmax_rows(&mut logits);
        logits.iter().copied().collect()
    }

    pub fn predict(&self, f: &[f64; 4]) -> Point2D {
        let probs = self.probabilities(f);
        let best = probs
            .iter()
            .enumerate()
            .fold(0, |best, (i, p)| if *p > probs[best] { i } else { best });
        self.classes[best]
    }
}

fn softmax_rows(m: &mut DMatrix<f64>) {
    for r in 0..m.nrows() {
        let max = m.row(r).max();
        let mut sum = 0.0;
        for c in 0..m.ncols() {
            let e = (m[(r, c)] - max).exp();
            m[(r, c)] = e;
            sum += e;
        }
        for c in 0..m.ncols() {
            m[(r, c)] /= sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EyePair;

    fn grid() -> (Vec<EyePair>, Vec<Point2D>) {
        let mut eyes = Vec::new();
        let mut targets = Vec::new();
        for row in 0..3 {
            for col in 0..3 {
                let (ex, ey) = (10.0 * col as f64, 10.0 * row as f64);
                eyes.push(EyePair::new(Point2D::new(ex, ey), Point2D::new(ex + 50.0, ey)));
                targets.push(Point2D::new(col as f64 * 500.0, row as f64 * 400.0));
            }
        }
        (eyes, targets)
    }

    #[test]
    fn corners_classify_to_their_targets() {
        let (eyes, targets) = grid();
        let model = LogisticRegression::fit(&CalibrationRecord::from_parts(eyes.clone(), targets.clone(), None).unwrap()).unwrap();
        for i in [0, 2, 6, 8] {
            assert_eq!(model.predict(&eyes[i].features().unwrap()), targets[i]);
        }
        let total: f64 = model.probabilities(&eyes[4].features().unwrap()).iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn output_is_always_a_target() {
        let (eyes, targets) = grid();
        let model = LogisticRegression::fit(&CalibrationRecord::from_parts(eyes, targets.clone(), None).unwrap()).unwrap();
        let p = model.predict(&[13.0, 7.0, 63.0, 7.0]);
        assert!(targets.contains(&p));
    }

    #[test]
    fn single_sample_is_not_enough() {
        let mut eyes = vec![EyePair::missing(); 4];
        eyes[0] = EyePair::new(Point2D::new(0.0, 0.0), Point2D::new(1.0, 0.0));
        let rec = CalibrationRecord::from_parts(eyes, vec![Point2D::new(0.0, 0.0); 4], None).unwrap();
        assert_eq!(
            LogisticRegression::fit(&rec),
            Err(GazeModelError::NotEnoughSamples { needed: 2, found: 1 })
        );
    }
}
