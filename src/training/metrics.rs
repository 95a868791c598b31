//! Evaluation metrics
//!
//! Everything is derived from held-out test predictions: a 3x3
//! confusion matrix over {home, draw, away}, probabilistic losses and
//! a bucketed calibration error.

use serde::{Deserialize, Serialize};

use crate::model::{validate_simplex, CLASSES};
use crate::{Outcome, Result};

/// Number of confidence buckets for calibration error
const CALIBRATION_BUCKETS: usize = 10;

/// Probability floor for log-loss
const LOG_LOSS_EPS: f64 = 1e-15;

/// Metrics computed on the held-out test partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub accuracy: f64,
    /// Per-class values indexed Home=0, Draw=1, Away=2
    pub precision: [f64; CLASSES],
    pub recall: [f64; CLASSES],
    pub f1: [f64; CLASSES],
    pub log_loss: f64,
    pub brier_score: f64,
    pub calibration_error: f64,
    /// confusion[actual][predicted]
    pub confusion: [[usize; CLASSES]; CLASSES],
    pub samples: usize,
}

impl EvaluationMetrics {
    /// Compute metrics from predicted probability triples and settled
    /// outcomes. Every triple is validated as a simplex first.
    pub fn compute(probs: &[[f64; 3]], actual: &[Outcome]) -> Result<Self> {
        assert_eq!(probs.len(), actual.len());
        let n = actual.len();

        let mut confusion = [[0usize; CLASSES]; CLASSES];
        let mut log_loss = 0.0;
        let mut brier = 0.0;
        let mut buckets = [(0usize, 0.0f64, 0usize); CALIBRATION_BUCKETS];

        for (p, y) in probs.iter().zip(actual.iter()) {
            validate_simplex(p)?;
            let predicted = Outcome::from_probs(p);
            confusion[y.index()][predicted.index()] += 1;

            log_loss -= p[y.index()].max(LOG_LOSS_EPS).ln();

            for k in 0..CLASSES {
                let target = if y.index() == k { 1.0 } else { 0.0 };
                brier += (p[k] - target) * (p[k] - target);
            }

            let confidence = p[predicted.index()];
            let bucket = ((confidence * CALIBRATION_BUCKETS as f64) as usize)
                .min(CALIBRATION_BUCKETS - 1);
            buckets[bucket].0 += 1;
            buckets[bucket].1 += confidence;
            if predicted == *y {
                buckets[bucket].2 += 1;
            }
        }

        let mut precision = [0.0; CLASSES];
        let mut recall = [0.0; CLASSES];
        let mut f1 = [0.0; CLASSES];
        let mut correct = 0;
        for k in 0..CLASSES {
            correct += confusion[k][k];
            let predicted_k: usize = (0..CLASSES).map(|a| confusion[a][k]).sum();
            let actual_k: usize = confusion[k].iter().sum();
            precision[k] = if predicted_k > 0 {
                confusion[k][k] as f64 / predicted_k as f64
            } else {
                0.0
            };
            recall[k] = if actual_k > 0 {
                confusion[k][k] as f64 / actual_k as f64
            } else {
                0.0
            };
            f1[k] = if precision[k] + recall[k] > 0.0 {
                2.0 * precision[k] * recall[k] / (precision[k] + recall[k])
            } else {
                0.0
            };
        }

        let mut calibration_error = 0.0;
        for (count, confidence_sum, correct_in_bucket) in buckets {
            if count == 0 {
                continue;
            }
            let avg_confidence = confidence_sum / count as f64;
            let observed = correct_in_bucket as f64 / count as f64;
            calibration_error += (count as f64 / n as f64) * (avg_confidence - observed).abs();
        }

        Ok(EvaluationMetrics {
            accuracy: if n > 0 { correct as f64 / n as f64 } else { 0.0 },
            precision,
            recall,
            f1,
            log_loss: if n > 0 { log_loss / n as f64 } else { 0.0 },
            brier_score: if n > 0 { brier / n as f64 } else { 0.0 },
            calibration_error,
            confusion,
            samples: n,
        })
    }
}
