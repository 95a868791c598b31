//! Multinomial logistic regression
//!
//! Full-batch gradient descent on softmax cross-entropy with L2
//! shrinkage. Inputs are z-score standardised and the scaler is stored
//! with the weights, so serialized state is self-contained.

use serde::{Deserialize, Serialize};

use crate::model::{
    softmax, validate_simplex, FitControl, Hyperparameters, ModelBackend, ModelKind, TrainingSet,
    CLASSES,
};
use crate::{FootyError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogisticState {
    /// Per-class weight rows, [CLASSES][n_features]
    weights: Vec<Vec<f64>>,
    bias: [f64; CLASSES],
    scaler_mean: Vec<f64>,
    scaler_std: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct LogisticModel {
    state: Option<LogisticState>,
}

impl LogisticModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let state: LogisticState = serde_json::from_slice(bytes)?;
        if state.weights.len() != CLASSES {
            return Err(FootyError::InvalidModelOutput(format!(
                "logistic state has {} weight rows, expected {}",
                state.weights.len(),
                CLASSES
            )));
        }
        Ok(LogisticModel { state: Some(state) })
    }

    fn state(&self) -> Result<&LogisticState> {
        self.state
            .as_ref()
            .ok_or_else(|| FootyError::InvalidModelOutput("logistic model is unfitted".into()))
    }

    fn standardize(state: &LogisticState, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(state.scaler_mean.iter().zip(state.scaler_std.iter()))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    fn logits(state: &LogisticState, z: &[f64]) -> [f64; CLASSES] {
        let mut logits = [0.0; CLASSES];
        for (k, logit) in logits.iter_mut().enumerate() {
            *logit = state.bias[k]
                + state.weights[k]
                    .iter()
                    .zip(z.iter())
                    .map(|(w, v)| w * v)
                    .sum::<f64>();
        }
        logits
    }
}

impl ModelBackend for LogisticModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Logistic
    }

    fn fit(
        &mut self,
        train: &TrainingSet,
        _valid: Option<&TrainingSet>,
        hp: &Hyperparameters,
        ctl: &FitControl,
    ) -> Result<()> {
        if train.is_empty() {
            return Err(FootyError::InsufficientData { have: 0, need: 1 });
        }
        let n = train.len();
        let d = train.n_features();
        let max_iter = hp.get_usize("max_iter", 1000);
        let lr = hp.get_f64("learning_rate", 0.1);
        let l2 = hp.get_f64("l2", 1e-4);

        // Fit the scaler on the train partition only
        let mut mean = vec![0.0; d];
        for x in &train.features {
            for (j, v) in x.iter().enumerate() {
                mean[j] += v;
            }
        }
        for m in &mut mean {
            *m /= n as f64;
        }
        let mut std = vec![0.0; d];
        for x in &train.features {
            for (j, v) in x.iter().enumerate() {
                std[j] += (v - mean[j]) * (v - mean[j]);
            }
        }
        for s in &mut std {
            *s = (*s / n as f64).sqrt();
            if *s < 1e-9 {
                *s = 1.0;
            }
        }

        let standardized: Vec<Vec<f64>> = train
            .features
            .iter()
            .map(|x| {
                x.iter()
                    .zip(mean.iter().zip(std.iter()))
                    .map(|(v, (m, s))| (v - m) / s)
                    .collect()
            })
            .collect();

        // Deterministic zero initialisation
        let mut weights = vec![vec![0.0; d]; CLASSES];
        let mut bias = [0.0; CLASSES];

        for iter in 0..max_iter {
            if iter % 50 == 0 {
                ctl.check()?;
            }

            let mut grad_w = vec![vec![0.0; d]; CLASSES];
            let mut grad_b = [0.0; CLASSES];

            for (z, label) in standardized.iter().zip(train.labels.iter()) {
                let mut logits = [0.0; CLASSES];
                for (k, logit) in logits.iter_mut().enumerate() {
                    *logit = bias[k]
                        + weights[k].iter().zip(z.iter()).map(|(w, v)| w * v).sum::<f64>();
                }
                let probs = softmax(&logits);
                for k in 0..CLASSES {
                    let err = probs[k] - if label.index() == k { 1.0 } else { 0.0 };
                    grad_b[k] += err;
                    for (g, v) in grad_w[k].iter_mut().zip(z.iter()) {
                        *g += err * v;
                    }
                }
            }

            let scale = lr / n as f64;
            for k in 0..CLASSES {
                bias[k] -= scale * grad_b[k];
                for (w, g) in weights[k].iter_mut().zip(grad_w[k].iter()) {
                    *w -= scale * (g + l2 * *w * n as f64);
                }
            }
        }

        self.state = Some(LogisticState {
            weights,
            bias,
            scaler_mean: mean,
            scaler_std: std,
        });
        Ok(())
    }

    fn predict_proba(&self, features: &[f64]) -> Result<[f64; 3]> {
        let state = self.state()?;
        if features.len() != state.scaler_mean.len() {
            return Err(FootyError::InvalidModelOutput(format!(
                "feature length {} does not match trained width {}",
                features.len(),
                state.scaler_mean.len()
            )));
        }
        let z = Self::standardize(state, features);
        let probs = softmax(&Self::logits(state, &z));
        validate_simplex(&probs)?;
        Ok(probs)
    }

    fn feature_importance(&self) -> Option<Vec<f64>> {
        let state = self.state.as_ref()?;
        let d = state.scaler_mean.len();
        let mut importance = vec![0.0; d];
        for row in &state.weights {
            for (imp, w) in importance.iter_mut().zip(row.iter()) {
                *imp += w.abs();
            }
        }
        let total: f64 = importance.iter().sum();
        if total > 0.0 {
            for imp in &mut importance {
                *imp /= total;
            }
        }
        Some(importance)
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self.state()?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_data::{synthetic_set, train_accuracy};

    fn fitted(set: &TrainingSet) -> LogisticModel {
        let mut model = LogisticModel::new();
        model
            .fit(
                set,
                None,
                &Hyperparameters::default(),
                &FitControl::unbounded(),
            )
            .unwrap();
        model
    }

    #[test]
    fn test_learns_separable_classes() {
        let set = synthetic_set(120);
        let model = fitted(&set);
        assert!(train_accuracy(&model, &set) > 0.85);
    }

    #[test]
    fn test_probabilities_are_simplex() {
        let set = synthetic_set(60);
        let model = fitted(&set);
        for x in &set.features {
            let probs = model.predict_proba(x).unwrap();
            validate_simplex(&probs).unwrap();
        }
    }

    #[test]
    fn test_serialization_preserves_predictions() {
        let set = synthetic_set(60);
        let model = fitted(&set);
        let restored = LogisticModel::from_bytes(&model.to_bytes().unwrap()).unwrap();
        for x in &set.features {
            assert_eq!(
                model.predict_proba(x).unwrap(),
                restored.predict_proba(x).unwrap()
            );
        }
    }

    #[test]
    fn test_deterministic_fit() {
        let set = synthetic_set(80);
        let a = fitted(&set).to_bytes().unwrap();
        let b = fitted(&set).to_bytes().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unfitted_model_errors() {
        let model = LogisticModel::new();
        assert!(model.predict_proba(&[0.0, 0.0, 0.0]).is_err());
        assert!(model.predict_score(&[0.0]).is_none());
    }

    #[test]
    fn test_importance_sums_to_one() {
        let set = synthetic_set(80);
        let model = fitted(&set);
        let importance = model.feature_importance().unwrap();
        assert_eq!(importance.len(), set.n_features());
        assert!((importance.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }
}
