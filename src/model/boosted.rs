//! Gradient-boosted trees
//!
//! Multi-class boosting: each round fits one shallow regression tree
//! per class on the softmax residuals, applied with shrinkage on top
//! of log-prior base scores.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::model::tree::{grow_regression, Tree, TreeParams};
use crate::model::{
    softmax, validate_simplex, FitControl, Hyperparameters, ModelBackend, ModelKind, TrainingSet,
    CLASSES,
};
use crate::{FootyError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BoostedState {
    /// Log-prior base score per class
    base_scores: [f64; CLASSES],
    /// One tree per class per round
    rounds: Vec<[Tree; CLASSES]>,
    learning_rate: f64,
    n_features: usize,
    importance: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct GradientBoostingModel {
    state: Option<BoostedState>,
}

impl GradientBoostingModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let state: BoostedState = serde_json::from_slice(bytes)?;
        Ok(GradientBoostingModel { state: Some(state) })
    }

    fn state(&self) -> Result<&BoostedState> {
        self.state.as_ref().ok_or_else(|| {
            FootyError::InvalidModelOutput("gradient boosting model is unfitted".into())
        })
    }

    fn raw_scores(state: &BoostedState, x: &[f64]) -> [f64; CLASSES] {
        let mut scores = state.base_scores;
        for round in &state.rounds {
            for (k, tree) in round.iter().enumerate() {
                scores[k] += state.learning_rate * tree.leaf_value(x)[0];
            }
        }
        scores
    }
}

impl ModelBackend for GradientBoostingModel {
    fn kind(&self) -> ModelKind {
        ModelKind::GradientBoosting
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
        let n_estimators = hp.get_usize("n_estimators", 100);
        let max_depth = hp.get_usize("max_depth", 3);
        let learning_rate = hp.get_f64("learning_rate", 0.1);
        let subsample = hp.get_f64("subsample", 1.0).clamp(0.1, 1.0);
        let seed = hp.get_u64("seed", 42);

        // Log priors keep round zero at the empirical class rates
        let mut class_counts = [0.0; CLASSES];
        for label in &train.labels {
            class_counts[label.index()] += 1.0;
        }
        let mut base_scores = [0.0; CLASSES];
        for k in 0..CLASSES {
            base_scores[k] = ((class_counts[k] + 1.0) / (n as f64 + CLASSES as f64)).ln();
        }

        let params = TreeParams {
            max_depth,
            min_leaf: hp.get_usize("min_samples_leaf", 1),
        };
        let mut rng = StdRng::seed_from_u64(seed);
        let mut scores: Vec<[f64; CLASSES]> = vec![base_scores; n];
        let mut rounds: Vec<[Tree; CLASSES]> = Vec::with_capacity(n_estimators);
        let mut importance = vec![0.0; d];

        for _ in 0..n_estimators {
            ctl.check()?;

            let rows: Vec<usize> = if subsample < 1.0 {
                let take = ((n as f64) * subsample).round().max(1.0) as usize;
                let mut all: Vec<usize> = (0..n).collect();
                all.shuffle(&mut rng);
                all.truncate(take);
                all.sort_unstable();
                all
            } else {
                (0..n).collect()
            };

            let mut round: Vec<Tree> = Vec::with_capacity(CLASSES);
            let mut residuals = vec![0.0; n];
            for k in 0..CLASSES {
                for (i, score) in scores.iter().enumerate() {
                    let probs = softmax(score);
                    let target = if train.labels[i].index() == k { 1.0 } else { 0.0 };
                    residuals[i] = target - probs[k];
                }
                round.push(grow_regression(
                    &train.features,
                    &residuals,
                    rows.clone(),
                    &params,
                    &mut importance,
                ));
            }

            let round: [Tree; CLASSES] = round
                .try_into()
                .map_err(|_| FootyError::InvalidModelOutput("boosting round size".into()))?;
            for (i, x) in train.features.iter().enumerate() {
                for (k, tree) in round.iter().enumerate() {
                    scores[i][k] += learning_rate * tree.leaf_value(x)[0];
                }
            }
            rounds.push(round);
        }

        let total: f64 = importance.iter().sum();
        if total > 0.0 {
            for imp in &mut importance {
                *imp /= total;
            }
        }

        self.state = Some(BoostedState {
            base_scores,
            rounds,
            learning_rate,
            n_features: d,
            importance,
        });
        Ok(())
    }

    fn predict_proba(&self, features: &[f64]) -> Result<[f64; 3]> {
        let state = self.state()?;
        if features.len() != state.n_features {
            return Err(FootyError::InvalidModelOutput(format!(
                "feature length {} does not match trained width {}",
                features.len(),
                state.n_features
            )));
        }
        let probs = softmax(&Self::raw_scores(state, features));
        validate_simplex(&probs)?;
        Ok(probs)
    }

    fn feature_importance(&self) -> Option<Vec<f64>> {
        self.state.as_ref().map(|s| s.importance.clone())
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self.state()?)?)
    }
}
