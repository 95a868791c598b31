//! Random-forest-style ensemble classifier
//!
//! Bagged CART trees with per-split feature subsampling from a seeded
//! generator. Probabilities are the average of leaf class
//! distributions across trees.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::model::tree::{grow_classification, Tree, TreeParams};
use crate::model::{
    validate_simplex, FitControl, Hyperparameters, ModelBackend, ModelKind, TrainingSet, CLASSES,
};
use crate::{FootyError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ForestState {
    trees: Vec<Tree>,
    n_features: usize,
    importance: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct RandomForestModel {
    state: Option<ForestState>,
}

impl RandomForestModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let state: ForestState = serde_json::from_slice(bytes)?;
        Ok(RandomForestModel { state: Some(state) })
    }

    fn state(&self) -> Result<&ForestState> {
        self.state
            .as_ref()
            .ok_or_else(|| FootyError::InvalidModelOutput("random forest is unfitted".into()))
    }
}

impl ModelBackend for RandomForestModel {
    fn kind(&self) -> ModelKind {
        ModelKind::RandomForest
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
        let max_depth = hp.get_usize("max_depth", 10);
        let min_leaf = hp.get_usize("min_samples_leaf", 1);
        let seed = hp.get_u64("seed", 42);
        let mtry = (d as f64).sqrt().ceil() as usize;

        let labels: Vec<usize> = train.labels.iter().map(|l| l.index()).collect();
        let params = TreeParams {
            max_depth,
            min_leaf,
        };

        let mut rng = StdRng::seed_from_u64(seed);
        let mut trees = Vec::with_capacity(n_estimators);
        let mut importance = vec![0.0; d];

        for _ in 0..n_estimators {
            ctl.check()?;
            let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            trees.push(grow_classification(
                &train.features,
                &labels,
                rows,
                CLASSES,
                &params,
                mtry,
                Some(&mut rng),
                &mut importance,
            ));
        }

        let total: f64 = importance.iter().sum();
        if total > 0.0 {
            for imp in &mut importance {
                *imp /= total;
            }
        }

        self.state = Some(ForestState {
            trees,
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
        let mut probs = [0.0; CLASSES];
        for tree in &state.trees {
            let leaf = tree.leaf_value(features);
            for (p, v) in probs.iter_mut().zip(leaf.iter()) {
                *p += v;
            }
        }
        let n = state.trees.len() as f64;
        for p in &mut probs {
            *p /= n;
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_data::{synthetic_set, train_accuracy};

    fn hp(seed: u64) -> Hyperparameters {
        Hyperparameters::from_value(serde_json::json!({
            "n_estimators": 25,
            "max_depth": 6,
        }))
        .unwrap()
        .with_seed(seed)
    }

    fn fitted(set: &TrainingSet, seed: u64) -> RandomForestModel {
        let mut model = RandomForestModel::new();
        model
            .fit(set, None, &hp(seed), &FitControl::unbounded())
            .unwrap();
        model
    }

    #[test]
    fn test_learns_separable_classes() {
        let set = synthetic_set(150);
        let model = fitted(&set, 42);
        assert!(train_accuracy(&model, &set) > 0.9);
    }

    #[test]
    fn test_probabilities_are_simplex() {
        let set = synthetic_set(90);
        let model = fitted(&set, 42);
        for x in &set.features {
            validate_simplex(&model.predict_proba(x).unwrap()).unwrap();
        }
    }

    #[test]
    fn test_seeded_fit_is_deterministic() {
        let set = synthetic_set(100);
        let a = fitted(&set, 42).to_bytes().unwrap();
        let b = fitted(&set, 42).to_bytes().unwrap();
        assert_eq!(a, b);

        let c = fitted(&set, 7).to_bytes().unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_serialization_preserves_predictions() {
        let set = synthetic_set(80);
        let model = fitted(&set, 42);
        let restored = RandomForestModel::from_bytes(&model.to_bytes().unwrap()).unwrap();
        for x in &set.features {
            assert_eq!(
                model.predict_proba(x).unwrap(),
                restored.predict_proba(x).unwrap()
            );
        }
    }

    #[test]
    fn test_no_score_capability() {
        let set = synthetic_set(60);
        let model = fitted(&set, 42);
        assert!(model.predict_score(&set.features[0]).is_none());
    }

    #[test]
    fn test_importance_highlights_signal_feature() {
        let set = synthetic_set(150);
        let model = fitted(&set, 42);
        let importance = model.feature_importance().unwrap();
        // Feature 0 carries the class signal in the synthetic set
        assert!(importance[0] > importance[1]);
    }
}
