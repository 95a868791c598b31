//! Trainable model backends
//!
//! One fit/predict contract shared by every algorithm family. Backends
//! are indistinguishable to the training pipeline; capabilities the
//! algorithm cannot provide (score regression, feature importance) are
//! signalled, not faked.

pub mod boosted;
pub mod forest;
pub mod logistic;
pub mod neural;
mod tree;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::{FootyError, Outcome, Result};

/// Number of outcome classes (home/draw/away)
pub const CLASSES: usize = 3;

/// Probabilities must sum to one within this tolerance
pub const SIMPLEX_TOLERANCE: f64 = 1e-6;

/// Supported algorithm families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Logistic,
    RandomForest,
    GradientBoosting,
    NeuralNet,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Logistic => "logistic",
            ModelKind::RandomForest => "random_forest",
            ModelKind::GradientBoosting => "gradient_boosting",
            ModelKind::NeuralNet => "neural_net",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "logistic" => Some(ModelKind::Logistic),
            "random_forest" => Some(ModelKind::RandomForest),
            "gradient_boosting" => Some(ModelKind::GradientBoosting),
            "neural_net" => Some(ModelKind::NeuralNet),
            _ => None,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ModelKind::parse(s).ok_or_else(|| {
            format!(
                "Unknown model type: {}. Use logistic, random_forest, gradient_boosting or neural_net.",
                s
            )
        })
    }
}

/// Backend-specific hyperparameters as a JSON object with defaulted
/// typed accessors
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hyperparameters(pub serde_json::Map<String, serde_json::Value>);

impl Hyperparameters {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Object(map) => Ok(Hyperparameters(map)),
            serde_json::Value::Null => Ok(Hyperparameters::default()),
            other => Err(FootyError::InvalidRequest(format!(
                "hyperparameters must be a JSON object, got {}",
                other
            ))),
        }
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.0.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
    }

    pub fn get_usize(&self, key: &str, default: usize) -> usize {
        self.0
            .get(key)
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(default)
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.0.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    /// Inject the training seed unless the caller pinned one explicitly
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.0
            .entry("seed".to_string())
            .or_insert_with(|| serde_json::Value::from(seed));
        self
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.0.clone())
    }
}

/// Featurized training partition
#[derive(Debug, Clone, Default)]
pub struct TrainingSet {
    pub features: Vec<Vec<f64>>,
    pub labels: Vec<Outcome>,
    /// Settled (home, away) goals, aligned with `labels`; used by
    /// backends with a score head
    pub goals: Vec<(f32, f32)>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.features.first().map(|f| f.len()).unwrap_or(0)
    }
}

/// Cancellation flag and wall-clock deadline threaded through a fit
#[derive(Debug, Clone)]
pub struct FitControl {
    cancel: Arc<AtomicBool>,
    deadline: Option<Instant>,
    budget_secs: u64,
}

impl FitControl {
    pub fn unbounded() -> Self {
        FitControl {
            cancel: Arc::new(AtomicBool::new(false)),
            deadline: None,
            budget_secs: 0,
        }
    }

    pub fn new(cancel: Arc<AtomicBool>, budget_secs: u64) -> Self {
        FitControl {
            cancel,
            deadline: Some(Instant::now() + std::time::Duration::from_secs(budget_secs)),
            budget_secs,
        }
    }

    /// Check between iterations; cheap enough for inner loops
    pub fn check(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(FootyError::TrainingCancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(FootyError::TrainingTimeout {
                    budget_secs: self.budget_secs,
                });
            }
        }
        Ok(())
    }
}

/// The shared capability set every algorithm family implements
pub trait ModelBackend: Send + Sync {
    fn kind(&self) -> ModelKind;

    /// Fit on the train partition; backends that tune (iteration count,
    /// early stopping) may use the validation partition
    fn fit(
        &mut self,
        train: &TrainingSet,
        valid: Option<&TrainingSet>,
        hp: &Hyperparameters,
        ctl: &FitControl,
    ) -> Result<()>;

    /// Class probabilities [home, draw, away]; always a validated
    /// 3-simplex
    fn predict_proba(&self, features: &[f64]) -> Result<[f64; 3]>;

    /// Optional capability: predicted (home, away) goals
    fn predict_score(&self, _features: &[f64]) -> Option<Result<(f64, f64)>> {
        None
    }

    /// Optional capability: per-feature importance scores
    fn feature_importance(&self) -> Option<Vec<f64>> {
        None
    }

    /// Serialize the fitted internal state
    fn to_bytes(&self) -> Result<Vec<u8>>;
}

/// Construct an unfitted backend of the given family
pub fn new_backend(kind: ModelKind) -> Box<dyn ModelBackend> {
    match kind {
        ModelKind::Logistic => Box::new(logistic::LogisticModel::new()),
        ModelKind::RandomForest => Box::new(forest::RandomForestModel::new()),
        ModelKind::GradientBoosting => Box::new(boosted::GradientBoostingModel::new()),
        ModelKind::NeuralNet => Box::new(neural::NeuralModel::new()),
    }
}

/// Restore a fitted backend from serialized state
pub fn load_backend(kind: ModelKind, bytes: &[u8]) -> Result<Box<dyn ModelBackend>> {
    Ok(match kind {
        ModelKind::Logistic => Box::new(logistic::LogisticModel::from_bytes(bytes)?),
        ModelKind::RandomForest => Box::new(forest::RandomForestModel::from_bytes(bytes)?),
        ModelKind::GradientBoosting => {
            Box::new(boosted::GradientBoostingModel::from_bytes(bytes)?)
        }
        ModelKind::NeuralNet => Box::new(neural::NeuralModel::from_bytes(bytes)?),
    })
}

/// Numerically stable softmax
pub(crate) fn softmax(logits: &[f64; 3]) -> [f64; 3] {
    let max = logits[0].max(logits[1]).max(logits[2]);
    let exp = [
        (logits[0] - max).exp(),
        (logits[1] - max).exp(),
        (logits[2] - max).exp(),
    ];
    let total = exp[0] + exp[1] + exp[2];
    [exp[0] / total, exp[1] / total, exp[2] / total]
}

/// NaN or out-of-simplex probabilities are a fatal backend defect,
/// never passed on to the caller
pub fn validate_simplex(probs: &[f64; 3]) -> Result<()> {
    for (i, p) in probs.iter().enumerate() {
        if !p.is_finite() {
            return Err(FootyError::InvalidModelOutput(format!(
                "non-finite probability at class {}: {}",
                i, p
            )));
        }
        if *p < -SIMPLEX_TOLERANCE || *p > 1.0 + SIMPLEX_TOLERANCE {
            return Err(FootyError::InvalidModelOutput(format!(
                "probability out of range at class {}: {}",
                i, p
            )));
        }
    }
    let total: f64 = probs.iter().sum();
    if (total - 1.0).abs() > SIMPLEX_TOLERANCE {
        return Err(FootyError::InvalidModelOutput(format!(
            "probabilities sum to {} instead of 1",
            total
        )));
    }
    Ok(())
}
