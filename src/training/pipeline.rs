//! Training pipeline
//!
//! Select settled matches, split, featurize with strictly pre-match
//! context, fit the backend, evaluate on the held-out test partition
//! and package an artifact. Any failure aborts the whole run; nothing
//! partial is ever persisted.

use chrono::Utc;
use std::time::Instant;

use crate::data::Store;
use crate::features::{FeatureBuilder, FeatureContext};
use crate::model::{
    new_backend, FitControl, Hyperparameters, ModelKind, TrainingSet,
};
use crate::registry::{ArtifactMeta, ModelArtifact, TrainingInfo};
use crate::training::metrics::EvaluationMetrics;
use crate::training::split::{split, SplitIndices, SplitStrategy};
use crate::{FootyError, MatchRecord, Result};

/// One training request as received from the API boundary
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TrainingRequest {
    pub model_name: String,
    pub model_type: ModelKind,
    pub league: Option<String>,
    pub season: Option<String>,
    pub test_size: f64,
    pub seed: u64,
    pub split: SplitStrategy,
    pub hyperparameters: Hyperparameters,
}

impl TrainingRequest {
    pub fn new(model_name: &str, model_type: ModelKind) -> Self {
        TrainingRequest {
            model_name: model_name.to_string(),
            model_type,
            league: None,
            season: None,
            test_size: 0.2,
            seed: 42,
            split: SplitStrategy::Stratified,
            hyperparameters: Hyperparameters::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(FootyError::InvalidRequest("model name is empty".into()));
        }
        if !(self.test_size > 0.0 && self.test_size <= 0.5) {
            return Err(FootyError::InvalidRequest(format!(
                "test_size must be in (0, 0.5], got {}",
                self.test_size
            )));
        }
        Ok(())
    }
}

/// Runs one training request end to end
pub struct TrainingPipeline {
    store: Store,
    builder: FeatureBuilder,
    min_samples: usize,
}

impl TrainingPipeline {
    pub fn new(store: Store, min_samples: usize) -> Self {
        TrainingPipeline {
            store,
            builder: FeatureBuilder::new(),
            min_samples,
        }
    }

    /// Produce an unpersisted artifact for the request. Deterministic
    /// given the same request and an unchanged dataset.
    pub fn run(&self, request: &TrainingRequest, ctl: &FitControl) -> Result<ModelArtifact> {
        request.validate()?;
        let started = Instant::now();

        let matches = self
            .store
            .settled_matches(request.league.as_deref(), request.season.as_deref())?;
        if matches.len() < self.min_samples {
            return Err(FootyError::InsufficientData {
                have: matches.len(),
                need: self.min_samples,
            });
        }
        ctl.check()?;

        let labels: Vec<_> = matches
            .iter()
            .map(|m| m.outcome().expect("settled matches have outcomes"))
            .collect();
        let indices = split(&labels, request.split, request.test_size, request.seed);
        if indices.train.is_empty() || indices.test.is_empty() {
            return Err(FootyError::InsufficientData {
                have: matches.len(),
                need: self.min_samples,
            });
        }

        let (train, valid, test) = self.featurize(&matches, &indices, ctl)?;
        ctl.check()?;

        log::info!(
            "Training {} ({}) on {} samples ({} valid, {} test)",
            request.model_name,
            request.model_type,
            train.len(),
            valid.len(),
            test.len()
        );

        let hp = request.hyperparameters.clone().with_seed(request.seed);
        let mut backend = new_backend(request.model_type);
        backend.fit(&train, Some(&valid).filter(|v| !v.is_empty()), &hp, ctl)?;
        ctl.check()?;

        let mut probs = Vec::with_capacity(test.len());
        for x in &test.features {
            probs.push(backend.predict_proba(x)?);
        }
        let metrics = EvaluationMetrics::compute(&probs, &test.labels)?;

        log::info!(
            "Evaluated {}: accuracy {:.3}, log-loss {:.3}, Brier {:.3}",
            request.model_name,
            metrics.accuracy,
            metrics.log_loss,
            metrics.brier_score
        );

        let meta = ArtifactMeta {
            name: request.model_name.clone(),
            version: 0, // assigned by the registry
            model_type: request.model_type,
            schema: self.builder.schema().clone(),
            trained_at: Utc::now(),
            info: TrainingInfo {
                train_samples: train.len(),
                validation_samples: valid.len(),
                test_samples: test.len(),
                duration_ms: started.elapsed().as_millis() as u64,
                seed: request.seed,
                test_size: request.test_size,
                league: request.league.clone(),
                season: request.season.clone(),
                hyperparameters: request.hyperparameters.to_value(),
            },
            metrics,
            is_active: false,
            is_best: false,
        };

        Ok(ModelArtifact {
            meta,
            state: backend.to_bytes()?,
        })
    }

    /// Featurize every partition, each sample seeing only matches dated
    /// strictly before its own
    fn featurize(
        &self,
        matches: &[MatchRecord],
        indices: &SplitIndices,
        ctl: &FitControl,
    ) -> Result<(TrainingSet, TrainingSet, TrainingSet)> {
        let mut sets = [
            TrainingSet::default(),
            TrainingSet::default(),
            TrainingSet::default(),
        ];
        for (slot, rows) in [&indices.train, &indices.valid, &indices.test]
            .iter()
            .enumerate()
        {
            for &row in rows.iter() {
                let record = &matches[row];
                let ctx = FeatureContext::build(
                    matches,
                    record.home_team,
                    record.away_team,
                    record.date,
                );
                sets[slot].features.push(self.builder.build(record, &ctx));
                sets[slot]
                    .labels
                    .push(record.outcome().expect("settled matches have outcomes"));
                let (h, a) = (
                    record.home_score.unwrap_or(0) as f32,
                    record.away_score.unwrap_or(0) as f32,
                );
                sets[slot].goals.push((h, a));
            }
            ctl.check()?;
        }
        let [train, valid, test] = sets;
        Ok((train, valid, test))
    }
}
