//! Prediction service
//!
//! Loads a registry artifact, featurizes the target match from
//! strictly pre-match history and persists one prediction record per
//! inference. Batch prediction loads the artifact once and fans the
//! pure feature/inference work out across threads; one bad match never
//! fails the rest of the batch.

use rayon::prelude::*;

use crate::data::{PredictionRow, Store};
use crate::features::{FeatureBuilder, FeatureContext};
use crate::model::{load_backend, validate_simplex, ModelBackend};
use crate::registry::{ModelArtifact, ModelRegistry};
use crate::{FootyError, MatchId, MatchRecord, MatchStatus, Outcome, Result};

/// Outcome of one item in a batch request
pub struct BatchPrediction {
    pub match_id: MatchId,
    pub result: Result<PredictionRow>,
}

/// Serves single and batch predictions against registry artifacts
pub struct PredictionService {
    store: Store,
    registry: ModelRegistry,
    builder: FeatureBuilder,
}

impl PredictionService {
    pub fn new(store: Store, registry: ModelRegistry) -> Self {
        PredictionService {
            store,
            registry,
            builder: FeatureBuilder::new(),
        }
    }

    /// Resolve the artifact to serve: explicit version, or the active
    /// version when omitted
    fn resolve(&self, model_name: &str, version: Option<u32>) -> Result<ModelArtifact> {
        let version = match version {
            Some(v) => v,
            None => self
                .registry
                .active_version(model_name)?
                .ok_or_else(|| FootyError::ModelNotActive(model_name.to_string()))?,
        };
        self.registry.get(model_name, Some(version))
    }

    /// Predict a single match and persist the record
    pub fn predict(
        &self,
        match_id: MatchId,
        model_name: &str,
        version: Option<u32>,
    ) -> Result<PredictionRow> {
        let artifact = self.resolve(model_name, version)?;
        let backend = load_backend(artifact.meta.model_type, &artifact.state)?;
        let history = self.store.settled_matches(None, None)?;
        let record = self.store.get_match(match_id)?;

        let (predicted, score, probs, confidence) =
            self.infer(&record, &history, &artifact, backend.as_ref())?;
        self.store.insert_prediction(
            match_id,
            &artifact.meta.name,
            artifact.meta.version,
            predicted,
            score,
            probs,
            confidence,
        )
    }

    /// Predict many matches with one artifact load. Items fail
    /// individually; the batch itself only fails when the model
    /// reference is bad.
    pub fn predict_batch(
        &self,
        match_ids: &[MatchId],
        model_name: &str,
        version: Option<u32>,
    ) -> Result<Vec<BatchPrediction>> {
        let artifact = self.resolve(model_name, version)?;
        let backend = load_backend(artifact.meta.model_type, &artifact.state)?;
        let history = self.store.settled_matches(None, None)?;

        // Pure feature building and inference fan out; the store is
        // only touched again to append the surviving records
        let inferred: Vec<(MatchId, Result<Inference>)> = match_ids
            .par_iter()
            .map(|&id| {
                let result = self
                    .store
                    .get_match(id)
                    .and_then(|record| self.infer(&record, &history, &artifact, backend.as_ref()));
                (id, result)
            })
            .collect();

        let mut out = Vec::with_capacity(inferred.len());
        for (match_id, result) in inferred {
            let result = result.and_then(|(predicted, score, probs, confidence)| {
                self.store.insert_prediction(
                    match_id,
                    &artifact.meta.name,
                    artifact.meta.version,
                    predicted,
                    score,
                    probs,
                    confidence,
                )
            });
            if let Err(e) = &result {
                log::warn!("Batch prediction for {} failed: {}", match_id, e);
            }
            out.push(BatchPrediction { match_id, result });
        }
        Ok(out)
    }

    /// Per-feature importance for a model, `Unsupported` when the
    /// backend cannot provide it
    pub fn feature_importance(
        &self,
        model_name: &str,
        version: Option<u32>,
    ) -> Result<Vec<(String, f64)>> {
        let artifact = self.resolve(model_name, version)?;
        let backend = load_backend(artifact.meta.model_type, &artifact.state)?;
        let importance = backend.feature_importance().ok_or_else(|| {
            FootyError::Unsupported(format!(
                "{} backend has no feature importance",
                artifact.meta.model_type
            ))
        })?;
        Ok(artifact
            .meta
            .schema
            .columns
            .iter()
            .map(|c| c.name.clone())
            .zip(importance)
            .collect())
    }

    fn infer(
        &self,
        record: &MatchRecord,
        history: &[MatchRecord],
        artifact: &ModelArtifact,
        backend: &dyn ModelBackend,
    ) -> Result<Inference> {
        if record.status == MatchStatus::Cancelled {
            return Err(FootyError::InvalidRequest(format!(
                "{} is cancelled",
                record.id
            )));
        }

        let ctx = FeatureContext::build(history, record.home_team, record.away_team, record.date);
        let features =
            self.builder
                .build_for_schema(record, &ctx, artifact.meta.schema.version)?;

        let probs = backend.predict_proba(&features)?;
        validate_simplex(&probs)?;
        let predicted = Outcome::from_probs(&probs);
        let confidence = probs[predicted.index()];

        let score = match backend.predict_score(&features) {
            Some(result) => {
                let (home, away) = result?;
                Some((home.round().max(0.0) as u32, away.round().max(0.0) as u32))
            }
            None => None,
        };

        Ok((predicted, score, probs, confidence))
    }
}

type Inference = (Outcome, Option<(u32, u32)>, [f64; 3], f64);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Hyperparameters, ModelKind};
    use crate::training::pipeline::fixtures::league_fixture;
    use crate::training::{TrainingPipeline, TrainingRequest};
    use crate::{MatchOdds, MatchRecord, TeamId};
    use chrono::NaiveDate;

    struct Fixture {
        store: Store,
        registry: ModelRegistry,
        service: PredictionService,
    }

    fn fixture_with_model(kind: ModelKind) -> Fixture {
        let store = Store::in_memory().unwrap();
        store.upsert_matches(&league_fixture(120, 11)).unwrap();
        let registry = ModelRegistry::new(store.clone());

        let mut req = TrainingRequest::new("served", kind);
        req.hyperparameters = Hyperparameters::from_value(serde_json::json!({
            "n_estimators": 15,
            "max_iter": 150,
            "epochs": 30,
        }))
        .unwrap();
        let artifact = TrainingPipeline::new(store.clone(), 30)
            .run(&req, &crate::model::FitControl::unbounded())
            .unwrap();
        registry.put(artifact).unwrap();

        let service = PredictionService::new(store.clone(), registry.clone());
        Fixture {
            store,
            registry,
            service,
        }
    }

    fn upcoming(id: i64) -> MatchRecord {
        MatchRecord {
            id: MatchId(id),
            home_team: TeamId(2),
            away_team: TeamId(7),
            league: "Premier League".to_string(),
            season: "2025/26".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 4, 4).unwrap(),
            venue: None,
            referee: None,
            status: MatchStatus::Scheduled,
            home_score: None,
            away_score: None,
            odds: Some(MatchOdds {
                home: 1.8,
                draw: 3.5,
                away: 4.2,
            }),
        }
    }

    #[test]
    fn test_requires_active_or_explicit_version() {
        let f = fixture_with_model(ModelKind::Logistic);
        f.store.upsert_match(&upcoming(500)).unwrap();

        assert!(matches!(
            f.service.predict(MatchId(500), "served", None),
            Err(FootyError::ModelNotActive(_))
        ));

        // Explicit version works without activation
        let row = f.service.predict(MatchId(500), "served", Some(1)).unwrap();
        assert_eq!(row.model_version, 1);

        // Activation enables default resolution
        f.registry.activate("served", 1).unwrap();
        let row = f.service.predict(MatchId(500), "served", None).unwrap();
        assert_eq!(row.model_version, 1);
        validate_simplex(&row.probs).unwrap();
        assert!(row.actual.is_none() && row.is_correct.is_none());
    }

    #[test]
    fn test_unknown_model_is_not_found() {
        let f = fixture_with_model(ModelKind::Logistic);
        assert!(matches!(
            f.service.predict(MatchId(1), "ghost", Some(1)),
            Err(FootyError::NotFound(_))
        ));
    }

    #[test]
    fn test_confidence_is_max_probability() {
        let f = fixture_with_model(ModelKind::GradientBoosting);
        f.store.upsert_match(&upcoming(501)).unwrap();
        let row = f.service.predict(MatchId(501), "served", Some(1)).unwrap();
        let max = row.probs[0].max(row.probs[1]).max(row.probs[2]);
        assert_eq!(row.confidence, max);
        assert_eq!(row.predicted, Outcome::from_probs(&row.probs));
    }

    #[test]
    fn test_score_only_from_capable_backends() {
        let f = fixture_with_model(ModelKind::RandomForest);
        f.store.upsert_match(&upcoming(502)).unwrap();
        let row = f.service.predict(MatchId(502), "served", Some(1)).unwrap();
        assert!(row.predicted_score.is_none());

        let f = fixture_with_model(ModelKind::NeuralNet);
        f.store.upsert_match(&upcoming(503)).unwrap();
        let row = f.service.predict(MatchId(503), "served", Some(1)).unwrap();
        assert!(row.predicted_score.is_some());
    }

    #[test]
    fn test_batch_isolates_bad_items() {
        let f = fixture_with_model(ModelKind::Logistic);
        f.store.upsert_match(&upcoming(510)).unwrap();
        f.store.upsert_match(&upcoming(511)).unwrap();

        let ids = [MatchId(510), MatchId(999), MatchId(511)];
        let results = f.service.predict_batch(&ids, "served", Some(1)).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].result.is_ok());
        assert!(matches!(
            results[1].result,
            Err(FootyError::MatchNotFound(MatchId(999)))
        ));
        assert!(results[2].result.is_ok());

        // Both good predictions were persisted
        assert_eq!(f.store.predictions_for_match(MatchId(510)).unwrap().len(), 1);
        assert_eq!(f.store.predictions_for_match(MatchId(511)).unwrap().len(), 1);
        assert!(f.store.predictions_for_match(MatchId(999)).unwrap().is_empty());
    }

    #[test]
    fn test_batch_with_bad_model_fails_whole_call() {
        let f = fixture_with_model(ModelKind::Logistic);
        assert!(matches!(
            f.service.predict_batch(&[MatchId(1)], "served", None),
            Err(FootyError::ModelNotActive(_))
        ));
    }

    #[test]
    fn test_cancelled_match_is_item_error() {
        let f = fixture_with_model(ModelKind::Logistic);
        let mut record = upcoming(520);
        record.status = MatchStatus::Cancelled;
        f.store.upsert_match(&record).unwrap();

        let results = f
            .service
            .predict_batch(&[MatchId(520)], "served", Some(1))
            .unwrap();
        assert!(matches!(
            results[0].result,
            Err(FootyError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_feature_importance_capability() {
        let f = fixture_with_model(ModelKind::RandomForest);
        let importance = f.service.feature_importance("served", Some(1)).unwrap();
        assert_eq!(importance.len(), FeatureBuilder::new().schema().len());
        assert!(importance.iter().all(|(_, v)| *v >= 0.0));

        let f = fixture_with_model(ModelKind::NeuralNet);
        assert!(matches!(
            f.service.feature_importance("served", Some(1)),
            Err(FootyError::Unsupported(_))
        ));
    }
}
