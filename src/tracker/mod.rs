//! Accuracy tracking
//!
//! Sole owner of the settlement-time mutation of prediction records.
//! When a match finishes, every unresolved prediction referencing it
//! gets its actual outcome and correctness flag exactly once; rolling
//! accuracy is aggregated over resolved records only.

use chrono::{Duration, Utc};
use rusqlite::params;

use crate::data::store::format_ts;
use crate::data::Store;
use crate::{FootyError, MatchId, Result};

/// Aggregated accuracy over resolved predictions
#[derive(Debug, Clone, PartialEq)]
pub struct AccuracyReport {
    pub total: usize,
    pub correct: usize,
    pub accuracy: f64,
    /// Trailing window in days, unbounded when absent
    pub window_days: Option<u32>,
}

/// Reconciles stored predictions with settled results
#[derive(Clone)]
pub struct AccuracyTracker {
    store: Store,
}

impl AccuracyTracker {
    pub fn new(store: Store) -> Self {
        AccuracyTracker { store }
    }

    /// Resolve every open prediction for a finished match. Returns the
    /// number of records updated; already-resolved records are left
    /// untouched.
    pub fn settle_match(&self, match_id: MatchId) -> Result<usize> {
        let record = self.store.get_match(match_id)?;
        if !record.is_settled() {
            return Err(FootyError::MatchNotSettled(match_id));
        }
        let outcome = record
            .outcome()
            .ok_or(FootyError::MatchNotSettled(match_id))?;
        let (home_score, away_score) = (
            record.home_score.unwrap_or(0),
            record.away_score.unwrap_or(0),
        );

        let updated = self.store.lock().execute(
            r#"
            UPDATE predictions
            SET actual_outcome = ?2,
                actual_home_score = ?3,
                actual_away_score = ?4,
                is_correct = CASE WHEN predicted_outcome = ?2 THEN 1 ELSE 0 END
            WHERE match_id = ?1 AND actual_outcome IS NULL
            "#,
            params![match_id.0, outcome.label(), home_score, away_score],
        )?;

        if updated > 0 {
            log::info!(
                "Settled {} prediction(s) for {} ({} {} - {})",
                updated,
                match_id,
                outcome,
                home_score,
                away_score
            );
        }
        Ok(updated)
    }

    /// Rolling accuracy over resolved predictions, optionally filtered
    /// by model name and a trailing day window. Unresolved predictions
    /// never enter the denominator.
    pub fn accuracy(
        &self,
        model_name: Option<&str>,
        window_days: Option<u32>,
    ) -> Result<AccuracyReport> {
        let cutoff = window_days.map(|days| format_ts(Utc::now() - Duration::days(days as i64)));

        let (total, correct): (i64, i64) = self.store.lock().query_row(
            r#"
            SELECT COUNT(*), COALESCE(SUM(is_correct), 0)
            FROM predictions
            WHERE is_correct IS NOT NULL
              AND (?1 IS NULL OR model_name = ?1)
              AND (?2 IS NULL OR created_at >= ?2)
            "#,
            params![model_name, cutoff],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(AccuracyReport {
            total: total as usize,
            correct: correct as usize,
            accuracy: if total > 0 {
                correct as f64 / total as f64
            } else {
                0.0
            },
            window_days,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MatchRecord, MatchStatus, Outcome, TeamId};
    use chrono::NaiveDate;

    fn scheduled(id: i64) -> MatchRecord {
        MatchRecord {
            id: MatchId(id),
            home_team: TeamId(1),
            away_team: TeamId(2),
            league: "L".to_string(),
            season: "S".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
            venue: None,
            referee: None,
            status: MatchStatus::Scheduled,
            home_score: None,
            away_score: None,
            odds: None,
        }
    }

    fn predict(store: &Store, match_id: i64, model: &str, outcome: Outcome) -> i64 {
        store
            .insert_prediction(
                MatchId(match_id),
                model,
                1,
                outcome,
                None,
                [0.5, 0.3, 0.2],
                0.5,
            )
            .unwrap()
            .id
    }

    #[test]
    fn test_settlement_sets_correctness_once() {
        let store = Store::in_memory().unwrap();
        let tracker = AccuracyTracker::new(store.clone());
        store.upsert_match(&scheduled(1)).unwrap();
        let hit = predict(&store, 1, "m", Outcome::Home);
        let miss = predict(&store, 1, "m", Outcome::Away);

        // Scheduled match: nothing to settle yet
        assert!(matches!(
            tracker.settle_match(MatchId(1)),
            Err(FootyError::MatchNotSettled(_))
        ));
        assert!(store.get_prediction(hit).unwrap().is_correct.is_none());

        // Home 2 - 1 away: predicted "H" is correct
        store.set_result(MatchId(1), 2, 1).unwrap();
        assert_eq!(tracker.settle_match(MatchId(1)).unwrap(), 2);

        let hit_row = store.get_prediction(hit).unwrap();
        assert_eq!(hit_row.actual, Some(Outcome::Home));
        assert_eq!(hit_row.actual_score, Some((2, 1)));
        assert_eq!(hit_row.is_correct, Some(true));
        assert_eq!(store.get_prediction(miss).unwrap().is_correct, Some(false));

        // Second settlement is a no-op
        assert_eq!(tracker.settle_match(MatchId(1)).unwrap(), 0);
    }

    #[test]
    fn test_accuracy_excludes_unresolved() {
        let store = Store::in_memory().unwrap();
        let tracker = AccuracyTracker::new(store.clone());
        store.upsert_match(&scheduled(1)).unwrap();
        store.upsert_match(&scheduled(2)).unwrap();

        predict(&store, 1, "m", Outcome::Home);
        predict(&store, 1, "m", Outcome::Draw);
        predict(&store, 2, "m", Outcome::Away); // stays unresolved

        store.set_result(MatchId(1), 3, 0).unwrap();
        tracker.settle_match(MatchId(1)).unwrap();

        let report = tracker.accuracy(Some("m"), None).unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.correct, 1);
        assert_eq!(report.accuracy, 0.5);
    }

    #[test]
    fn test_accuracy_filters_by_model() {
        let store = Store::in_memory().unwrap();
        let tracker = AccuracyTracker::new(store.clone());
        store.upsert_match(&scheduled(1)).unwrap();
        predict(&store, 1, "alpha", Outcome::Home);
        predict(&store, 1, "beta", Outcome::Away);
        store.set_result(MatchId(1), 1, 0).unwrap();
        tracker.settle_match(MatchId(1)).unwrap();

        assert_eq!(tracker.accuracy(Some("alpha"), None).unwrap().accuracy, 1.0);
        assert_eq!(tracker.accuracy(Some("beta"), None).unwrap().accuracy, 0.0);
        assert_eq!(tracker.accuracy(None, None).unwrap().total, 2);
        assert_eq!(tracker.accuracy(Some("ghost"), None).unwrap().total, 0);
    }

    #[test]
    fn test_full_cycle_train_predict_settle() {
        use crate::model::{Hyperparameters, ModelKind};
        use crate::predict::PredictionService;
        use crate::registry::ModelRegistry;
        use crate::training::pipeline::fixtures::league_fixture;
        use crate::training::{TrainingPipeline, TrainingRequest};

        let store = Store::in_memory().unwrap();
        store.upsert_matches(&league_fixture(100, 11)).unwrap();
        let registry = ModelRegistry::new(store.clone());

        let mut req = TrainingRequest::new("cycle", ModelKind::Logistic);
        req.hyperparameters =
            Hyperparameters::from_value(serde_json::json!({ "max_iter": 150 })).unwrap();
        let artifact = TrainingPipeline::new(store.clone(), 30)
            .run(&req, &crate::model::FitControl::unbounded())
            .unwrap();
        let meta = registry.put(artifact).unwrap();
        registry.activate(&meta.name, meta.version).unwrap();

        let mut upcoming = scheduled(900);
        upcoming.home_team = TeamId(1);
        upcoming.away_team = TeamId(8);
        store.upsert_match(&upcoming).unwrap();

        let service = PredictionService::new(store.clone(), registry);
        let row = service.predict(MatchId(900), "cycle", None).unwrap();
        assert!(row.is_correct.is_none());

        // Home 2 - 0: prediction correct iff it said home win
        store.set_result(MatchId(900), 2, 0).unwrap();
        let tracker = AccuracyTracker::new(store.clone());
        assert_eq!(tracker.settle_match(MatchId(900)).unwrap(), 1);

        let settled = store.get_prediction(row.id).unwrap();
        assert_eq!(settled.actual, Some(Outcome::Home));
        assert_eq!(
            settled.is_correct,
            Some(settled.predicted == Outcome::Home)
        );

        let report = tracker.accuracy(Some("cycle"), Some(30)).unwrap();
        assert_eq!(report.total, 1);
    }

    #[test]
    fn test_accuracy_window_excludes_old_records() {
        let store = Store::in_memory().unwrap();
        let tracker = AccuracyTracker::new(store.clone());
        store.upsert_match(&scheduled(1)).unwrap();
        let old = predict(&store, 1, "m", Outcome::Home);
        predict(&store, 1, "m", Outcome::Home);

        // Backdate one record beyond the window
        let backdated = format_ts(Utc::now() - Duration::days(45));
        store
            .lock()
            .execute(
                "UPDATE predictions SET created_at = ?1 WHERE id = ?2",
                params![backdated, old],
            )
            .unwrap();

        store.set_result(MatchId(1), 2, 0).unwrap();
        tracker.settle_match(MatchId(1)).unwrap();

        assert_eq!(tracker.accuracy(None, None).unwrap().total, 2);
        let windowed = tracker.accuracy(None, Some(30)).unwrap();
        assert_eq!(windowed.total, 1);
        assert_eq!(windowed.window_days, Some(30));
    }
}
