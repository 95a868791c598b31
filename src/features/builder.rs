//! Feature vector construction
//!
//! `build` is pure: the same match and context always produce the same
//! vector, with no hidden global state.

use chrono::Datelike;

use crate::features::context::FeatureContext;
use crate::features::schema::{FeatureSchema, MISSING_SENTINEL};
use crate::{MatchRecord, Result};

/// Builds fixed-length feature vectors under the current schema
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    schema: FeatureSchema,
}

impl FeatureBuilder {
    pub fn new() -> Self {
        FeatureBuilder {
            schema: FeatureSchema::current(),
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Featurize a match for a model trained under the given schema
    /// version; fails with `SchemaMismatch` on drift
    pub fn build_for_schema(
        &self,
        record: &MatchRecord,
        ctx: &FeatureContext,
        artifact_schema_version: u32,
    ) -> Result<Vec<f64>> {
        self.schema.ensure_compatible(artifact_schema_version)?;
        Ok(self.build(record, ctx))
    }

    /// Convert a match plus pre-match context into a feature vector.
    ///
    /// Missing optional inputs are encoded with the reserved sentinel,
    /// never dropped, so the vector length always equals the schema.
    pub fn build(&self, record: &MatchRecord, ctx: &FeatureContext) -> Vec<f64> {
        let odds = record.odds.and_then(|o| o.implied_probs());
        let (odds_home, odds_draw, odds_away) = match odds {
            Some([h, d, a]) => (h, d, a),
            None => (MISSING_SENTINEL, MISSING_SENTINEL, MISSING_SENTINEL),
        };

        let weekday = record.date.weekday().num_days_from_monday() as f64;
        let is_weekend = if weekday >= 5.0 { 1.0 } else { 0.0 };

        let values = vec![
            ctx.home.win_ratio(),
            ctx.home.draw_ratio(),
            ctx.away.win_ratio(),
            ctx.away.draw_ratio(),
            ctx.home.goals_per_match(),
            ctx.home.goals_against_per_match(),
            ctx.away.goals_per_match(),
            ctx.away.goals_against_per_match(),
            ctx.home.goal_diff_avg(),
            ctx.away.goal_diff_avg(),
            ctx.home.form(),
            ctx.away.form(),
            ctx.home.rest_days(record.date),
            ctx.away.rest_days(record.date),
            ctx.h2h.home_win_ratio(),
            ctx.h2h.draw_ratio(),
            ctx.h2h.away_win_ratio(),
            ctx.h2h.goal_delta_avg(),
            weekday,
            is_weekend,
            odds_home,
            odds_draw,
            odds_away,
        ];

        debug_assert_eq!(values.len(), self.schema.len());
        values
    }
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::schema::SCHEMA_VERSION;
    use crate::{MatchId, MatchOdds, MatchStatus, TeamId};
    use chrono::NaiveDate;

    fn scheduled_match(odds: Option<MatchOdds>) -> MatchRecord {
        MatchRecord {
            id: MatchId(100),
            home_team: TeamId(1),
            away_team: TeamId(2),
            league: "L".to_string(),
            season: "S".to_string(),
            // 2026-03-07 is a Saturday
            date: NaiveDate::from_ymd_opt(2026, 3, 7).unwrap(),
            venue: None,
            referee: None,
            status: MatchStatus::Scheduled,
            home_score: None,
            away_score: None,
            odds,
        }
    }

    fn empty_ctx() -> FeatureContext {
        FeatureContext::build(&[], TeamId(1), TeamId(2), NaiveDate::from_ymd_opt(2026, 3, 7).unwrap())
    }

    #[test]
    fn test_vector_matches_schema_length() {
        let builder = FeatureBuilder::new();
        let vec = builder.build(&scheduled_match(None), &empty_ctx());
        assert_eq!(vec.len(), builder.schema().len());
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = FeatureBuilder::new();
        let record = scheduled_match(Some(MatchOdds {
            home: 2.1,
            draw: 3.3,
            away: 3.6,
        }));
        let ctx = empty_ctx();
        assert_eq!(builder.build(&record, &ctx), builder.build(&record, &ctx));
    }

    #[test]
    fn test_missing_odds_use_sentinel() {
        let builder = FeatureBuilder::new();
        let vec = builder.build(&scheduled_match(None), &empty_ctx());
        let n = vec.len();
        assert_eq!(&vec[n - 3..], &[MISSING_SENTINEL; 3]);

        let with_odds = builder.build(
            &scheduled_match(Some(MatchOdds {
                home: 2.0,
                draw: 3.0,
                away: 5.0,
            })),
            &empty_ctx(),
        );
        assert!(with_odds[n - 3..].iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_weekend_flag() {
        let builder = FeatureBuilder::new();
        let vec = builder.build(&scheduled_match(None), &empty_ctx());
        // Saturday: weekday index 5, weekend flag set
        assert_eq!(vec[18], 5.0);
        assert_eq!(vec[19], 1.0);
    }

    #[test]
    fn test_schema_version_guard() {
        let builder = FeatureBuilder::new();
        let record = scheduled_match(None);
        let ctx = empty_ctx();
        assert!(builder
            .build_for_schema(&record, &ctx, SCHEMA_VERSION)
            .is_ok());
        assert!(matches!(
            builder.build_for_schema(&record, &ctx, SCHEMA_VERSION + 3),
            Err(crate::FootyError::SchemaMismatch { .. })
        ));
    }
}
