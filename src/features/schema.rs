//! Versioned feature schema
//!
//! The schema (names, order, count) is stored with every trained
//! artifact so inference can refuse incompatible feature layouts.

use crate::{FootyError, Result};
use serde::{Deserialize, Serialize};

/// Current schema version; bump whenever the column list changes
pub const SCHEMA_VERSION: u32 = 1;

/// Reserved value for optional inputs that are absent (odds, rest days)
pub const MISSING_SENTINEL: f64 = -1.0;

/// Column list for schema version 1. The bool marks odds-derived
/// columns so models trained without odds can still be scored against
/// matches lacking them.
const COLUMNS_V1: &[(&str, bool)] = &[
    ("home_win_ratio", false),
    ("home_draw_ratio", false),
    ("away_win_ratio", false),
    ("away_draw_ratio", false),
    ("home_goals_per_match", false),
    ("home_goals_against_per_match", false),
    ("away_goals_per_match", false),
    ("away_goals_against_per_match", false),
    ("home_goal_diff_avg", false),
    ("away_goal_diff_avg", false),
    ("home_form_5", false),
    ("away_form_5", false),
    ("home_rest_days", false),
    ("away_rest_days", false),
    ("h2h_home_win_ratio", false),
    ("h2h_draw_ratio", false),
    ("h2h_away_win_ratio", false),
    ("h2h_goal_delta_avg", false),
    ("day_of_week", false),
    ("is_weekend", false),
    ("odds_implied_home", true),
    ("odds_implied_draw", true),
    ("odds_implied_away", true),
];

/// A single feature column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub odds_derived: bool,
}

/// Ordered, versioned feature layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub columns: Vec<FeatureColumn>,
}

impl FeatureSchema {
    /// The schema the current builder produces
    pub fn current() -> Self {
        FeatureSchema {
            version: SCHEMA_VERSION,
            columns: COLUMNS_V1
                .iter()
                .map(|(name, odds_derived)| FeatureColumn {
                    name: (*name).to_string(),
                    odds_derived: *odds_derived,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Fail with `SchemaMismatch` when an artifact's stored schema
    /// version differs from this builder's version
    pub fn ensure_compatible(&self, artifact_version: u32) -> Result<()> {
        if artifact_version != self.version {
            return Err(FootyError::SchemaMismatch {
                artifact: artifact_version,
                current: self.version,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_shape() {
        let schema = FeatureSchema::current();
        assert_eq!(schema.version, SCHEMA_VERSION);
        assert_eq!(schema.len(), COLUMNS_V1.len());
        // Exactly the three implied-probability columns are odds-derived
        let odds_cols: Vec<_> = schema
            .columns
            .iter()
            .filter(|c| c.odds_derived)
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(
            odds_cols,
            vec![
                "odds_implied_home",
                "odds_implied_draw",
                "odds_implied_away"
            ]
        );
    }

    #[test]
    fn test_ensure_compatible() {
        let schema = FeatureSchema::current();
        assert!(schema.ensure_compatible(SCHEMA_VERSION).is_ok());
        assert!(matches!(
            schema.ensure_compatible(SCHEMA_VERSION + 1),
            Err(crate::FootyError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_schema_serde_round_trip() {
        let schema = FeatureSchema::current();
        let json = serde_json::to_string(&schema).unwrap();
        let back: FeatureSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
    }
}
