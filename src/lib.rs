//! Football match outcome prediction
//!
//! Turns historical match results into trained, versioned prediction
//! models and serves calibrated home/draw/away probabilities.

pub mod data;
pub mod features;
pub mod model;
pub mod predict;
pub mod registry;
pub mod tracker;
pub mod training;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Unique identifier for a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchId(pub i64);

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Match({})", self.0)
    }
}

/// Unique identifier for a team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeamId(pub i64);

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Team({})", self.0)
    }
}

/// Lifecycle status of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Scheduled,
    InProgress,
    Finished,
    Cancelled,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "scheduled",
            MatchStatus::InProgress => "in_progress",
            MatchStatus::Finished => "finished",
            MatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(MatchStatus::Scheduled),
            "in_progress" => Some(MatchStatus::InProgress),
            "finished" => Some(MatchStatus::Finished),
            "cancelled" => Some(MatchStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Full-time result from the home team's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Home,
    Draw,
    Away,
}

impl Outcome {
    /// Class index used throughout: Home=0, Draw=1, Away=2
    pub fn index(&self) -> usize {
        match self {
            Outcome::Home => 0,
            Outcome::Draw => 1,
            Outcome::Away => 2,
        }
    }

    pub fn from_index(i: usize) -> Option<Self> {
        match i {
            0 => Some(Outcome::Home),
            1 => Some(Outcome::Draw),
            2 => Some(Outcome::Away),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Home => "H",
            Outcome::Draw => "D",
            Outcome::Away => "A",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "H" => Some(Outcome::Home),
            "D" => Some(Outcome::Draw),
            "A" => Some(Outcome::Away),
            _ => None,
        }
    }

    pub fn from_score(home: u32, away: u32) -> Self {
        match home.cmp(&away) {
            std::cmp::Ordering::Greater => Outcome::Home,
            std::cmp::Ordering::Equal => Outcome::Draw,
            std::cmp::Ordering::Less => Outcome::Away,
        }
    }

    /// Argmax over a probability triple [home, draw, away].
    ///
    /// Exact ties resolve Draw, then Home, then Away. This is a
    /// documented policy default, not an algorithmic necessity.
    pub fn from_probs(probs: &[f64; 3]) -> Self {
        let max = probs[0].max(probs[1]).max(probs[2]);
        if probs[1] >= max {
            Outcome::Draw
        } else if probs[0] >= max {
            Outcome::Home
        } else {
            Outcome::Away
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Pre-match decimal odds for the three outcomes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchOdds {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

impl MatchOdds {
    /// Implied probabilities with the bookmaker margin normalised out
    pub fn implied_probs(&self) -> Option<[f64; 3]> {
        if self.home <= 1.0 || self.draw <= 1.0 || self.away <= 1.0 {
            return None;
        }
        let raw = [1.0 / self.home, 1.0 / self.draw, 1.0 / self.away];
        let total: f64 = raw.iter().sum();
        Some([raw[0] / total, raw[1] / total, raw[2] / total])
    }
}

/// A single match record as consumed from the match-management service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub home_team: TeamId,
    pub away_team: TeamId,
    pub league: String,
    pub season: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub referee: Option<String>,
    pub status: MatchStatus,
    #[serde(default)]
    pub home_score: Option<u32>,
    #[serde(default)]
    pub away_score: Option<u32>,
    #[serde(default)]
    pub odds: Option<MatchOdds>,
}

impl MatchRecord {
    /// A match is settled once it is finished with a known score
    pub fn is_settled(&self) -> bool {
        self.status == MatchStatus::Finished
            && self.home_score.is_some()
            && self.away_score.is_some()
    }

    /// Full-time outcome for settled matches
    pub fn outcome(&self) -> Option<Outcome> {
        if self.status != MatchStatus::Finished {
            return None;
        }
        match (self.home_score, self.away_score) {
            (Some(h), Some(a)) => Some(Outcome::from_score(h, a)),
            _ => None,
        }
    }

    /// Check if the given team took part in this match
    pub fn involves(&self, team: TeamId) -> bool {
        self.home_team == team || self.away_team == team
    }

    /// Goals scored and conceded from a team's perspective
    pub fn goals_for_against(&self, team: TeamId) -> Option<(u32, u32)> {
        let (h, a) = (self.home_score?, self.away_score?);
        if team == self.home_team {
            Some((h, a))
        } else if team == self.away_team {
            Some((a, h))
        } else {
            None
        }
    }
}

/// Application-wide errors
#[derive(Debug, Error)]
pub enum FootyError {
    #[error("Feature schema mismatch: artifact has version {artifact}, builder has {current}")]
    SchemaMismatch { artifact: u32, current: u32 },

    #[error("Insufficient training data: {have} settled matches, need at least {need}")]
    InsufficientData { have: usize, need: usize },

    #[error("Training already in progress for model '{0}'")]
    TrainingInProgress(String),

    #[error("Training exceeded wall-clock budget of {budget_secs}s")]
    TrainingTimeout { budget_secs: u64 },

    #[error("Training cancelled")]
    TrainingCancelled,

    #[error("No active version for model '{0}' and none was specified")]
    ModelNotActive(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Version {version} of model '{name}' is active - pass force to delete it")]
    ActiveModelInUse { name: String, version: u32 },

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Invalid model output: {0}")]
    InvalidModelOutput(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Match not found: {0}")]
    MatchNotFound(MatchId),

    #[error("Match {0} has no settled result")]
    MatchNotSettled(MatchId),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, FootyError>;

/// Application configuration loaded from config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data: DataConfig,
    pub training: TrainingGuards,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub database_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingGuards {
    /// Minimum number of settled matches required to train
    pub min_samples: usize,
    /// Wall-clock budget for a single training run
    pub budget_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data: DataConfig {
                database_path: "data/footy.db".to_string(),
            },
            training: TrainingGuards {
                min_samples: 30,
                budget_secs: 600,
            },
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FootyError::Config(format!("Failed to read config file {}: {}", path, e))
        })?;
        toml::from_str(&content)
            .map_err(|e| FootyError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| FootyError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_score() {
        assert_eq!(Outcome::from_score(2, 1), Outcome::Home);
        assert_eq!(Outcome::from_score(1, 1), Outcome::Draw);
        assert_eq!(Outcome::from_score(0, 3), Outcome::Away);
    }

    #[test]
    fn test_outcome_tie_break_prefers_draw() {
        assert_eq!(Outcome::from_probs(&[0.4, 0.4, 0.2]), Outcome::Draw);
        assert_eq!(Outcome::from_probs(&[0.4, 0.2, 0.4]), Outcome::Home);
        let third = 1.0 / 3.0;
        assert_eq!(Outcome::from_probs(&[third, third, third]), Outcome::Draw);
        assert_eq!(Outcome::from_probs(&[0.2, 0.3, 0.5]), Outcome::Away);
    }

    #[test]
    fn test_implied_probs_normalised() {
        let odds = MatchOdds {
            home: 2.0,
            draw: 3.5,
            away: 4.0,
        };
        let probs = odds.implied_probs().unwrap();
        let total: f64 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!(probs[0] > probs[1] && probs[1] > probs[2]);
    }

    #[test]
    fn test_implied_probs_rejects_degenerate_odds() {
        let odds = MatchOdds {
            home: 1.0,
            draw: 3.0,
            away: 4.0,
        };
        assert!(odds.implied_probs().is_none());
    }
}
