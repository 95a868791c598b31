//! Pre-match context
//!
//! Rolling team aggregates and head-to-head history computed strictly
//! from matches dated before the target match, so training and
//! inference never see the future.

use crate::{MatchRecord, TeamId};
use chrono::NaiveDate;

/// Number of recent matches that make up the short-term form signal
const FORM_WINDOW: usize = 5;

/// Rest days are capped so long gaps (new season, promoted team) do not
/// dominate the feature
const MAX_REST_DAYS: i64 = 30;

/// Rolling aggregate statistics for a single team
#[derive(Debug, Clone, Default)]
pub struct TeamForm {
    pub matches_played: usize,
    pub wins: usize,
    pub draws: usize,
    pub losses: usize,
    pub goals_for: u32,
    pub goals_against: u32,
    /// Points from the most recent matches, newest last (win 3, draw 1)
    recent_points: Vec<u32>,
    pub last_match_date: Option<NaiveDate>,
}

impl TeamForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update with a settled match this team took part in
    pub fn update(&mut self, record: &MatchRecord, team: TeamId) {
        let Some((goals_for, goals_against)) = record.goals_for_against(team) else {
            return;
        };

        self.matches_played += 1;
        self.goals_for += goals_for;
        self.goals_against += goals_against;

        let points = match goals_for.cmp(&goals_against) {
            std::cmp::Ordering::Greater => {
                self.wins += 1;
                3
            }
            std::cmp::Ordering::Equal => {
                self.draws += 1;
                1
            }
            std::cmp::Ordering::Less => {
                self.losses += 1;
                0
            }
        };

        self.recent_points.push(points);
        if self.recent_points.len() > FORM_WINDOW {
            self.recent_points.remove(0);
        }
        self.last_match_date = Some(record.date);
    }

    /// Win ratio, neutral 0.5 before any match has been played
    pub fn win_ratio(&self) -> f64 {
        if self.matches_played == 0 {
            0.5
        } else {
            self.wins as f64 / self.matches_played as f64
        }
    }

    /// Draw ratio, neutral football base rate before any match
    pub fn draw_ratio(&self) -> f64 {
        if self.matches_played == 0 {
            0.25
        } else {
            self.draws as f64 / self.matches_played as f64
        }
    }

    pub fn goals_per_match(&self) -> f64 {
        if self.matches_played == 0 {
            0.0
        } else {
            self.goals_for as f64 / self.matches_played as f64
        }
    }

    pub fn goals_against_per_match(&self) -> f64 {
        if self.matches_played == 0 {
            0.0
        } else {
            self.goals_against as f64 / self.matches_played as f64
        }
    }

    pub fn goal_diff_avg(&self) -> f64 {
        self.goals_per_match() - self.goals_against_per_match()
    }

    /// Points share over the recent-form window (0-1), neutral 0.5
    pub fn form(&self) -> f64 {
        if self.recent_points.is_empty() {
            return 0.5;
        }
        let earned: u32 = self.recent_points.iter().sum();
        earned as f64 / (3 * self.recent_points.len()) as f64
    }

    /// Days since the last match as of the given date, capped
    pub fn rest_days(&self, as_of: NaiveDate) -> f64 {
        match self.last_match_date {
            Some(last) => ((as_of - last).num_days().max(0)).min(MAX_REST_DAYS) as f64,
            None => MAX_REST_DAYS as f64,
        }
    }
}

/// Head-to-head record between a specific home/away pairing
#[derive(Debug, Clone, Default)]
pub struct HeadToHead {
    pub meetings: usize,
    pub home_team_wins: usize,
    pub draws: usize,
    pub away_team_wins: usize,
    goal_delta_sum: i64,
}

impl HeadToHead {
    /// Update with a settled meeting; `home`/`away` are the teams of the
    /// upcoming match, regardless of which hosted the past meeting
    pub fn update(&mut self, record: &MatchRecord, home: TeamId, away: TeamId) {
        let Some((home_goals, _)) = record.goals_for_against(home) else {
            return;
        };
        if !record.involves(away) {
            return;
        }
        let Some((away_goals, _)) = record.goals_for_against(away) else {
            return;
        };

        self.meetings += 1;
        self.goal_delta_sum += home_goals as i64 - away_goals as i64;
        match home_goals.cmp(&away_goals) {
            std::cmp::Ordering::Greater => self.home_team_wins += 1,
            std::cmp::Ordering::Equal => self.draws += 1,
            std::cmp::Ordering::Less => self.away_team_wins += 1,
        }
    }

    pub fn home_win_ratio(&self) -> f64 {
        if self.meetings == 0 {
            0.5
        } else {
            self.home_team_wins as f64 / self.meetings as f64
        }
    }

    pub fn draw_ratio(&self) -> f64 {
        if self.meetings == 0 {
            0.25
        } else {
            self.draws as f64 / self.meetings as f64
        }
    }

    pub fn away_win_ratio(&self) -> f64 {
        if self.meetings == 0 {
            0.25
        } else {
            self.away_team_wins as f64 / self.meetings as f64
        }
    }

    pub fn goal_delta_avg(&self) -> f64 {
        if self.meetings == 0 {
            0.0
        } else {
            self.goal_delta_sum as f64 / self.meetings as f64
        }
    }
}

/// Everything the builder needs besides the match row itself
#[derive(Debug, Clone)]
pub struct FeatureContext {
    pub home: TeamForm,
    pub away: TeamForm,
    pub h2h: HeadToHead,
}

impl FeatureContext {
    /// Build context from settled history, using only matches dated
    /// strictly before the cutoff
    pub fn build(
        history: &[MatchRecord],
        home: TeamId,
        away: TeamId,
        cutoff: NaiveDate,
    ) -> Self {
        let mut home_form = TeamForm::new();
        let mut away_form = TeamForm::new();
        let mut h2h = HeadToHead::default();

        for record in history {
            if record.date >= cutoff || !record.is_settled() {
                continue;
            }
            if record.involves(home) {
                home_form.update(record, home);
            }
            if record.involves(away) {
                away_form.update(record, away);
            }
            if record.involves(home) && record.involves(away) {
                h2h.update(record, home, away);
            }
        }

        FeatureContext {
            home: home_form,
            away: away_form,
            h2h,
        }
    }
}
