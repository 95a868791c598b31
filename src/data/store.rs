//! SQLite store shared by the registry, prediction log and trackers
//!
//! Match rows are the read boundary to the external match-management
//! service; they are written here only by fixture import and result
//! settlement.

use crate::{
    FootyError, MatchId, MatchOdds, MatchRecord, MatchStatus, Outcome, Result, TeamId,
};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to the SQLite database
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open or create the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        // WAL keeps registry reads concurrent with writers
        let _mode: String =
            conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        let store = Store {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Store {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS matches (
                id INTEGER PRIMARY KEY,
                home_team_id INTEGER NOT NULL,
                away_team_id INTEGER NOT NULL,
                league TEXT NOT NULL,
                season TEXT NOT NULL,
                date TEXT NOT NULL,
                venue TEXT,
                referee TEXT,
                status TEXT NOT NULL,
                home_score INTEGER,
                away_score INTEGER,
                odds_home REAL,
                odds_draw REAL,
                odds_away REAL
            );

            CREATE TABLE IF NOT EXISTS artifacts (
                name TEXT NOT NULL,
                version INTEGER NOT NULL,
                model_type TEXT NOT NULL,
                schema_version INTEGER NOT NULL,
                schema_json TEXT NOT NULL,
                trained_at TEXT NOT NULL,
                info_json TEXT NOT NULL,
                metrics_json TEXT NOT NULL,
                accuracy REAL NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 0,
                state BLOB NOT NULL,
                PRIMARY KEY (name, version)
            );

            CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                match_id INTEGER NOT NULL,
                model_name TEXT NOT NULL,
                model_version INTEGER NOT NULL,
                predicted_outcome TEXT NOT NULL,
                predicted_home_score INTEGER,
                predicted_away_score INTEGER,
                p_home REAL NOT NULL,
                p_draw REAL NOT NULL,
                p_away REAL NOT NULL,
                confidence REAL NOT NULL,
                created_at TEXT NOT NULL,
                actual_outcome TEXT,
                actual_home_score INTEGER,
                actual_away_score INTEGER,
                is_correct INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_matches_date ON matches(date);
            CREATE INDEX IF NOT EXISTS idx_matches_filter ON matches(league, season, status);
            CREATE INDEX IF NOT EXISTS idx_artifacts_active ON artifacts(name, is_active);
            CREATE INDEX IF NOT EXISTS idx_predictions_match ON predictions(match_id);
            CREATE INDEX IF NOT EXISTS idx_predictions_model ON predictions(model_name, created_at);
            "#,
        )?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock only means another thread panicked mid-query;
        // the connection itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ==================== Match operations ====================

    /// Insert or replace a match row (fixture import, corrective edits)
    pub fn upsert_match(&self, record: &MatchRecord) -> Result<()> {
        let (odds_home, odds_draw, odds_away) = match record.odds {
            Some(o) => (Some(o.home), Some(o.draw), Some(o.away)),
            None => (None, None, None),
        };
        self.lock().execute(
            r#"
            INSERT OR REPLACE INTO matches
                (id, home_team_id, away_team_id, league, season, date, venue, referee,
                 status, home_score, away_score, odds_home, odds_draw, odds_away)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                record.id.0,
                record.home_team.0,
                record.away_team.0,
                record.league,
                record.season,
                record.date.format("%Y-%m-%d").to_string(),
                record.venue,
                record.referee,
                record.status.as_str(),
                record.home_score,
                record.away_score,
                odds_home,
                odds_draw,
                odds_away,
            ],
        )?;
        Ok(())
    }

    /// Insert multiple match rows
    pub fn upsert_matches(&self, records: &[MatchRecord]) -> Result<usize> {
        for record in records {
            self.upsert_match(record)?;
        }
        Ok(records.len())
    }

    /// Get a match by id
    pub fn get_match(&self, id: MatchId) -> Result<MatchRecord> {
        self.lock()
            .query_row(
                &format!("SELECT {} FROM matches WHERE id = ?1", MATCH_COLUMNS),
                params![id.0],
                row_to_match,
            )
            .optional()?
            .ok_or(FootyError::MatchNotFound(id))
    }

    /// All settled matches, optionally filtered, in (date, id) order
    pub fn settled_matches(
        &self,
        league: Option<&str>,
        season: Option<&str>,
    ) -> Result<Vec<MatchRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM matches
            WHERE status = 'finished'
              AND home_score IS NOT NULL AND away_score IS NOT NULL
              AND (?1 IS NULL OR league = ?1)
              AND (?2 IS NULL OR season = ?2)
            ORDER BY date, id
            "#,
            MATCH_COLUMNS
        ))?;
        let matches = stmt
            .query_map(params![league, season], row_to_match)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(matches)
    }

    /// Record a final score and mark the match finished
    pub fn set_result(&self, id: MatchId, home_score: u32, away_score: u32) -> Result<()> {
        let updated = self.lock().execute(
            "UPDATE matches SET status = 'finished', home_score = ?2, away_score = ?3 WHERE id = ?1",
            params![id.0, home_score, away_score],
        )?;
        if updated == 0 {
            return Err(FootyError::MatchNotFound(id));
        }
        Ok(())
    }

    // ==================== Prediction log ====================

    /// Append a prediction record; settlement fields start out null
    #[allow(clippy::too_many_arguments)]
    pub fn insert_prediction(
        &self,
        match_id: MatchId,
        model_name: &str,
        model_version: u32,
        predicted: Outcome,
        predicted_score: Option<(u32, u32)>,
        probs: [f64; 3],
        confidence: f64,
    ) -> Result<PredictionRow> {
        let created_at = Utc::now();
        let (ph, pa) = match predicted_score {
            Some((h, a)) => (Some(h), Some(a)),
            None => (None, None),
        };
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO predictions
                (match_id, model_name, model_version, predicted_outcome,
                 predicted_home_score, predicted_away_score,
                 p_home, p_draw, p_away, confidence, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                match_id.0,
                model_name,
                model_version,
                predicted.label(),
                ph,
                pa,
                probs[0],
                probs[1],
                probs[2],
                confidence,
                format_ts(created_at),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(PredictionRow {
            id,
            match_id,
            model_name: model_name.to_string(),
            model_version,
            predicted,
            predicted_score,
            probs,
            confidence,
            created_at,
            actual: None,
            actual_score: None,
            is_correct: None,
        })
    }

    /// Get a prediction record by id
    pub fn get_prediction(&self, id: i64) -> Result<PredictionRow> {
        self.lock()
            .query_row(
                &format!("SELECT {} FROM predictions WHERE id = ?1", PREDICTION_COLUMNS),
                params![id],
                row_to_prediction,
            )
            .optional()?
            .ok_or_else(|| FootyError::NotFound(format!("prediction {}", id)))
    }

    /// All predictions referencing a match
    pub fn predictions_for_match(&self, match_id: MatchId) -> Result<Vec<PredictionRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM predictions WHERE match_id = ?1 ORDER BY id",
            PREDICTION_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![match_id.0], row_to_prediction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ==================== Statistics ====================

    /// Row counts for status output
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock();
        let match_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM matches", [], |row| row.get(0))?;
        let settled_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM matches WHERE status = 'finished'",
            [],
            |row| row.get(0),
        )?;
        let artifact_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM artifacts", [], |row| row.get(0))?;
        let prediction_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM predictions", [], |row| row.get(0))?;
        Ok(StoreStats {
            match_count: match_count as usize,
            settled_count: settled_count as usize,
            artifact_count: artifact_count as usize,
            prediction_count: prediction_count as usize,
        })
    }
}

/// One row of the prediction log
#[derive(Debug, Clone)]
pub struct PredictionRow {
    pub id: i64,
    pub match_id: MatchId,
    pub model_name: String,
    pub model_version: u32,
    pub predicted: Outcome,
    pub predicted_score: Option<(u32, u32)>,
    /// [p_home, p_draw, p_away]
    pub probs: [f64; 3],
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub actual: Option<Outcome>,
    pub actual_score: Option<(u32, u32)>,
    pub is_correct: Option<bool>,
}

/// Row counts for status output
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub match_count: usize,
    pub settled_count: usize,
    pub artifact_count: usize,
    pub prediction_count: usize,
}

const MATCH_COLUMNS: &str = "id, home_team_id, away_team_id, league, season, date, venue, \
     referee, status, home_score, away_score, odds_home, odds_draw, odds_away";

const PREDICTION_COLUMNS: &str = "id, match_id, model_name, model_version, predicted_outcome, \
     predicted_home_score, predicted_away_score, p_home, p_draw, p_away, confidence, \
     created_at, actual_outcome, actual_home_score, actual_away_score, is_correct";

/// Fixed-width UTC timestamp so string comparison matches time order
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn row_to_match(row: &rusqlite::Row) -> rusqlite::Result<MatchRecord> {
    let date_str: String = row.get(5)?;
    let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?;
    let status_str: String = row.get(8)?;
    let status = MatchStatus::parse(&status_str).unwrap_or(MatchStatus::Scheduled);

    let odds_home: Option<f64> = row.get(11)?;
    let odds_draw: Option<f64> = row.get(12)?;
    let odds_away: Option<f64> = row.get(13)?;
    let odds = match (odds_home, odds_draw, odds_away) {
        (Some(home), Some(draw), Some(away)) => Some(MatchOdds { home, draw, away }),
        _ => None,
    };

    Ok(MatchRecord {
        id: MatchId(row.get(0)?),
        home_team: TeamId(row.get(1)?),
        away_team: TeamId(row.get(2)?),
        league: row.get(3)?,
        season: row.get(4)?,
        date,
        venue: row.get(6)?,
        referee: row.get(7)?,
        status,
        home_score: row.get(9)?,
        away_score: row.get(10)?,
        odds,
    })
}

fn row_to_prediction(row: &rusqlite::Row) -> rusqlite::Result<PredictionRow> {
    let predicted_str: String = row.get(4)?;
    let predicted = Outcome::from_label(&predicted_str).unwrap_or(Outcome::Draw);
    let ph: Option<u32> = row.get(5)?;
    let pa: Option<u32> = row.get(6)?;
    let created_str: String = row.get(11)?;
    let created_at = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let actual_str: Option<String> = row.get(12)?;
    let ah: Option<u32> = row.get(13)?;
    let aa: Option<u32> = row.get(14)?;
    let is_correct: Option<bool> = row.get(15)?;

    Ok(PredictionRow {
        id: row.get(0)?,
        match_id: MatchId(row.get(1)?),
        model_name: row.get(2)?,
        model_version: row.get(3)?,
        predicted,
        predicted_score: ph.zip(pa),
        probs: [row.get(7)?, row.get(8)?, row.get(9)?],
        confidence: row.get(10)?,
        created_at,
        actual: actual_str.as_deref().and_then(Outcome::from_label),
        actual_score: ah.zip(aa),
        is_correct,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_match(id: i64, status: MatchStatus, score: Option<(u32, u32)>) -> MatchRecord {
        MatchRecord {
            id: MatchId(id),
            home_team: TeamId(1),
            away_team: TeamId(2),
            league: "Premier League".to_string(),
            season: "2025/26".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            venue: None,
            referee: None,
            status,
            home_score: score.map(|s| s.0),
            away_score: score.map(|s| s.1),
            odds: Some(MatchOdds {
                home: 1.9,
                draw: 3.4,
                away: 4.1,
            }),
        }
    }

    #[test]
    fn test_match_round_trip() {
        let store = Store::in_memory().unwrap();
        let record = make_match(7, MatchStatus::Finished, Some((2, 1)));
        store.upsert_match(&record).unwrap();

        let loaded = store.get_match(MatchId(7)).unwrap();
        assert_eq!(loaded.home_team, record.home_team);
        assert_eq!(loaded.status, MatchStatus::Finished);
        assert_eq!(loaded.outcome(), Some(Outcome::Home));
        assert_eq!(loaded.odds.unwrap().draw, 3.4);
    }

    #[test]
    fn test_settled_filter_excludes_scheduled() {
        let store = Store::in_memory().unwrap();
        store
            .upsert_match(&make_match(1, MatchStatus::Finished, Some((0, 0))))
            .unwrap();
        store
            .upsert_match(&make_match(2, MatchStatus::Scheduled, None))
            .unwrap();

        let settled = store.settled_matches(None, None).unwrap();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].id, MatchId(1));

        let filtered = store
            .settled_matches(Some("Bundesliga"), None)
            .unwrap();
        assert!(filtered.is_empty());
    }

    #[test]
    fn test_set_result_settles_match() {
        let store = Store::in_memory().unwrap();
        store
            .upsert_match(&make_match(3, MatchStatus::Scheduled, None))
            .unwrap();
        store.set_result(MatchId(3), 1, 3).unwrap();

        let loaded = store.get_match(MatchId(3)).unwrap();
        assert!(loaded.is_settled());
        assert_eq!(loaded.outcome(), Some(Outcome::Away));

        assert!(matches!(
            store.set_result(MatchId(99), 1, 0),
            Err(FootyError::MatchNotFound(_))
        ));
    }

    #[test]
    fn test_prediction_round_trip() {
        let store = Store::in_memory().unwrap();
        let row = store
            .insert_prediction(
                MatchId(5),
                "lr_baseline",
                1,
                Outcome::Home,
                Some((2, 0)),
                [0.5, 0.3, 0.2],
                0.5,
            )
            .unwrap();

        let loaded = store.get_prediction(row.id).unwrap();
        assert_eq!(loaded.predicted, Outcome::Home);
        assert_eq!(loaded.predicted_score, Some((2, 0)));
        assert_eq!(loaded.probs, [0.5, 0.3, 0.2]);
        assert!(loaded.actual.is_none());
        assert!(loaded.is_correct.is_none());
    }
}
