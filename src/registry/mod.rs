//! Versioned model registry
//!
//! Exclusive owner of artifact storage and the active flag. Versions
//! are monotonic per name, artifacts are immutable once persisted and
//! at most one version per name is active at any instant. Metadata
//! queries never touch the serialized model state.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::data::store::format_ts;
use crate::data::Store;
use crate::features::FeatureSchema;
use crate::model::ModelKind;
use crate::training::metrics::EvaluationMetrics;
use crate::{FootyError, Result};

/// Metadata captured by the training pipeline for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingInfo {
    pub train_samples: usize,
    pub validation_samples: usize,
    pub test_samples: usize,
    pub duration_ms: u64,
    pub seed: u64,
    pub test_size: f64,
    pub league: Option<String>,
    pub season: Option<String>,
    pub hyperparameters: serde_json::Value,
}

/// Artifact metadata; everything except the serialized model state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub name: String,
    pub version: u32,
    pub model_type: ModelKind,
    pub schema: FeatureSchema,
    pub trained_at: DateTime<Utc>,
    pub info: TrainingInfo,
    pub metrics: EvaluationMetrics,
    pub is_active: bool,
    /// Derived in `list` by comparing test accuracy across the latest
    /// version of every name; never stored
    pub is_best: bool,
}

/// A persisted, versioned training output
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub meta: ArtifactMeta,
    pub state: Vec<u8>,
}

/// SQLite-backed registry over the shared store
#[derive(Clone)]
pub struct ModelRegistry {
    store: Store,
}

impl ModelRegistry {
    pub fn new(store: Store) -> Self {
        ModelRegistry { store }
    }

    /// Persist a new version for the artifact's name and return the
    /// assigned metadata. Artifacts always start inactive.
    pub fn put(&self, artifact: ModelArtifact) -> Result<ArtifactMeta> {
        let conn = self.store.lock();
        let tx = conn.unchecked_transaction()?;

        let version: u32 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM artifacts WHERE name = ?1",
            params![artifact.meta.name],
            |row| row.get(0),
        )?;

        let mut meta = artifact.meta;
        meta.version = version;
        meta.is_active = false;
        meta.is_best = false;

        tx.execute(
            r#"
            INSERT INTO artifacts
                (name, version, model_type, schema_version, schema_json, trained_at,
                 info_json, metrics_json, accuracy, is_active, state)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10)
            "#,
            params![
                meta.name,
                meta.version,
                meta.model_type.as_str(),
                meta.schema.version,
                serde_json::to_string(&meta.schema)?,
                format_ts(meta.trained_at),
                serde_json::to_string(&meta.info)?,
                serde_json::to_string(&meta.metrics)?,
                meta.metrics.accuracy,
                artifact.state,
            ],
        )?;
        tx.commit()?;

        log::info!(
            "Stored artifact {} v{} ({}, test accuracy {:.3})",
            meta.name,
            meta.version,
            meta.model_type,
            meta.metrics.accuracy
        );
        Ok(meta)
    }

    /// Fetch one artifact, latest version when none is given
    pub fn get(&self, name: &str, version: Option<u32>) -> Result<ModelArtifact> {
        let conn = self.store.lock();
        let row = match version {
            Some(v) => conn
                .query_row(
                    &format!(
                        "SELECT {}, state FROM artifacts WHERE name = ?1 AND version = ?2",
                        META_COLUMNS
                    ),
                    params![name, v],
                    row_to_artifact,
                )
                .optional()?,
            None => conn
                .query_row(
                    &format!(
                        "SELECT {}, state FROM artifacts WHERE name = ?1 \
                         ORDER BY version DESC LIMIT 1",
                        META_COLUMNS
                    ),
                    params![name],
                    row_to_artifact,
                )
                .optional()?,
        };
        row.ok_or_else(|| FootyError::NotFound(describe(name, version)))
    }

    /// The currently active version for a name, if any
    pub fn active_version(&self, name: &str) -> Result<Option<u32>> {
        Ok(self
            .store
            .lock()
            .query_row(
                "SELECT version FROM artifacts WHERE name = ?1 AND is_active = 1",
                params![name],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Activate one version and deactivate every sibling atomically
    pub fn activate(&self, name: &str, version: u32) -> Result<()> {
        let conn = self.store.lock();
        let tx = conn.unchecked_transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM artifacts WHERE name = ?1 AND version = ?2",
                params![name, version],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(FootyError::NotFound(describe(name, Some(version))));
        }

        tx.execute(
            "UPDATE artifacts SET is_active = 0 WHERE name = ?1",
            params![name],
        )?;
        tx.execute(
            "UPDATE artifacts SET is_active = 1 WHERE name = ?1 AND version = ?2",
            params![name, version],
        )?;
        tx.commit()?;

        log::info!("Activated {} v{}", name, version);
        Ok(())
    }

    /// Delete one version, or every version of a name when no version
    /// is given. Removing the active version requires `force`.
    pub fn delete(&self, name: &str, version: Option<u32>, force: bool) -> Result<usize> {
        let conn = self.store.lock();
        let tx = conn.unchecked_transaction()?;

        let active: Option<u32> = tx
            .query_row(
                "SELECT version FROM artifacts WHERE name = ?1 AND is_active = 1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        let removed = match version {
            Some(v) => {
                let exists: Option<i64> = tx
                    .query_row(
                        "SELECT 1 FROM artifacts WHERE name = ?1 AND version = ?2",
                        params![name, v],
                        |row| row.get(0),
                    )
                    .optional()?;
                if exists.is_none() {
                    return Err(FootyError::NotFound(describe(name, Some(v))));
                }
                if active == Some(v) && !force {
                    return Err(FootyError::ActiveModelInUse {
                        name: name.to_string(),
                        version: v,
                    });
                }
                tx.execute(
                    "DELETE FROM artifacts WHERE name = ?1 AND version = ?2",
                    params![name, v],
                )?
            }
            None => {
                if let Some(v) = active {
                    if !force {
                        return Err(FootyError::ActiveModelInUse {
                            name: name.to_string(),
                            version: v,
                        });
                    }
                }
                let removed = tx.execute("DELETE FROM artifacts WHERE name = ?1", params![name])?;
                if removed == 0 {
                    return Err(FootyError::NotFound(describe(name, None)));
                }
                removed
            }
        };
        tx.commit()?;

        log::info!("Deleted {} artifact row(s) for {}", removed, name);
        Ok(removed)
    }

    /// All artifact metadata with `is_best` derived across the latest
    /// version of every name. Never deserializes model state.
    pub fn list(&self) -> Result<Vec<ArtifactMeta>> {
        let conn = self.store.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM artifacts ORDER BY name, version",
            META_COLUMNS
        ))?;
        let mut metas = stmt
            .query_map([], row_to_meta)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        // Latest version per name competes on test accuracy
        let mut best: Option<(String, u32, f64)> = None;
        for meta in &metas {
            let is_latest = !metas
                .iter()
                .any(|m| m.name == meta.name && m.version > meta.version);
            if !is_latest {
                continue;
            }
            let better = match &best {
                None => true,
                Some((_, _, acc)) => meta.metrics.accuracy > *acc,
            };
            if better {
                best = Some((meta.name.clone(), meta.version, meta.metrics.accuracy));
            }
        }
        if let Some((name, version, _)) = best {
            for meta in &mut metas {
                meta.is_best = meta.name == name && meta.version == version;
            }
        }
        Ok(metas)
    }
}

const META_COLUMNS: &str =
    "name, version, model_type, schema_json, trained_at, info_json, metrics_json, is_active";

fn describe(name: &str, version: Option<u32>) -> String {
    match version {
        Some(v) => format!("model '{}' version {}", name, v),
        None => format!("model '{}'", name),
    }
}

fn row_to_meta(row: &rusqlite::Row) -> rusqlite::Result<ArtifactMeta> {
    let conversion = |idx: usize, e: Box<dyn std::error::Error + Send + Sync>| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e)
    };

    let model_type_str: String = row.get(2)?;
    let model_type = ModelKind::parse(&model_type_str)
        .ok_or_else(|| conversion(2, format!("unknown model type {}", model_type_str).into()))?;
    let schema_json: String = row.get(3)?;
    let schema: FeatureSchema =
        serde_json::from_str(&schema_json).map_err(|e| conversion(3, Box::new(e)))?;
    let trained_str: String = row.get(4)?;
    let trained_at = DateTime::parse_from_rfc3339(&trained_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion(4, Box::new(e)))?;
    let info_json: String = row.get(5)?;
    let info: TrainingInfo =
        serde_json::from_str(&info_json).map_err(|e| conversion(5, Box::new(e)))?;
    let metrics_json: String = row.get(6)?;
    let metrics: EvaluationMetrics =
        serde_json::from_str(&metrics_json).map_err(|e| conversion(6, Box::new(e)))?;

    Ok(ArtifactMeta {
        name: row.get(0)?,
        version: row.get(1)?,
        model_type,
        schema,
        trained_at,
        info,
        metrics,
        is_active: row.get(7)?,
        is_best: false,
    })
}

fn row_to_artifact(row: &rusqlite::Row) -> rusqlite::Result<ModelArtifact> {
    let meta = row_to_meta(row)?;
    let state: Vec<u8> = row.get(8)?;
    Ok(ModelArtifact { meta, state })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::features::FeatureSchema;

    /// Minimal artifact with a given accuracy for registry tests
    pub fn artifact(name: &str, accuracy: f64) -> ModelArtifact {
        let metrics = EvaluationMetrics {
            accuracy,
            precision: [accuracy; 3],
            recall: [accuracy; 3],
            f1: [accuracy; 3],
            log_loss: 1.0,
            brier_score: 0.5,
            calibration_error: 0.1,
            confusion: [[0; 3]; 3],
            samples: 40,
        };
        ModelArtifact {
            meta: ArtifactMeta {
                name: name.to_string(),
                version: 0,
                model_type: ModelKind::Logistic,
                schema: FeatureSchema::current(),
                trained_at: Utc::now(),
                info: TrainingInfo {
                    train_samples: 128,
                    validation_samples: 32,
                    test_samples: 40,
                    duration_ms: 12,
                    seed: 42,
                    test_size: 0.2,
                    league: None,
                    season: None,
                    hyperparameters: serde_json::json!({}),
                },
                metrics,
                is_active: false,
                is_best: false,
            },
            state: serde_json::to_vec(&serde_json::json!({"weights": [0.0]})).unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::artifact;
    use super::*;

    fn registry() -> ModelRegistry {
        ModelRegistry::new(Store::in_memory().unwrap())
    }

    #[test]
    fn test_put_assigns_monotonic_versions() {
        let reg = registry();
        let v1 = reg.put(artifact("lr", 0.5)).unwrap();
        let v2 = reg.put(artifact("lr", 0.6)).unwrap();
        let other = reg.put(artifact("gbt", 0.7)).unwrap();

        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_eq!(other.version, 1);
        assert!(!v2.is_active);
    }

    #[test]
    fn test_get_latest_and_specific() {
        let reg = registry();
        reg.put(artifact("lr", 0.5)).unwrap();
        reg.put(artifact("lr", 0.6)).unwrap();

        let latest = reg.get("lr", None).unwrap();
        assert_eq!(latest.meta.version, 2);
        assert!((latest.meta.metrics.accuracy - 0.6).abs() < 1e-12);

        let first = reg.get("lr", Some(1)).unwrap();
        assert_eq!(first.meta.version, 1);
        assert!(!first.state.is_empty());

        assert!(matches!(
            reg.get("missing", None),
            Err(FootyError::NotFound(_))
        ));
    }

    #[test]
    fn test_activate_is_exclusive_per_name() {
        let reg = registry();
        reg.put(artifact("lr", 0.5)).unwrap();
        reg.put(artifact("lr", 0.6)).unwrap();

        reg.activate("lr", 1).unwrap();
        assert_eq!(reg.active_version("lr").unwrap(), Some(1));

        reg.activate("lr", 2).unwrap();
        assert_eq!(reg.active_version("lr").unwrap(), Some(2));

        let active: Vec<_> = reg
            .list()
            .unwrap()
            .into_iter()
            .filter(|m| m.is_active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].version, 2);
    }

    #[test]
    fn test_activate_unknown_version_fails() {
        let reg = registry();
        reg.put(artifact("lr", 0.5)).unwrap();
        assert!(matches!(
            reg.activate("lr", 9),
            Err(FootyError::NotFound(_))
        ));
        assert!(matches!(
            reg.activate("nope", 1),
            Err(FootyError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_guards_active_version() {
        let reg = registry();
        reg.put(artifact("lr", 0.5)).unwrap();
        reg.put(artifact("lr", 0.6)).unwrap();
        reg.activate("lr", 2).unwrap();

        assert!(matches!(
            reg.delete("lr", Some(2), false),
            Err(FootyError::ActiveModelInUse { version: 2, .. })
        ));
        // Inactive sibling deletes fine
        assert_eq!(reg.delete("lr", Some(1), false).unwrap(), 1);
        // Whole-name delete still guarded, force overrides
        assert!(matches!(
            reg.delete("lr", None, false),
            Err(FootyError::ActiveModelInUse { .. })
        ));
        assert_eq!(reg.delete("lr", None, true).unwrap(), 1);
        assert!(matches!(
            reg.get("lr", None),
            Err(FootyError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_unknown_fails() {
        let reg = registry();
        assert!(matches!(
            reg.delete("ghost", None, false),
            Err(FootyError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_derives_is_best_from_latest_versions() {
        let reg = registry();
        reg.put(artifact("lr", 0.9)).unwrap(); // superseded
        reg.put(artifact("lr", 0.5)).unwrap(); // latest lr
        reg.put(artifact("gbt", 0.7)).unwrap(); // latest gbt, best overall

        let metas = reg.list().unwrap();
        assert_eq!(metas.len(), 3);
        let best: Vec<_> = metas.iter().filter(|m| m.is_best).collect();
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].name, "gbt");
        assert_eq!(best[0].version, 1);
    }

    #[test]
    fn test_concurrent_activation_keeps_single_active() {
        let reg = registry();
        reg.put(artifact("lr", 0.5)).unwrap();
        reg.put(artifact("lr", 0.6)).unwrap();
        reg.put(artifact("lr", 0.7)).unwrap();

        let mut handles = Vec::new();
        for version in 1..=3u32 {
            let reg = reg.clone();
            handles.push(std::thread::spawn(move || {
                reg.activate("lr", version).unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let active: Vec<_> = reg
            .list()
            .unwrap()
            .into_iter()
            .filter(|m| m.is_active)
            .collect();
        assert_eq!(active.len(), 1);
    }
}
