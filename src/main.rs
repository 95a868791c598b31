//! Football prediction CLI
//!
//! Train, inspect and serve match outcome models from the command
//! line.

use clap::{Parser, Subcommand};
use footy::model::ModelKind;
use footy::training::SplitStrategy;
use footy::{Config, Result};

#[derive(Parser)]
#[command(name = "footy")]
#[command(about = "Football match outcome prediction engine", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Data management commands
    Data {
        #[command(subcommand)]
        action: DataCommands,
    },
    /// Train a new model version
    Train {
        /// Model name (versions accumulate under this name)
        name: String,
        /// Algorithm family
        #[arg(long, default_value = "logistic")]
        model_type: ModelKind,
        /// Restrict training data to one league
        #[arg(long)]
        league: Option<String>,
        /// Restrict training data to one season
        #[arg(long)]
        season: Option<String>,
        /// Held-out test fraction, in (0, 0.5]
        #[arg(long, default_value = "0.2")]
        test_size: f64,
        /// Random seed for splits and backends
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Split strategy
        #[arg(long, default_value = "stratified")]
        split: SplitStrategy,
        /// Backend hyperparameters as a JSON object
        #[arg(long)]
        hyperparameters: Option<String>,
    },
    /// Model registry commands
    Models {
        #[command(subcommand)]
        action: ModelCommands,
    },
    /// Predict one or more matches by id
    Predict {
        /// Match ids
        #[arg(required = true)]
        match_ids: Vec<i64>,
        /// Model name
        #[arg(long)]
        model: String,
        /// Model version (defaults to the active version)
        #[arg(long)]
        version: Option<u32>,
    },
    /// Record a final score and settle predictions for the match
    Settle {
        match_id: i64,
        home_score: u32,
        away_score: u32,
    },
    /// Rolling prediction accuracy
    Accuracy {
        /// Restrict to one model name
        #[arg(long)]
        model: Option<String>,
        /// Trailing window in days
        #[arg(long)]
        window_days: Option<u32>,
    },
    /// Initialize a new project with default config
    Init,
}

#[derive(Subcommand)]
enum DataCommands {
    /// Import match records from a JSON file
    Import {
        /// Path to a JSON array of match records
        file: String,
    },
    /// Show database status
    Status,
}

#[derive(Subcommand)]
enum ModelCommands {
    /// List stored artifacts with metrics
    List,
    /// Activate a model version for default serving
    Activate { name: String, version: u32 },
    /// Delete one version, or every version of a name
    Delete {
        name: String,
        #[arg(long)]
        version: Option<u32>,
        /// Required to delete the active version
        #[arg(long)]
        force: bool,
    },
    /// Per-feature importance where the backend supports it
    Importance {
        name: String,
        #[arg(long)]
        version: Option<u32>,
    },
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    let result = match cli.command {
        Commands::Data { action } => match action {
            DataCommands::Import { file } => commands::data_import(&config, &file),
            DataCommands::Status => commands::data_status(&config),
        },
        Commands::Train {
            name,
            model_type,
            league,
            season,
            test_size,
            seed,
            split,
            hyperparameters,
        } => commands::train(
            &config,
            &name,
            model_type,
            league,
            season,
            test_size,
            seed,
            split,
            hyperparameters,
        ),
        Commands::Models { action } => match action {
            ModelCommands::List => commands::models_list(&config),
            ModelCommands::Activate { name, version } => {
                commands::models_activate(&config, &name, version)
            }
            ModelCommands::Delete {
                name,
                version,
                force,
            } => commands::models_delete(&config, &name, version, force),
            ModelCommands::Importance { name, version } => {
                commands::models_importance(&config, &name, version)
            }
        },
        Commands::Predict {
            match_ids,
            model,
            version,
        } => commands::predict(&config, &match_ids, &model, version),
        Commands::Settle {
            match_id,
            home_score,
            away_score,
        } => commands::settle(&config, match_id, home_score, away_score),
        Commands::Accuracy { model, window_days } => {
            commands::accuracy(&config, model.as_deref(), window_days)
        }
        Commands::Init => commands::init(&cli.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

mod commands {
    use super::*;
    use footy::data::Store;
    use footy::model::Hyperparameters;
    use footy::predict::PredictionService;
    use footy::registry::ModelRegistry;
    use footy::tracker::AccuracyTracker;
    use footy::training::{TrainingRequest, TrainingService, TrainingStatus};
    use footy::{MatchId, MatchRecord};

    fn open_store(config: &Config) -> Result<Store> {
        Store::open(&config.data.database_path)
    }

    pub fn init(config_path: &str) -> Result<()> {
        let config = Config::default();
        config.save(config_path)?;
        println!("Created default config at {}", config_path);

        std::fs::create_dir_all("data")?;
        println!("Created data/ directory");

        println!("\nNext steps:");
        println!("  1. Edit {} to customize settings", config_path);
        println!("  2. Run 'footy data import <file>' to load match history");
        println!("  3. Run 'footy train <name>' to train a model");
        Ok(())
    }

    pub fn data_import(config: &Config, file: &str) -> Result<()> {
        let content = std::fs::read_to_string(file)?;
        let records: Vec<MatchRecord> = serde_json::from_str(&content)?;
        let store = open_store(config)?;
        let count = store.upsert_matches(&records)?;
        println!("Imported {} match records from {}", count, file);
        Ok(())
    }

    pub fn data_status(config: &Config) -> Result<()> {
        let store = open_store(config)?;
        let stats = store.stats()?;
        println!("Database: {}", config.data.database_path);
        println!("  Matches:     {} ({} settled)", stats.match_count, stats.settled_count);
        println!("  Artifacts:   {}", stats.artifact_count);
        println!("  Predictions: {}", stats.prediction_count);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn train(
        config: &Config,
        name: &str,
        model_type: ModelKind,
        league: Option<String>,
        season: Option<String>,
        test_size: f64,
        seed: u64,
        split: SplitStrategy,
        hyperparameters: Option<String>,
    ) -> Result<()> {
        let hyperparameters = match hyperparameters {
            Some(raw) => Hyperparameters::from_value(serde_json::from_str(&raw)?)?,
            None => Hyperparameters::default(),
        };
        let request = TrainingRequest {
            model_name: name.to_string(),
            model_type,
            league,
            season,
            test_size,
            seed,
            split,
            hyperparameters,
        };

        let store = open_store(config)?;
        let registry = ModelRegistry::new(store.clone());
        let service = TrainingService::new(store, registry.clone(), config.training.clone());

        println!("Training {} ({})...", name, model_type);
        let handle = service.spawn(request)?;
        match handle.wait() {
            TrainingStatus::Completed { name, version } => {
                let artifact = registry.get(&name, Some(version))?;
                let m = &artifact.meta.metrics;
                println!("Trained {} v{}", name, version);
                println!("  Accuracy:          {:.3}", m.accuracy);
                println!("  Log-loss:          {:.3}", m.log_loss);
                println!("  Brier score:       {:.3}", m.brier_score);
                println!("  Calibration error: {:.3}", m.calibration_error);
                println!(
                    "Activate with: footy models activate {} {}",
                    name, version
                );
                Ok(())
            }
            TrainingStatus::Failed { reason } => {
                Err(footy::FootyError::InvalidRequest(reason))
            }
            other => {
                Err(footy::FootyError::InvalidRequest(format!(
                    "training ended in unexpected state {:?}",
                    other
                )))
            }
        }
    }

    pub fn models_list(config: &Config) -> Result<()> {
        let registry = ModelRegistry::new(open_store(config)?);
        let metas = registry.list()?;
        if metas.is_empty() {
            println!("No trained models.");
            return Ok(());
        }
        println!(
            "{:<20} {:>4} {:<18} {:>9} {:>7} {:>6}",
            "NAME", "VER", "TYPE", "ACCURACY", "ACTIVE", "BEST"
        );
        for meta in metas {
            println!(
                "{:<20} {:>4} {:<18} {:>9.3} {:>7} {:>6}",
                meta.name,
                meta.version,
                meta.model_type.to_string(),
                meta.metrics.accuracy,
                if meta.is_active { "yes" } else { "" },
                if meta.is_best { "yes" } else { "" },
            );
        }
        Ok(())
    }

    pub fn models_activate(config: &Config, name: &str, version: u32) -> Result<()> {
        let registry = ModelRegistry::new(open_store(config)?);
        registry.activate(name, version)?;
        println!("Activated {} v{}", name, version);
        Ok(())
    }

    pub fn models_delete(
        config: &Config,
        name: &str,
        version: Option<u32>,
        force: bool,
    ) -> Result<()> {
        let registry = ModelRegistry::new(open_store(config)?);
        let removed = registry.delete(name, version, force)?;
        println!("Deleted {} artifact(s) for {}", removed, name);
        Ok(())
    }

    pub fn models_importance(config: &Config, name: &str, version: Option<u32>) -> Result<()> {
        let store = open_store(config)?;
        let registry = ModelRegistry::new(store.clone());
        let service = PredictionService::new(store, registry);
        let mut importance = service.feature_importance(name, version)?;
        importance.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        println!("{:<32} {:>10}", "FEATURE", "IMPORTANCE");
        for (feature, value) in importance {
            println!("{:<32} {:>10.4}", feature, value);
        }
        Ok(())
    }

    pub fn predict(
        config: &Config,
        match_ids: &[i64],
        model: &str,
        version: Option<u32>,
    ) -> Result<()> {
        let store = open_store(config)?;
        let registry = ModelRegistry::new(store.clone());
        let service = PredictionService::new(store, registry);
        let ids: Vec<MatchId> = match_ids.iter().map(|id| MatchId(*id)).collect();

        let results = service.predict_batch(&ids, model, version)?;
        for item in results {
            match item.result {
                Ok(row) => {
                    let score = match row.predicted_score {
                        Some((h, a)) => format!(" {}-{}", h, a),
                        None => String::new(),
                    };
                    println!(
                        "{}: {}{} (H {:.1}% / D {:.1}% / A {:.1}%, confidence {:.1}%)",
                        item.match_id,
                        row.predicted,
                        score,
                        row.probs[0] * 100.0,
                        row.probs[1] * 100.0,
                        row.probs[2] * 100.0,
                        row.confidence * 100.0,
                    );
                }
                Err(e) => println!("{}: error: {}", item.match_id, e),
            }
        }
        Ok(())
    }

    pub fn settle(
        config: &Config,
        match_id: i64,
        home_score: u32,
        away_score: u32,
    ) -> Result<()> {
        let store = open_store(config)?;
        store.set_result(MatchId(match_id), home_score, away_score)?;
        let tracker = AccuracyTracker::new(store);
        let updated = tracker.settle_match(MatchId(match_id))?;
        println!(
            "Settled {} as {} - {}; resolved {} prediction(s)",
            MatchId(match_id),
            home_score,
            away_score,
            updated
        );
        Ok(())
    }

    pub fn accuracy(
        config: &Config,
        model: Option<&str>,
        window_days: Option<u32>,
    ) -> Result<()> {
        let tracker = AccuracyTracker::new(open_store(config)?);
        let report = tracker.accuracy(model, window_days)?;
        let scope = match (model, window_days) {
            (Some(m), Some(d)) => format!("{} over the last {} days", m, d),
            (Some(m), None) => format!("{} overall", m),
            (None, Some(d)) => format!("all models over the last {} days", d),
            (None, None) => "all models overall".to_string(),
        };
        println!("Accuracy for {}:", scope);
        println!("  Resolved predictions: {}", report.total);
        println!("  Correct:              {}", report.correct);
        println!("  Accuracy:             {:.3}", report.accuracy);
        Ok(())
    }
}
