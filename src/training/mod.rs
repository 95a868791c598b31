//! Model training
//!
//! Pipeline, partitioning, evaluation metrics and the background
//! training service.

pub mod metrics;
pub mod pipeline;
pub mod service;
pub mod split;

pub use metrics::EvaluationMetrics;
pub use pipeline::{TrainingPipeline, TrainingRequest};
pub use service::{TrainingHandle, TrainingService, TrainingStatus};
pub use split::SplitStrategy;
