//! Durable storage for match history, model artifacts and predictions

pub mod store;

pub use store::{PredictionRow, Store, StoreStats};
