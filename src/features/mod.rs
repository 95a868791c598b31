//! Feature extraction
//!
//! Converts a match plus its pre-match history into a fixed-length
//! numeric vector under a versioned schema.

pub mod builder;
pub mod context;
pub mod schema;

pub use builder::FeatureBuilder;
pub use context::{FeatureContext, HeadToHead, TeamForm};
pub use schema::{FeatureSchema, MISSING_SENTINEL, SCHEMA_VERSION};
