//! Shared configuration for the rulehub rule aggregation pipeline.
//!
//! The aggregator crate consumes [`PipelineConfig`] to decide where rule
//! sources are downloaded, how the validation engine is invoked, and where
//! archives are written and published.

pub mod config;

pub use config::{ConfigError, FetchConfig, PipelineConfig, PublishConfig, ValidationConfig};
