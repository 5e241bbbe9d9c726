//! Rule source aggregation pipeline.
//!
//! This crate turns a manifest of named IDS rule sources into a validated,
//! combined rules file and one archive per source. It backs the `rulehub-aggregator`
//! CLI binary and can be driven programmatically with substitute fetchers,
//! validation engines, and publishers.
//!
//! # Modules
//!
//! - [`archiver`] - Per-source `.tar.gz` packaging and the archive index
//! - [`cli`] - Command-line arguments and configuration resolution
//! - [`combiner`] - Concatenation of rule files with provenance markers
//! - [`error`] - Run-level error types
//! - [`fetch`] - Payload retrieval with bounded retry
//! - [`manifest`] - Manifest parsing into ordered source specifications
//! - [`pipeline`] - Stage orchestration on a bounded worker pool
//! - [`publisher`] - Upload of finished archives to an object store
//! - [`source_name`] - Source names and their working-area directory names
//! - [`summary`] - Human-readable and JSON end-of-run summaries
//! - [`unpack`] - Payload classification and safe archive expansion
//! - [`validation`] - Rule validation through an external engine
//! - [`working_area`] - Per-source directories and rule file discovery

pub mod archiver;
pub mod cli;
pub mod combiner;
pub mod error;
pub mod fetch;
pub mod manifest;
pub mod pipeline;
pub mod publisher;
pub mod source_name;
pub mod summary;
pub mod unpack;
pub mod validation;
pub mod working_area;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
