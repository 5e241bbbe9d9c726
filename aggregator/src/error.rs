//! Run-level error types for the aggregator.
//!
//! Per-source and per-file failures are never raised: each stage records them
//! in its own outcome types and the run carries on. The errors here are the
//! ones that stop a run before or between stages.

use crate::archiver::ArchiveError;
use crate::manifest::ManifestError;
use camino::Utf8PathBuf;
use rulehub::ConfigError;
use thiserror::Error;

/// Errors that prevent a run from starting or completing its stages.
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// The pipeline configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The manifest could not be read, parsed, or was rejected.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// An output directory could not be prepared.
    #[error("output directory {path} is not usable: {source}")]
    OutputDir {
        /// The directory that could not be created or cleared.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The archive index could not be written.
    #[error("failed to write archive index {path}: {source}")]
    ArchiveIndex {
        /// Where the index was to be written.
        path: Utf8PathBuf,
        /// The underlying packaging error.
        #[source]
        source: ArchiveError,
    },

    /// The worker pool could not be created.
    #[error("failed to start worker pool: {reason}")]
    WorkerPool {
        /// Description of the pool construction failure.
        reason: String,
    },

    /// The end-of-run summary could not be serialised.
    #[error("failed to serialise summary: {0}")]
    Summary(#[from] serde_json::Error),

    /// The end-of-run summary could not be written.
    #[error("failed to write summary")]
    WriteFailed {
        /// The underlying error that caused the write to fail.
        #[source]
        source: std::io::Error,
    },

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using [`AggregatorError`].
pub type Result<T> = std::result::Result<T, AggregatorError>;
