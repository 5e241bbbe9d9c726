//! Pipeline configuration loaded from `rulehub.toml`.
//!
//! `PipelineConfig` carries every tunable the aggregation pipeline needs: the
//! output layout, worker pool size, fetch timeouts and retry budget, the
//! validation engine invocation, and the publish destination. The struct is
//! constructed once at process start and passed by reference to each stage.
//! Every field falls back to a default when omitted, so an empty file (or no
//! file at all) yields a working configuration.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading or checking a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration at {path}: {source}")]
    Read {
        /// Path of the unreadable file.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("invalid configuration: {reason}")]
    Parse {
        /// Parser message, including the offending key when known.
        reason: String,
    },

    /// A value parsed but is outside its permitted range.
    #[error("invalid configuration value for {field}: {reason}")]
    OutOfRange {
        /// Dotted name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
}

/// Top-level configuration for one aggregation run.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Root directory holding one working area per source.
    pub downloads_dir: Utf8PathBuf,
    /// Directory receiving `<source>.tar.gz` archives and `index.json`.
    pub rules_dir: Utf8PathBuf,
    /// Path of the combined rules artifact.
    pub combined_file: Utf8PathBuf,
    /// Upper bound on concurrently running units of work.
    pub jobs: usize,
    /// Remote retrieval settings.
    pub fetch: FetchConfig,
    /// External validation engine settings.
    pub validation: ValidationConfig,
    /// Object-store destination settings.
    pub publish: PublishConfig,
}

impl PipelineConfig {
    const fn default_jobs() -> usize {
        4
    }

    /// Parses a configuration from TOML source and checks its ranges.
    ///
    /// # Examples
    ///
    /// ```
    /// use rulehub::PipelineConfig;
    ///
    /// let config = PipelineConfig::from_toml_str("jobs = 8\n")?;
    /// assert_eq!(config.jobs, 8);
    /// assert_eq!(config.validation.engine, "suricata");
    /// # Ok::<(), rulehub::ConfigError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the source is not valid TOML or
    /// contains unknown keys, and [`ConfigError::OutOfRange`] when a value
    /// fails [`Self::validate`].
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config = toml::from_str::<Self>(source).map_err(|err| ConfigError::Parse {
            reason: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when the file cannot be read, otherwise
    /// the errors of [`Self::from_toml_str`].
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks that numeric settings are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs == 0 {
            return Err(ConfigError::OutOfRange {
                field: "jobs",
                reason: "must be at least 1",
            });
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::OutOfRange {
                field: "fetch.timeout_secs",
                reason: "must be greater than zero",
            });
        }
        if self.validation.engine.trim().is_empty() {
            return Err(ConfigError::OutOfRange {
                field: "validation.engine",
                reason: "must name an executable",
            });
        }
        if self.validation.file_timeout_secs == 0 || self.validation.combined_timeout_secs == 0 {
            return Err(ConfigError::OutOfRange {
                field: "validation.*_timeout_secs",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }

    /// Path of the archive index written next to the archives.
    #[must_use]
    pub fn archive_index_path(&self) -> Utf8PathBuf {
        self.rules_dir.join("index.json")
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            downloads_dir: Utf8PathBuf::from("rules_downloads"),
            rules_dir: Utf8PathBuf::from("rules"),
            combined_file: Utf8PathBuf::from("combined_rules.rules"),
            jobs: Self::default_jobs(),
            fetch: FetchConfig::default(),
            validation: ValidationConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}

/// Settings for retrieving source payloads.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Whole-request timeout in seconds.
    pub timeout_secs: u64,
    /// Extra attempts after a transient failure.
    pub retries: u32,
    /// Base delay between attempts; attempt `n` waits `n` times this value.
    pub retry_backoff_ms: u64,
}

impl FetchConfig {
    /// Whole-request timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// # Examples
    ///
    /// ```
    /// use rulehub::FetchConfig;
    /// use std::time::Duration;
    ///
    /// let fetch = FetchConfig { retry_backoff_ms: 250, ..FetchConfig::default() };
    /// assert_eq!(fetch.backoff(2), Duration::from_millis(500));
    /// ```
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

/// Settings for the external rule-syntax validation engine.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationConfig {
    /// Executable name or path.
    pub engine: String,
    /// Arguments placed before the rule file path.
    pub args: Vec<String>,
    /// Timeout for each individual rule file, in seconds.
    pub file_timeout_secs: u64,
    /// Timeout for the combined artifact, in seconds.
    pub combined_timeout_secs: u64,
    /// Maximum characters of diagnostic text shown per file in summaries.
    pub diagnostic_limit: usize,
}

impl ValidationConfig {
    /// Per-file timeout as a [`Duration`].
    #[must_use]
    pub const fn file_timeout(&self) -> Duration {
        Duration::from_secs(self.file_timeout_secs)
    }

    /// Combined-artifact timeout as a [`Duration`].
    #[must_use]
    pub const fn combined_timeout(&self) -> Duration {
        Duration::from_secs(self.combined_timeout_secs)
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            engine: "suricata".to_owned(),
            args: vec!["-T".to_owned(), "-S".to_owned()],
            file_timeout_secs: 30,
            combined_timeout_secs: 60,
            diagnostic_limit: 300,
        }
    }
}

/// Destination for published archives.
///
/// Credentials are not part of this value; they belong to whichever
/// publisher implementation talks to the object store.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PublishConfig {
    /// Bucket receiving the archives.
    pub bucket: String,
    /// Region the bucket lives in.
    pub region: String,
    /// Key prefix under which archives are stored.
    pub prefix: String,
}

impl PublishConfig {
    /// Object key for an archive file name.
    ///
    /// # Examples
    ///
    /// ```
    /// use rulehub::PublishConfig;
    ///
    /// let publish = PublishConfig::default();
    /// assert_eq!(publish.key_for("feodo.tar.gz"), "rules/feodo.tar.gz");
    /// ```
    #[must_use]
    pub fn key_for(&self, file_name: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            file_name.to_owned()
        } else {
            format!("{prefix}/{file_name}")
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            bucket: "suricata-rules".to_owned(),
            region: "ap-southeast-2".to_owned(),
            prefix: "rules".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn defaults_match_the_reference_layout() {
        let config = PipelineConfig::default();

        assert_eq!(config.downloads_dir, Utf8PathBuf::from("rules_downloads"));
        assert_eq!(config.rules_dir, Utf8PathBuf::from("rules"));
        assert_eq!(config.combined_file, Utf8PathBuf::from("combined_rules.rules"));
        assert_eq!(config.fetch.timeout(), Duration::from_secs(30));
        assert_eq!(config.validation.file_timeout(), Duration::from_secs(30));
        assert_eq!(config.validation.combined_timeout(), Duration::from_secs(60));
        assert_eq!(config.validation.args, vec!["-T", "-S"]);
    }

    #[rstest]
    fn empty_source_yields_defaults() {
        let config = PipelineConfig::from_toml_str("").expect("empty config parses");
        assert_eq!(config, PipelineConfig::default());
    }

    #[rstest]
    fn deserialises_nested_overrides() {
        let source = concat!(
            "jobs = 2\n",
            "[fetch]\n",
            "retries = 0\n",
            "[validation]\n",
            "engine = \"/opt/suricata/bin/suricata\"\n",
            "args = [\"-T\", \"-c\", \"suricata.yaml\", \"-S\"]\n",
        );

        let config = PipelineConfig::from_toml_str(source).expect("config parses");

        assert_eq!(config.jobs, 2);
        assert_eq!(config.fetch.retries, 0);
        assert_eq!(config.fetch.timeout_secs, 30);
        assert_eq!(config.validation.engine, "/opt/suricata/bin/suricata");
        assert_eq!(config.validation.args.len(), 4);
    }

    #[rstest]
    fn rejects_unknown_fields() {
        let outcome = PipelineConfig::from_toml_str("unexpected = true\n");
        assert!(matches!(outcome, Err(ConfigError::Parse { .. })));
    }

    #[rstest]
    #[case::zero_jobs("jobs = 0\n", "jobs")]
    #[case::zero_fetch_timeout("[fetch]\ntimeout_secs = 0\n", "fetch.timeout_secs")]
    #[case::blank_engine("[validation]\nengine = \"  \"\n", "validation.engine")]
    fn rejects_out_of_range_values(#[case] source: &str, #[case] expected_field: &str) {
        let outcome = PipelineConfig::from_toml_str(source);
        match outcome {
            Err(ConfigError::OutOfRange { field, .. }) => assert_eq!(field, expected_field),
            other => panic!("expected OutOfRange for {expected_field}, got {other:?}"),
        }
    }

    #[rstest]
    fn load_reports_missing_file() {
        let outcome = PipelineConfig::load(Utf8Path::new("/nonexistent/rulehub.toml"));
        assert!(matches!(outcome, Err(ConfigError::Read { .. })));
    }

    #[rstest]
    #[case::default_prefix("rules", "rules/a.tar.gz")]
    #[case::slashes_trimmed("/mirror/rules/", "mirror/rules/a.tar.gz")]
    #[case::empty_prefix("", "a.tar.gz")]
    fn key_for_joins_prefix(#[case] prefix: &str, #[case] expected: &str) {
        let publish = PublishConfig {
            prefix: prefix.to_owned(),
            ..PublishConfig::default()
        };
        assert_eq!(publish.key_for("a.tar.gz"), expected);
    }

    #[rstest]
    fn backoff_grows_linearly() {
        let fetch = FetchConfig::default();
        assert_eq!(fetch.backoff(0), Duration::ZERO);
        assert_eq!(fetch.backoff(1), Duration::from_millis(500));
        assert_eq!(fetch.backoff(3), Duration::from_millis(1500));
    }
}
