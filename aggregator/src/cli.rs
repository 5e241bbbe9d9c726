//! CLI argument definitions and configuration resolution for `rulehub-aggregator`.
//!
//! This module defines the command-line interface using clap, and the rules
//! for finding the configuration file and layering flag overrides on top of
//! it. It is separated from the main entrypoint so both can be tested
//! without running a pipeline.

use camino::{Utf8Path, Utf8PathBuf};
use clap::{ArgAction, Parser};
use log::LevelFilter;
use rulehub::{ConfigError, PipelineConfig};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "RULEHUB_CONFIG";

/// Configuration file picked up from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "rulehub.toml";

/// Aggregate, validate, combine, and archive IDS rule sources.
#[derive(Parser, Debug, Clone)]
#[command(name = "rulehub-aggregator")]
#[command(version, about)]
#[command(long_about = concat!(
    "Aggregate, validate, combine, and archive IDS rule sources.\n\n",
    "Reads a manifest of named rule sources, downloads each one into its own ",
    "working area, expands .tar.gz payloads, checks every .rules file with the ",
    "validation engine, concatenates them into one combined rules file, and ",
    "packs each source into rules/<name>.tar.gz.\n\n",
    "The combined file is validated as a whole; that verdict decides whether the ",
    "run is deployable and whether archives are published.",
))]
#[command(after_help = concat!(
    "EXIT STATUS:\n",
    "  0  run completed and the combined rules are deployable\n",
    "  1  run could not start (manifest, configuration, or output directory)\n",
    "  2  validation engine unavailable\n",
    "  3  combined rules rejected by the validation engine or timed out\n",
    "  A rule file rejected on its own is reported in the summary. Because the\n",
    "  same rules are part of the combined file, such a run usually ends with 3.\n\n",
    "CONFIGURATION:\n",
    "  --config PATH, then $RULEHUB_CONFIG, then ./rulehub.toml when present.\n",
    "  Flags override values from the file.\n\n",
    "EXAMPLES:\n",
    "  Run with the default manifest (index.yaml):\n",
    "    $ rulehub-aggregator\n\n",
    "  Use a different engine binary and eight workers:\n",
    "    $ rulehub-aggregator --engine /opt/suricata/bin/suricata --jobs 8\n\n",
    "  Mirror deployable archives to a staging directory:\n",
    "    $ rulehub-aggregator --publish-dir /srv/mirror\n\n",
    "  Machine-readable summary:\n",
    "    $ rulehub-aggregator --json",
))]
pub struct Cli {
    /// Source manifest (YAML, JSON, or TOML by extension).
    #[arg(short, long, value_name = "PATH", default_value = "index.yaml")]
    pub manifest: Utf8PathBuf,

    /// Pipeline configuration file.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,

    /// Directory holding one working area per source.
    #[arg(long, value_name = "DIR")]
    pub downloads_dir: Option<Utf8PathBuf>,

    /// Directory receiving per-source archives and the archive index.
    #[arg(long, value_name = "DIR")]
    pub rules_dir: Option<Utf8PathBuf>,

    /// Path of the combined rules file.
    #[arg(long, value_name = "PATH")]
    pub combined_file: Option<Utf8PathBuf>,

    /// Validation engine executable.
    #[arg(long, value_name = "PROGRAM")]
    pub engine: Option<String>,

    /// Number of worker threads.
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Mirror deployable archives into this directory.
    #[arg(long, value_name = "DIR")]
    pub publish_dir: Option<Utf8PathBuf>,

    /// Print the summary as JSON.
    #[arg(long)]
    pub json: bool,

    /// Increase log verbosity (repeatable: -v, -vv).
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Default for Cli {
    /// Creates a `Cli` equivalent to running `rulehub-aggregator` with no arguments.
    ///
    /// # Examples
    ///
    /// ```
    /// use rulehub_aggregator::cli::Cli;
    ///
    /// let cli = Cli::default();
    /// assert_eq!(cli.manifest.as_str(), "index.yaml");
    /// assert!(cli.config.is_none());
    /// ```
    fn default() -> Self {
        Self {
            manifest: Utf8PathBuf::from("index.yaml"),
            config: None,
            downloads_dir: None,
            rules_dir: None,
            combined_file: None,
            engine: None,
            jobs: None,
            publish_dir: None,
            json: false,
            verbose: 0,
            quiet: false,
        }
    }
}

impl Cli {
    /// Log level implied by `-v` and `-q`.
    #[must_use]
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Warn;
        }
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// Apply flag overrides to `config`.
    pub fn apply_overrides(&self, config: &mut PipelineConfig) {
        if let Some(dir) = &self.downloads_dir {
            config.downloads_dir.clone_from(dir);
        }
        if let Some(dir) = &self.rules_dir {
            config.rules_dir.clone_from(dir);
        }
        if let Some(path) = &self.combined_file {
            config.combined_file.clone_from(path);
        }
        if let Some(engine) = &self.engine {
            config.validation.engine.clone_from(engine);
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
    }
}

/// Locate the configuration file.
///
/// An explicit path wins, then [`CONFIG_ENV_VAR`], then
/// [`DEFAULT_CONFIG_FILE`] in `cwd` when it exists. `None` means built-in
/// defaults apply.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Utf8Path>, cwd: &Utf8Path) -> Option<Utf8PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_owned());
    }
    if let Some(value) = std::env::var(CONFIG_ENV_VAR)
        .ok()
        .filter(|value| !value.trim().is_empty())
    {
        return Some(Utf8PathBuf::from(value));
    }
    let local = cwd.join(DEFAULT_CONFIG_FILE);
    local.is_file().then_some(local)
}

/// Load the configuration for `cli` and apply its overrides.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read or parsed, or when
/// the final values are out of range.
pub fn load_config(cli: &Cli, cwd: &Utf8Path) -> Result<PipelineConfig, ConfigError> {
    let mut config = match resolve_config_path(cli.config.as_deref(), cwd) {
        Some(path) => {
            log::debug!("loading configuration from {path}");
            PipelineConfig::load(&path)?
        }
        None => PipelineConfig::default(),
    };
    cli.apply_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
