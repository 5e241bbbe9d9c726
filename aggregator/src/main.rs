//! `rulehub-aggregator` CLI entrypoint.
//!
//! Loads configuration and the source manifest, runs the aggregation
//! pipeline, prints the end-of-run summary to stdout, and maps the run
//! verdict to the process exit code.

use camino::Utf8PathBuf;
use clap::Parser;
use env_logger::{Builder, Env, Target};
use rulehub_aggregator::cli::{Cli, load_config};
use rulehub_aggregator::error::{AggregatorError, Result};
use rulehub_aggregator::fetch::HttpFetcher;
use rulehub_aggregator::manifest::load_manifest;
use rulehub_aggregator::pipeline::{PipelineServices, RunOutcome, run_pipeline};
use rulehub_aggregator::publisher::{ArtifactPublisher, DirectoryPublisher};
use rulehub_aggregator::summary::{format_human, format_json};
use rulehub_aggregator::validation::SubprocessEngine;
use std::io::Write;

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    let run_result = run(&cli, &mut stdout);
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn init_logging(cli: &Cli) {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    if cli.verbose > 0 || cli.quiet {
        builder.filter_level(cli.log_level());
    }
    builder.target(Target::Stderr).init();
}

fn run(cli: &Cli, stdout: &mut dyn Write) -> Result<RunOutcome> {
    let cwd = Utf8PathBuf::try_from(std::env::current_dir()?).map_err(|err| {
        AggregatorError::Io(std::io::Error::other(format!(
            "current directory is not valid UTF-8: {err}"
        )))
    })?;
    let config = load_config(cli, &cwd)?;
    let manifest = load_manifest(&cli.manifest)?;

    let fetcher = HttpFetcher::new(config.fetch.timeout());
    let engine = SubprocessEngine::from_config(&config.validation);
    let mirror = cli
        .publish_dir
        .as_deref()
        .map(|dir| DirectoryPublisher::new(dir, &config.publish));
    let services = PipelineServices {
        fetcher: &fetcher,
        engine: &engine,
        publisher: mirror.as_ref().map(|m| m as &dyn ArtifactPublisher),
    };

    let report = run_pipeline(&config, &manifest, services)?;
    let summary = if cli.json {
        format_json(&report)?
    } else {
        format_human(&report, config.validation.diagnostic_limit)
    };
    writeln!(stdout, "{summary}").map_err(|source| AggregatorError::WriteFailed { source })?;

    let outcome = report.outcome();
    if outcome == RunOutcome::EngineUnavailable {
        log::error!(
            "validation engine `{}` is unavailable; rule files were not validated",
            engine.program()
        );
    }
    Ok(outcome)
}

fn exit_code_for_run_result(result: Result<RunOutcome>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            write_stderr_line(stderr, format!("error: {err}"));
            1
        }
    }
}

fn write_stderr_line(stderr: &mut dyn Write, message: impl std::fmt::Display) {
    if writeln!(stderr, "{message}").is_err() {
        // Best-effort reporting; ignore write failures.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rulehub_aggregator::manifest::ManifestError;

    #[rstest]
    #[case::completed(RunOutcome::Completed, 0)]
    #[case::engine_unavailable(RunOutcome::EngineUnavailable, 2)]
    #[case::combined_rejected(RunOutcome::CombinedRejected, 3)]
    fn run_outcomes_map_to_exit_codes(#[case] outcome: RunOutcome, #[case] expected: i32) {
        let mut stderr = Vec::new();
        assert_eq!(exit_code_for_run_result(Ok(outcome), &mut stderr), expected);
        assert!(stderr.is_empty());
    }

    #[test]
    fn run_errors_print_and_return_one() {
        let err = AggregatorError::from(ManifestError::DuplicateSource {
            name: "et_open".to_owned(),
            first: "et/open".to_owned(),
            dir_name: "et_open".to_owned(),
        });

        let mut stderr = Vec::new();
        let exit_code = exit_code_for_run_result(Err(err), &mut stderr);
        assert_eq!(exit_code, 1);

        let stderr_text = String::from_utf8(stderr).expect("stderr was not UTF-8");
        assert!(stderr_text.starts_with("error: duplicate source"));
    }

    #[rstest]
    #[case::missing_config(false)]
    #[case::missing_manifest(true)]
    fn start_up_failures_stop_the_run(#[case] write_config: bool) {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("utf-8 temp dir");
        let config = root.join("rulehub.toml");
        if write_config {
            std::fs::write(&config, "").expect("write config");
        }
        let cli = Cli {
            manifest: root.join("absent.yaml"),
            config: Some(config),
            ..Cli::default()
        };

        let mut stdout = Vec::new();
        let result = run(&cli, &mut stdout);

        if write_config {
            assert!(matches!(result, Err(AggregatorError::Manifest(_))));
        } else {
            assert!(matches!(result, Err(AggregatorError::Config(_))));
        }
        assert!(stdout.is_empty());
    }
}
