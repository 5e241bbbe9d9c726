//! End-of-run summaries.
//!
//! The human format mirrors the stage order of the run and lists every
//! terminal state: excluded manifest entries, failed fetches, unpack
//! failures, invalid or unchecked rule files, the combined verdict, and the
//! archives produced. The JSON format carries the same information for
//! scripting.

use crate::pipeline::{RunOutcome, RunReport};
use crate::validation::ValidationStatus;
use serde::Serialize;
use std::fmt::Write as _;

/// Shorten `text` to at most `limit` characters, marking any cut.
///
/// # Examples
///
/// ```
/// use rulehub_aggregator::summary::truncate_diagnostic;
///
/// assert_eq!(truncate_diagnostic("short", 10), "short");
/// assert_eq!(truncate_diagnostic("abcdefgh", 3), "abc...");
/// ```
#[must_use]
pub fn truncate_diagnostic(text: &str, limit: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", trimmed.get(..cut).unwrap_or(trimmed)),
        None => trimmed.to_owned(),
    }
}

/// Short label for the run verdict.
#[must_use]
pub fn outcome_label(outcome: RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Completed => "deployable",
        RunOutcome::EngineUnavailable => "VALIDATION ENGINE UNAVAILABLE",
        RunOutcome::CombinedRejected => "combined rules rejected",
    }
}

/// Render the human-readable summary.
#[must_use]
pub fn format_human(report: &RunReport, diagnostic_limit: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Summary");
    let _ = writeln!(out, "=======");

    let failed_fetches: Vec<_> = report.fetches.iter().filter(|f| !f.succeeded).collect();
    let _ = writeln!(
        out,
        "Sources: {} resolved, {} downloaded, {} failed, {} skipped",
        report.fetches.len(),
        report.fetched_count(),
        failed_fetches.len(),
        report.issues.len()
    );
    for issue in &report.issues {
        let _ = writeln!(out, "  skipped {issue}");
    }
    for fetch in failed_fetches {
        let reason = fetch.error.as_deref().unwrap_or("unknown error");
        let _ = writeln!(
            out,
            "  failed {}: {}",
            fetch.source.name,
            truncate_diagnostic(reason, diagnostic_limit)
        );
    }
    for failure in &report.unpack_failures {
        let _ = writeln!(
            out,
            "  unpack failed {}: {}",
            failure.source_name,
            truncate_diagnostic(&failure.reason, diagnostic_limit)
        );
    }

    let _ = writeln!(
        out,
        "Rule files: {} found, {} valid, {} invalid, {} timed out, {} unvalidated",
        report.rule_files.len(),
        report.count_status(ValidationStatus::Valid),
        report.count_status(ValidationStatus::Invalid),
        report.count_status(ValidationStatus::TimedOut),
        report.count_status(ValidationStatus::Unvalidated)
            + report.count_status(ValidationStatus::EngineMissing),
    );
    for record in report
        .rule_files
        .iter()
        .filter(|r| matches!(r.status, ValidationStatus::Invalid | ValidationStatus::TimedOut))
    {
        let _ = writeln!(out, "  {} {}: {}", record.status, record.source_name, record.path);
        if let Some(diagnostic) = &record.diagnostic {
            let _ = writeln!(out, "    {}", truncate_diagnostic(diagnostic, diagnostic_limit));
        }
    }
    if !report.engine_available {
        let reason = report
            .rule_files
            .iter()
            .find(|r| r.status == ValidationStatus::EngineMissing)
            .and_then(|r| r.diagnostic.as_deref())
            .unwrap_or("validation engine unavailable");
        let _ = writeln!(out, "  engine unavailable: {reason}");
    }

    let combined = &report.combined;
    let verdict = match &report.combined_validation {
        Some(validation) => validation.status.to_string(),
        None => "not validated".to_owned(),
    };
    let _ = writeln!(
        out,
        "Combined: {} ({} section(s), {} skipped) {verdict}",
        combined.path,
        combined.sections.len(),
        combined.skipped.len()
    );
    for skipped in &combined.skipped {
        let _ = writeln!(out, "  {skipped}");
    }
    if let Some(diagnostic) = report
        .combined_validation
        .as_ref()
        .and_then(|v| v.diagnostic.as_deref())
    {
        let _ = writeln!(out, "  {}", truncate_diagnostic(diagnostic, diagnostic_limit));
    }

    let _ = writeln!(
        out,
        "Archives: {} created, {} failed",
        report.archives.len(),
        report.archive_failures.len()
    );
    for entry in &report.archives {
        let _ = writeln!(out, "  {} ({} bytes)", entry.archive_path, entry.size_bytes);
    }
    for failure in &report.archive_failures {
        let _ = writeln!(out, "  failed {}: {}", failure.source_name, failure.reason);
    }

    if let Some(publish) = &report.publish {
        match &publish.unreachable {
            Some(reason) => {
                let _ = writeln!(out, "Publish: skipped, {reason}");
            }
            None => {
                let _ = writeln!(
                    out,
                    "Publish: {} uploaded, {} failed to {}",
                    publish.uploaded.len(),
                    publish.failed.len(),
                    publish.target
                );
            }
        }
        for failure in &publish.failed {
            let _ = writeln!(out, "  failed {}: {}", failure.key, failure.reason);
        }
    }

    let _ = writeln!(out, "Result: {}", outcome_label(report.outcome()));
    out
}

#[derive(Serialize)]
struct JsonFetch<'a> {
    source: &'a str,
    url: &'a str,
    succeeded: bool,
    attempts: u32,
    error: Option<&'a str>,
}

#[derive(Serialize)]
struct JsonIssue {
    source: String,
    reason: String,
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    outcome: &'static str,
    exit_code: i32,
    deployable: bool,
    issues: Vec<JsonIssue>,
    fetches: Vec<JsonFetch<'a>>,
    unpack_failures: &'a [crate::pipeline::UnpackFailure],
    rule_files: &'a [crate::validation::RuleFileRecord],
    engine_available: bool,
    combined: &'a crate::combiner::CombinedArtifact,
    combined_validation: Option<&'a crate::validation::CombinedValidation>,
    archives: &'a [crate::archiver::ArchiveManifestEntry],
    archive_failures: &'a [crate::archiver::ArchiveFailure],
    publish: Option<&'a crate::publisher::PublishReport>,
}

/// Render the summary as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if serialisation fails.
pub fn format_json(report: &RunReport) -> Result<String, serde_json::Error> {
    let outcome = report.outcome();
    let summary = JsonSummary {
        outcome: match outcome {
            RunOutcome::Completed => "completed",
            RunOutcome::EngineUnavailable => "engine_unavailable",
            RunOutcome::CombinedRejected => "combined_rejected",
        },
        exit_code: outcome.exit_code(),
        deployable: report.is_deployable(),
        issues: report
            .issues
            .iter()
            .map(|issue| JsonIssue {
                source: issue.source.clone(),
                reason: issue.to_string(),
            })
            .collect(),
        fetches: report
            .fetches
            .iter()
            .map(|f| JsonFetch {
                source: f.source.name.as_str(),
                url: f.source.url.as_str(),
                succeeded: f.succeeded,
                attempts: f.attempts,
                error: f.error.as_deref(),
            })
            .collect(),
        unpack_failures: &report.unpack_failures,
        rule_files: &report.rule_files,
        engine_available: report.engine_available,
        combined: &report.combined,
        combined_validation: report.combined_validation.as_ref(),
        archives: &report.archives,
        archive_failures: &report.archive_failures,
        publish: report.publish.as_ref(),
    };
    serde_json::to_string_pretty(&summary)
}

#[cfg(test)]
#[path = "summary_tests.rs"]
mod tests;
