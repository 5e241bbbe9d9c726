//! Stage orchestration for one aggregation run.
//!
//! Stages run in a fixed order. Work inside a stage runs on a bounded rayon
//! pool, and every parallel stage collects in input order, so each record
//! list in the [`RunReport`] follows manifest (or discovery) order whatever
//! the scheduling:
//!
//! 1. acquire: fetch and unpack each source;
//! 2. discovery of rule files, sequentially;
//! 3. validation of each rule file;
//! 4. combination into one artifact;
//! 5. validation of the combined artifact;
//! 6. archiving of each unpacked source, plus the archive index, after
//!    removing archives left by an earlier run;
//! 7. publication, when a target is configured and the run is deployable.
//!
//! Per-source and per-file failures are recorded and never stop the run.

use crate::archiver::{
    ArchiveFailure, ArchiveManifestEntry, archive_working_area, remove_stale_archives,
    write_archive_index,
};
use crate::combiner::{CombinedArtifact, combine};
use crate::error::{AggregatorError, Result};
use crate::fetch::{FetchResult, SourceFetcher, fetch_source};
use crate::manifest::{ManifestIssue, ResolvedManifest};
use crate::publisher::{ArtifactPublisher, PublishReport, publish};
use crate::source_name::SourceName;
use crate::unpack::unpack;
use crate::validation::{
    CombinedValidation, RuleFileRecord, RuleValidationEngine, ValidationStatus,
    validate_combined, validate_files,
};
use crate::working_area::SourceWorkingArea;
use camino::Utf8Path;
use log::{info, warn};
use rayon::prelude::*;
use rulehub::PipelineConfig;
use serde::Serialize;

/// Collaborators the pipeline drives.
#[derive(Clone, Copy)]
pub struct PipelineServices<'a> {
    /// Retrieves source payloads.
    pub fetcher: &'a dyn SourceFetcher,
    /// Checks rule files.
    pub engine: &'a dyn RuleValidationEngine,
    /// Optional publish target.
    pub publisher: Option<&'a dyn ArtifactPublisher>,
}

/// A fetched source whose payload could not be unpacked, or whose working
/// area could not be scanned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnpackFailure {
    /// The affected source.
    pub source_name: SourceName,
    /// Description of the failure.
    pub reason: String,
}

/// Overall verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every stage ran and the combined artifact is deployable.
    Completed,
    /// The validation engine could not be run.
    EngineUnavailable,
    /// The engine rejected the combined artifact or did not answer in time.
    CombinedRejected,
}

impl RunOutcome {
    /// Process exit code for this outcome.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::EngineUnavailable => 2,
            Self::CombinedRejected => 3,
        }
    }
}

/// Everything a run produced, stage by stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Manifest entries excluded at resolve time.
    pub issues: Vec<ManifestIssue>,
    /// One fetch result per resolved source.
    pub fetches: Vec<FetchResult>,
    /// Fetched sources that contributed nothing downstream.
    pub unpack_failures: Vec<UnpackFailure>,
    /// Discovered rule files with their validation results.
    pub rule_files: Vec<RuleFileRecord>,
    /// False when the engine turned out to be unavailable.
    pub engine_available: bool,
    /// The combined artifact.
    pub combined: CombinedArtifact,
    /// Result of validating the combined artifact; absent when skipped.
    pub combined_validation: Option<CombinedValidation>,
    /// Archives produced, in source order.
    pub archives: Vec<ArchiveManifestEntry>,
    /// Archives that could not be produced.
    pub archive_failures: Vec<ArchiveFailure>,
    /// Publication outcome, when publishing was attempted.
    pub publish: Option<PublishReport>,
}

impl RunReport {
    /// Overall verdict.
    #[must_use]
    pub fn outcome(&self) -> RunOutcome {
        if !self.engine_available {
            return RunOutcome::EngineUnavailable;
        }
        match self.combined_validation.as_ref().map(|c| c.status) {
            Some(ValidationStatus::Valid) => RunOutcome::Completed,
            Some(ValidationStatus::EngineMissing) | None => RunOutcome::EngineUnavailable,
            Some(_) => RunOutcome::CombinedRejected,
        }
    }

    /// Whether the combined artifact may be deployed.
    #[must_use]
    pub fn is_deployable(&self) -> bool {
        self.outcome() == RunOutcome::Completed
    }

    /// Number of sources fetched successfully.
    #[must_use]
    pub fn fetched_count(&self) -> usize {
        self.fetches.iter().filter(|f| f.succeeded).count()
    }

    /// Number of rule files with the given status.
    #[must_use]
    pub fn count_status(&self, status: ValidationStatus) -> usize {
        self.rule_files.iter().filter(|r| r.status == status).count()
    }
}

/// Run every stage for the resolved manifest.
///
/// # Errors
///
/// Returns an error only for run-level failures: an output location that
/// cannot be created or written, or a worker pool that cannot be started.
pub fn run_pipeline(
    config: &PipelineConfig,
    manifest: &ResolvedManifest,
    services: PipelineServices<'_>,
) -> Result<RunReport> {
    ensure_dir(&config.downloads_dir)?;
    ensure_dir(&config.rules_dir)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.jobs)
        .build()
        .map_err(|err| AggregatorError::WorkerPool {
            reason: err.to_string(),
        })?;

    info!(
        "processing {} source(s) with {} worker(s)",
        manifest.sources.len(),
        config.jobs
    );
    let acquired = pool.install(|| acquire_sources(config, manifest, services.fetcher));
    let mut fetches = Vec::with_capacity(acquired.len());
    let mut areas = Vec::new();
    let mut unpack_failures = Vec::new();
    for (fetched, unpacked) in acquired {
        match unpacked {
            Some(Ok(area)) => areas.push(area),
            Some(Err(reason)) => unpack_failures.push(UnpackFailure {
                source_name: fetched.source.name.clone(),
                reason,
            }),
            None => {}
        }
        fetches.push(fetched);
    }

    let (areas, pending) = discover(areas, &mut unpack_failures);
    info!("validating {} rule file(s)", pending.len());
    let validation = pool.install(|| {
        validate_files(services.engine, pending, config.validation.file_timeout())
    });

    let paths: Vec<_> = validation.records.iter().map(|r| r.path.clone()).collect();
    let combined = combine(&paths, &config.downloads_dir, &config.combined_file).map_err(
        |source| AggregatorError::OutputDir {
            path: config.combined_file.clone(),
            source,
        },
    )?;

    let combined_validation = if validation.engine_available {
        Some(validate_combined(
            services.engine,
            &combined.path,
            config.validation.combined_timeout(),
        ))
    } else {
        warn!("validation engine unavailable; skipping combined validation");
        None
    };

    remove_stale_archives(&config.rules_dir).map_err(|source| AggregatorError::OutputDir {
        path: config.rules_dir.clone(),
        source,
    })?;
    let archived: Vec<_> = pool.install(|| {
        areas
            .par_iter()
            .map(|area| {
                archive_working_area(area, &config.rules_dir).map_err(|err| {
                    warn!("{}: failed to archive: {err}", area.source);
                    ArchiveFailure {
                        source_name: area.source.clone(),
                        reason: err.to_string(),
                    }
                })
            })
            .collect()
    });
    let (archives, archive_failures) = split_results(archived);
    let index_path = config.archive_index_path();
    write_archive_index(&archives, &index_path).map_err(|source| {
        AggregatorError::ArchiveIndex {
            path: index_path.clone(),
            source,
        }
    })?;

    let mut report = RunReport {
        issues: manifest.issues.clone(),
        fetches,
        unpack_failures,
        rule_files: validation.records,
        engine_available: validation.engine_available,
        combined,
        combined_validation,
        archives,
        archive_failures,
        publish: None,
    };

    if let Some(publisher) = services.publisher {
        if report.is_deployable() {
            report.publish = Some(publish(publisher, &report.archives, &config.publish));
        } else {
            warn!("run is not deployable; skipping publish");
        }
    }
    Ok(report)
}

type Acquired = (FetchResult, Option<std::result::Result<SourceWorkingArea, String>>);

fn acquire_sources(
    config: &PipelineConfig,
    manifest: &ResolvedManifest,
    fetcher: &dyn SourceFetcher,
) -> Vec<Acquired> {
    manifest
        .sources
        .par_iter()
        .map(|spec| {
            let fetched = fetch_source(fetcher, spec, &config.downloads_dir, &config.fetch);
            let unpacked = fetched
                .succeeded
                .then(|| unpack(&fetched).map_err(|err| err.to_string()));
            (fetched, unpacked)
        })
        .collect()
}

/// Scan each working area in source order.
///
/// Areas that cannot be scanned are recorded as failures and dropped.
fn discover(
    areas: Vec<SourceWorkingArea>,
    failures: &mut Vec<UnpackFailure>,
) -> (Vec<SourceWorkingArea>, Vec<RuleFileRecord>) {
    let mut kept = Vec::with_capacity(areas.len());
    let mut pending = Vec::new();
    for area in areas {
        match area.discover_rule_files() {
            Ok(files) => {
                info!("{}: found {} rule file(s)", area.source, files.len());
                pending.extend(
                    files
                        .into_iter()
                        .map(|path| RuleFileRecord::pending(area.source.clone(), path)),
                );
                kept.push(area);
            }
            Err(err) => {
                warn!("{}: cannot scan {}: {err}", area.source, area.path);
                failures.push(UnpackFailure {
                    source_name: area.source.clone(),
                    reason: format!("cannot scan working area: {err}"),
                });
            }
        }
    }
    (kept, pending)
}

fn split_results<T, E>(results: Vec<std::result::Result<T, E>>) -> (Vec<T>, Vec<E>) {
    let mut ok = Vec::new();
    let mut failed = Vec::new();
    for result in results {
        match result {
            Ok(value) => ok.push(value),
            Err(err) => failed.push(err),
        }
    }
    (ok, failed)
}

fn ensure_dir(path: &Utf8Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|source| AggregatorError::OutputDir {
        path: path.to_owned(),
        source,
    })
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
