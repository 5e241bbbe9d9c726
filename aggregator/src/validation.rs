//! Rule validation through an external engine.
//!
//! The engine is a black box behind [`RuleValidationEngine`]: given a rule
//! file and a time limit it answers valid, invalid (with diagnostics), timed
//! out, or unavailable. [`SubprocessEngine`] runs the configured program in
//! test-configuration mode; tests substitute mocks or stubs.
//!
//! Per-file validation runs on the caller's rayon pool. The only shared state
//! between invocations is an atomic flag raised when the engine turns out to
//! be unavailable, after which files not yet started are left
//! [`ValidationStatus::Unvalidated`].

use crate::source_name::SourceName;
use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info, warn};
use rayon::prelude::*;
use rulehub::ValidationConfig;
use serde::Serialize;
use std::fmt;
use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use wait_timeout::ChildExt;

/// Answer from one engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    /// The engine accepted the file.
    Valid,
    /// The engine rejected the file; carries its diagnostic output.
    Invalid(String),
    /// The invocation exceeded its time limit and was killed.
    TimedOut,
    /// The engine could not be run or failed for reasons unrelated to the
    /// rules themselves.
    Unavailable(String),
}

/// Capability to check a rule file for syntactic validity.
#[cfg_attr(test, mockall::automock)]
pub trait RuleValidationEngine: Send + Sync {
    /// Check the rules in `path`, giving up after `timeout`.
    fn check(&self, path: &Utf8Path, timeout: Duration) -> EngineOutcome;
}

/// Engine that runs `<program> <args...> <file>` as a child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubprocessEngine {
    program: String,
    args: Vec<String>,
}

impl SubprocessEngine {
    /// Create an engine invoking `program` with `args` before the file path.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Create an engine from the validation section of the configuration.
    #[must_use]
    pub fn from_config(config: &ValidationConfig) -> Self {
        Self::new(config.engine.clone(), config.args.clone())
    }

    /// The program this engine runs.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl RuleValidationEngine for SubprocessEngine {
    fn check(&self, path: &Utf8Path, timeout: Duration) -> EngineOutcome {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(path.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return EngineOutcome::Unavailable(format!(
                    "validation engine `{}` not found",
                    self.program
                ));
            }
            Err(err) => {
                return EngineOutcome::Unavailable(format!(
                    "failed to start `{}`: {err}",
                    self.program
                ));
            }
        };

        // Drain both pipes concurrently so a chatty engine cannot block on a
        // full pipe while we wait for it to exit.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        match child.wait_timeout(timeout) {
            Ok(Some(status)) => {
                let stdout = stdout.join().unwrap_or_default();
                let stderr = stderr.join().unwrap_or_default();
                classify_exit(status, &stdout, &stderr)
            }
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                debug!("{path}: killed `{}` after {:?}", self.program, timeout);
                EngineOutcome::TimedOut
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                EngineOutcome::Unavailable(format!("failed to wait for `{}`: {err}", self.program))
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Map an engine exit status to an outcome.
///
/// Exit 0 is valid and exit 1 is a rule rejection. Anything else, including
/// termination by signal, means the engine itself is not usable.
fn classify_exit(status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> EngineOutcome {
    let diagnostic = || {
        let stderr = String::from_utf8_lossy(stderr);
        let text = if stderr.trim().is_empty() {
            String::from_utf8_lossy(stdout)
        } else {
            stderr
        };
        text.trim().to_owned()
    };
    match status.code() {
        Some(0) => EngineOutcome::Valid,
        Some(1) => EngineOutcome::Invalid(diagnostic()),
        Some(code) => EngineOutcome::Unavailable(format!(
            "engine exited with status {code}: {}",
            diagnostic()
        )),
        None => EngineOutcome::Unavailable("engine terminated by signal".to_owned()),
    }
}

/// Validation state of a rule file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Not checked, because the engine became unavailable first.
    Unvalidated,
    /// Accepted by the engine.
    Valid,
    /// Rejected by the engine.
    Invalid,
    /// The engine did not answer in time.
    TimedOut,
    /// The engine could not be run.
    EngineMissing,
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unvalidated => "unvalidated",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::TimedOut => "timed out",
            Self::EngineMissing => "engine missing",
        };
        f.write_str(label)
    }
}

/// A discovered rule file and its validation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleFileRecord {
    /// Location of the rule file.
    pub path: Utf8PathBuf,
    /// The source whose working area holds the file.
    pub source_name: SourceName,
    /// Validation state.
    pub status: ValidationStatus,
    /// Engine diagnostic or failure reason, when there is one.
    pub diagnostic: Option<String>,
}

impl RuleFileRecord {
    /// A freshly discovered, not yet validated file.
    #[must_use]
    pub fn pending(source_name: SourceName, path: Utf8PathBuf) -> Self {
        Self {
            path,
            source_name,
            status: ValidationStatus::Unvalidated,
            diagnostic: None,
        }
    }

    fn apply(&mut self, outcome: EngineOutcome, timeout: Duration) {
        let (status, diagnostic) = status_for(outcome, timeout);
        self.status = status;
        self.diagnostic = diagnostic;
    }
}

fn status_for(outcome: EngineOutcome, timeout: Duration) -> (ValidationStatus, Option<String>) {
    match outcome {
        EngineOutcome::Valid => (ValidationStatus::Valid, None),
        EngineOutcome::Invalid(diagnostic) => (ValidationStatus::Invalid, Some(diagnostic)),
        EngineOutcome::TimedOut => (
            ValidationStatus::TimedOut,
            Some(format!("validation timed out after {} s", timeout.as_secs())),
        ),
        EngineOutcome::Unavailable(reason) => (ValidationStatus::EngineMissing, Some(reason)),
    }
}

/// Result of validating every discovered file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileValidation {
    /// One record per discovered file, in discovery order.
    pub records: Vec<RuleFileRecord>,
    /// False once any invocation reported the engine unavailable.
    pub engine_available: bool,
}

/// Validate each pending record on the current rayon pool.
///
/// Records keep their input order. When an invocation reports the engine
/// unavailable, invocations that have not yet started are skipped and their
/// records stay [`ValidationStatus::Unvalidated`].
pub fn validate_files(
    engine: &dyn RuleValidationEngine,
    pending: Vec<RuleFileRecord>,
    timeout: Duration,
) -> FileValidation {
    let unavailable = AtomicBool::new(false);
    let records = pending
        .into_par_iter()
        .map(|mut record| {
            if unavailable.load(Ordering::SeqCst) {
                debug!("{}: skipped, engine unavailable", record.path);
                return record;
            }
            let outcome = engine.check(&record.path, timeout);
            if matches!(outcome, EngineOutcome::Unavailable(_)) {
                unavailable.store(true, Ordering::SeqCst);
            }
            record.apply(outcome, timeout);
            log_record(&record);
            record
        })
        .collect();

    FileValidation {
        records,
        engine_available: !unavailable.load(Ordering::SeqCst),
    }
}

fn log_record(record: &RuleFileRecord) {
    match record.status {
        ValidationStatus::Valid => info!("{}: {} valid", record.source_name, record.path),
        ValidationStatus::EngineMissing => warn!(
            "{}: validation engine unavailable: {}",
            record.source_name,
            record.diagnostic.as_deref().unwrap_or_default()
        ),
        status => warn!("{}: {} {status}", record.source_name, record.path),
    }
}

/// Validation result for the combined artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombinedValidation {
    /// The combined file that was checked.
    pub path: Utf8PathBuf,
    /// Validation state.
    pub status: ValidationStatus,
    /// Engine diagnostic or failure reason, when there is one.
    pub diagnostic: Option<String>,
}

impl CombinedValidation {
    /// Whether the artifact may be deployed.
    #[must_use]
    pub fn is_deployable(&self) -> bool {
        self.status == ValidationStatus::Valid
    }
}

/// Validate the combined artifact once.
pub fn validate_combined(
    engine: &dyn RuleValidationEngine,
    path: &Utf8Path,
    timeout: Duration,
) -> CombinedValidation {
    info!("validating combined rules file {path}");
    let (status, diagnostic) = status_for(engine.check(path, timeout), timeout);
    match status {
        ValidationStatus::Valid => info!("combined rules file is valid"),
        other => warn!("combined rules file is {other}"),
    }
    CombinedValidation {
        path: path.to_owned(),
        status,
        diagnostic,
    }
}

#[cfg(test)]
#[path = "validation_tests.rs"]
mod tests;
