//! Shared test utilities for the aggregator crate.
//!
//! Exposed to integration tests through the `test-support` feature.

use crate::fetch::{FetchError, SourceFetcher};
use crate::validation::{EngineOutcome, RuleValidationEngine};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

/// Creates an `ExitStatus` from an exit code (Unix implementation).
#[cfg(unix)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;

    ExitStatus::from_raw(code << 8)
}

/// Creates an `ExitStatus` from an exit code (Windows implementation).
#[cfg(windows)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;

    ExitStatus::from_raw(code as u32)
}

/// A fetcher serving canned payloads from memory.
///
/// URLs without a payload answer with HTTP 404. Every request is recorded so
/// tests can count attempts per URL.
#[derive(Debug, Default)]
pub struct StubFetcher {
    payloads: HashMap<String, Vec<u8>>,
    failures: HashMap<String, u16>,
    requests: Mutex<Vec<String>>,
}

impl StubFetcher {
    /// Creates a fetcher with no payloads.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` for `url`.
    #[must_use]
    pub fn with_payload(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.payloads.insert(url.to_owned(), body.into());
        self
    }

    /// Answer `url` with the given HTTP status.
    #[must_use]
    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.failures.insert(url.to_owned(), status);
        self
    }

    /// URLs requested so far, in request order.
    ///
    /// # Panics
    ///
    /// Panics if the request log mutex is poisoned.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("request log").clone()
    }
}

impl SourceFetcher for StubFetcher {
    fn fetch_to(&self, url: &Url, dest: &Utf8Path) -> Result<u64, FetchError> {
        let key = url.as_str().to_owned();
        self.requests.lock().expect("request log").push(key.clone());
        if let Some(status) = self.failures.get(&key) {
            return Err(FetchError::Status {
                url: key,
                status: *status,
            });
        }
        let Some(body) = self.payloads.get(&key) else {
            return Err(FetchError::NotFound { url: key });
        };
        std::fs::write(dest, body)?;
        Ok(body.len() as u64)
    }
}

type Judge = dyn Fn(&Utf8Path) -> EngineOutcome + Send + Sync;

/// A validation engine whose verdicts come from a closure.
///
/// Every invocation is recorded with its path and timeout.
pub struct StubEngine {
    judge: Box<Judge>,
    invocations: Mutex<Vec<(Utf8PathBuf, Duration)>>,
}

impl std::fmt::Debug for StubEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubEngine")
            .field("invocations", &self.invocations)
            .finish_non_exhaustive()
    }
}

impl StubEngine {
    /// Engine deciding each file with `judge`.
    pub fn new(judge: impl Fn(&Utf8Path) -> EngineOutcome + Send + Sync + 'static) -> Self {
        Self {
            judge: Box::new(judge),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Engine accepting every file.
    #[must_use]
    pub fn accepting() -> Self {
        Self::new(|_| EngineOutcome::Valid)
    }

    /// Engine that is never available.
    #[must_use]
    pub fn missing() -> Self {
        Self::new(|_| {
            EngineOutcome::Unavailable("validation engine `suricata` not found".to_owned())
        })
    }

    /// Engine rejecting any file whose contents contain `marker`.
    #[must_use]
    pub fn rejecting_content(marker: impl Into<String>) -> Self {
        let marker = marker.into();
        Self::new(move |path| match std::fs::read_to_string(path) {
            Ok(content) if content.contains(marker.as_str()) => {
                EngineOutcome::Invalid(format!("rule contains {marker}"))
            }
            Ok(_) => EngineOutcome::Valid,
            Err(err) => EngineOutcome::Invalid(err.to_string()),
        })
    }

    /// Paths checked so far, in invocation order.
    ///
    /// # Panics
    ///
    /// Panics if the invocation log mutex is poisoned.
    pub fn invocations(&self) -> Vec<(Utf8PathBuf, Duration)> {
        self.invocations.lock().expect("invocation log").clone()
    }
}

impl RuleValidationEngine for StubEngine {
    fn check(&self, path: &Utf8Path, timeout: Duration) -> EngineOutcome {
        self.invocations
            .lock()
            .expect("invocation log")
            .push((path.to_owned(), timeout));
        (self.judge)(path)
    }
}
