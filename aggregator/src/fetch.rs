//! Source payload retrieval.
//!
//! Provides a trait-based abstraction over the HTTP transport so the
//! pipeline can be exercised without network access, and the per-source
//! fetch step that never raises: every outcome, including transport failure,
//! comes back as a [`FetchResult`].

use crate::manifest::SourceSpec;
use crate::working_area::SourceWorkingArea;
use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info, warn};
use rulehub::FetchConfig;
use std::time::Duration;
use url::Url;

/// Trait for streaming a remote payload into a local file.
///
/// Abstractions allow tests to mock HTTP behaviour without network access.
#[cfg_attr(test, mockall::automock)]
pub trait SourceFetcher: Send + Sync {
    /// Stream the body at `url` into `dest`, returning the bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the server answers with a
    /// non-success status, or the file cannot be written.
    fn fetch_to(&self, url: &Url, dest: &Utf8Path) -> Result<u64, FetchError>;
}

/// Errors arising from payload retrieval.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Connection, TLS, protocol, or timeout failure.
    #[error("download failed for {url}: {reason}")]
    Transport {
        /// The URL that was requested.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
    },

    /// The payload does not exist (HTTP 404).
    #[error("not found: {url}")]
    NotFound {
        /// The URL that returned 404.
        url: String,
    },

    /// The server answered with another non-success status.
    #[error("HTTP {status} for {url}")]
    Status {
        /// The URL that was requested.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// I/O error writing the downloaded file.
    #[error("I/O error writing download: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Returns true when another attempt may succeed.
    ///
    /// Transport failures, HTTP 429, and HTTP 5xx are transient; missing
    /// payloads, other client errors, and local I/O failures are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::NotFound { .. } | Self::Io(_) => false,
        }
    }
}

/// HTTP-based fetcher using `ureq`.
#[derive(Clone)]
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    /// Create a fetcher whose requests give up after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

impl SourceFetcher for HttpFetcher {
    fn fetch_to(&self, url: &Url, dest: &Utf8Path) -> Result<u64, FetchError> {
        let response = self
            .agent
            .get(url.as_str())
            .call()
            .map_err(|e| map_ureq_error(url.as_str(), &e))?;
        let mut file = std::fs::File::create(dest)?;
        let written = std::io::copy(&mut response.into_body().as_reader(), &mut file).map_err(
            |e| FetchError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            },
        )?;
        Ok(written)
    }
}

/// Map a ureq error to a [`FetchError`].
fn map_ureq_error(url: &str, err: &ureq::Error) -> FetchError {
    match err {
        ureq::Error::StatusCode(404) => FetchError::NotFound {
            url: url.to_owned(),
        },
        ureq::Error::StatusCode(status) => FetchError::Status {
            url: url.to_owned(),
            status: *status,
        },
        other => FetchError::Transport {
            url: url.to_owned(),
            reason: other.to_string(),
        },
    }
}

/// Outcome of fetching one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    /// The source that was fetched.
    pub source: SourceSpec,
    /// The source's working area.
    pub working_area: SourceWorkingArea,
    /// Where the payload was (or would have been) written.
    pub local_payload_path: Utf8PathBuf,
    /// Whether the payload was retrieved.
    pub succeeded: bool,
    /// Failure description when `succeeded` is false.
    pub error: Option<String>,
    /// Number of attempts made, including the first.
    pub attempts: u32,
}

/// Fetch one source into a freshly created working area.
///
/// Transient failures are retried up to `config.retries` times with linear
/// backoff. This function never fails: errors are captured in the returned
/// [`FetchResult`] so sibling sources are unaffected. A failed fetch leaves
/// no working area behind.
pub fn fetch_source(
    fetcher: &dyn SourceFetcher,
    spec: &SourceSpec,
    downloads_root: &Utf8Path,
    config: &FetchConfig,
) -> FetchResult {
    let area = SourceWorkingArea::locate(downloads_root, &spec.name);
    let dest = area.path.join(&spec.file_name);
    let mut result = FetchResult {
        source: spec.clone(),
        working_area: area,
        local_payload_path: dest,
        succeeded: false,
        error: None,
        attempts: 0,
    };

    if let Err(err) = SourceWorkingArea::prepare(downloads_root, &spec.name) {
        warn!("{}: cannot prepare working area: {err}", spec.name);
        result.error = Some(format!("cannot prepare working area: {err}"));
        return result;
    }

    info!("{}: downloading {}", spec.name, spec.url);
    match fetch_with_retry(fetcher, spec, &result.local_payload_path, config) {
        (Ok(bytes), attempts) => {
            info!(
                "{}: downloaded {bytes} bytes to {}",
                spec.name, result.local_payload_path
            );
            result.succeeded = true;
            result.attempts = attempts;
        }
        (Err(err), attempts) => {
            warn!("{}: failed to download after {attempts} attempt(s): {err}", spec.name);
            result.error = Some(err.to_string());
            result.attempts = attempts;
            if let Err(clear_err) = result.working_area.clear() {
                debug!("{}: could not remove working area: {clear_err}", spec.name);
            }
        }
    }
    result
}

fn fetch_with_retry(
    fetcher: &dyn SourceFetcher,
    spec: &SourceSpec,
    dest: &Utf8Path,
    config: &FetchConfig,
) -> (Result<u64, FetchError>, u32) {
    let max_attempts = config.retries.saturating_add(1);
    let mut attempt = 1;
    loop {
        match fetcher.fetch_to(&spec.url, dest) {
            Ok(bytes) => return (Ok(bytes), attempt),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = config.backoff(attempt);
                debug!(
                    "{}: attempt {attempt} failed ({err}); retrying in {} ms",
                    spec.name,
                    delay.as_millis()
                );
                discard_partial(dest);
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => {
                discard_partial(dest);
                return (Err(err), attempt);
            }
        }
    }
}

fn discard_partial(dest: &Utf8Path) {
    if dest.exists() {
        if let Err(err) = std::fs::remove_file(dest) {
            debug!("could not remove partial download {dest}: {err}");
        }
    }
}

#[cfg(test)]
#[path = "fetch_tests.rs"]
mod tests;
