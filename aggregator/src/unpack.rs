//! Payload classification and archive expansion.
//!
//! Archive payloads (`.tar.gz`) are expanded into the source's working area
//! and then deleted so their contents are not counted twice downstream. Rule
//! files and unrecognised payloads stay where the fetcher put them.
//!
//! Archives come from third parties, so every entry path is checked before
//! extraction to guard against path traversal (zip-slip), including the
//! targets of symbolic and hard links.

use crate::fetch::FetchResult;
use crate::manifest::DeclaredType;
use crate::working_area::SourceWorkingArea;
use camino::Utf8Path;
use flate2::read::GzDecoder;
use log::{debug, info, warn};
use std::path::{Component, Path};
use tar::EntryType;

/// Errors arising from payload unpacking.
#[derive(Debug, thiserror::Error)]
pub enum UnpackError {
    /// The source was not fetched, so there is nothing to unpack.
    #[error("payload was not fetched")]
    NotFetched,

    /// I/O error during extraction, including corrupt archives.
    #[error("extraction I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A path in the archive attempts to traverse outside the working area.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// The offending path from the archive entry.
        path: String,
    },

    /// A link entry points outside the working area.
    #[error("link {path} points outside the archive: {target}")]
    UnsafeLink {
        /// The link entry path.
        path: String,
        /// The link target.
        target: String,
    },

    /// The archive contains no files.
    #[error("archive contains no files")]
    EmptyArchive,
}

/// Unpack a fetched payload in place.
///
/// On failure the working area is removed so a partially extracted source
/// contributes nothing to later stages.
///
/// # Errors
///
/// Returns [`UnpackError::NotFetched`] for failed fetches and any extraction
/// error for archive payloads.
pub fn unpack(fetched: &FetchResult) -> Result<SourceWorkingArea, UnpackError> {
    if !fetched.succeeded {
        return Err(UnpackError::NotFetched);
    }
    let area = &fetched.working_area;
    let name = &fetched.source.name;

    match fetched.source.declared_type {
        DeclaredType::Archive => {
            let outcome = extract_tar_gz(&fetched.local_payload_path, &area.path)
                .and_then(|count| {
                    std::fs::remove_file(&fetched.local_payload_path)?;
                    Ok(count)
                });
            match outcome {
                Ok(count) => {
                    info!("{name}: extracted {count} file(s) into {}", area.path);
                    Ok(area.clone())
                }
                Err(err) => {
                    warn!("{name}: failed to extract {}: {err}", fetched.local_payload_path);
                    if let Err(clear_err) = area.clear() {
                        debug!("{name}: could not remove working area: {clear_err}");
                    }
                    Err(err)
                }
            }
        }
        DeclaredType::SingleRuleFile => {
            info!("{name}: rule file saved to {}", area.path);
            Ok(area.clone())
        }
        DeclaredType::Unknown => {
            info!("{name}: unknown file type, saved to {}", area.path);
            Ok(area.clone())
        }
    }
}

/// Extract the gzip-compressed tar at `archive_path` into `dest_dir`.
///
/// Returns the number of regular files extracted. Entry kinds other than
/// files, directories, and links (devices, FIFOs, global headers) are
/// skipped.
///
/// # Errors
///
/// Returns [`UnpackError::PathTraversal`] or [`UnpackError::UnsafeLink`] if
/// any entry would escape `dest_dir`, [`UnpackError::EmptyArchive`] if no
/// files are found, and [`UnpackError::Io`] on corrupt input or I/O failure.
pub fn extract_tar_gz(archive_path: &Utf8Path, dest_dir: &Utf8Path) -> Result<usize, UnpackError> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let mut extracted = 0_usize;

    for entry_result in archive.entries()? {
        let mut entry = entry_result?;
        let entry_path = entry.path()?.into_owned();
        validate_entry_path(&entry_path)?;

        let entry_type = entry.header().entry_type();
        match entry_type {
            EntryType::Symlink | EntryType::Link => {
                let target = entry
                    .link_name()?
                    .map(|link| link.into_owned())
                    .unwrap_or_default();
                validate_link_target(&entry_path, &target)?;
            }
            EntryType::Regular
            | EntryType::Continuous
            | EntryType::GNUSparse
            | EntryType::Directory => {}
            other => {
                debug!("skipping {other:?} entry {}", entry_path.display());
                continue;
            }
        }

        entry.unpack_in(dest_dir)?;
        if entry_type.is_file() || entry_type.is_gnu_sparse() || entry_type.is_contiguous() {
            extracted += 1;
        }
    }

    if extracted == 0 {
        return Err(UnpackError::EmptyArchive);
    }
    Ok(extracted)
}

/// Validate that a tar entry path does not escape the destination
/// directory via `..` components or absolute paths.
fn validate_entry_path(path: &Path) -> Result<(), UnpackError> {
    if escapes(path) {
        return Err(UnpackError::PathTraversal {
            path: path.display().to_string(),
        });
    }
    Ok(())
}

fn validate_link_target(path: &Path, target: &Path) -> Result<(), UnpackError> {
    if target.as_os_str().is_empty() || escapes(target) {
        return Err(UnpackError::UnsafeLink {
            path: path.display().to_string(),
            target: target.display().to_string(),
        });
    }
    Ok(())
}

fn escapes(path: &Path) -> bool {
    path.is_absolute()
        || path.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        })
}

#[cfg(test)]
#[path = "unpack_tests.rs"]
mod tests;
