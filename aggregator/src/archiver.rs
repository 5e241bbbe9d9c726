//! Per-source archive packaging.
//!
//! Each successfully unpacked working area is packed into
//! `<rules_dir>/<dir_name>.tar.gz` with the directory itself as the single
//! root entry, so expanding the archive recreates `<dir_name>/...`. The
//! archive index (`index.json`) lists every archive with its size and
//! SHA-256 digest and is the artifact list handed to the publisher.

use crate::source_name::SourceName;
use crate::working_area::SourceWorkingArea;
use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;
use log::info;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;

/// Errors arising from archive packaging.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// I/O error reading the working area or writing the archive.
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The archive index could not be serialised.
    #[error("failed to serialise archive index: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A produced archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveManifestEntry {
    /// The source the archive was built from.
    pub source_name: SourceName,
    /// Location of the archive.
    pub archive_path: Utf8PathBuf,
    /// Archive size on disk.
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the archive.
    pub sha256: String,
}

impl ArchiveManifestEntry {
    /// File name of the archive, used to derive upload keys.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.archive_path
            .file_name()
            .unwrap_or(self.archive_path.as_str())
    }
}

/// An archive that could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveFailure {
    /// The source whose working area could not be archived.
    pub source_name: SourceName,
    /// Description of the failure.
    pub reason: String,
}

#[derive(Serialize)]
struct ArchiveIndex<'a> {
    archives: &'a [ArchiveManifestEntry],
}

/// Archive path for a working area inside `rules_dir`.
#[must_use]
pub fn archive_path_for(area: &SourceWorkingArea, rules_dir: &Utf8Path) -> Utf8PathBuf {
    rules_dir.join(format!("{}.tar.gz", area.dir_name()))
}

/// Pack `area` into a gzip-compressed tar in `rules_dir`.
///
/// Symbolic links are stored as links, not followed.
///
/// # Errors
///
/// Returns [`ArchiveError::Io`] if the working area cannot be read or the
/// archive cannot be written.
pub fn archive_working_area(
    area: &SourceWorkingArea,
    rules_dir: &Utf8Path,
) -> Result<ArchiveManifestEntry, ArchiveError> {
    let archive_path = archive_path_for(area, rules_dir);
    if let Err(err) = write_tar_gz(area, &archive_path) {
        let _ = fs::remove_file(&archive_path);
        return Err(err);
    }

    let size_bytes = fs::metadata(&archive_path)?.len();
    let sha256 = compute_sha256(&archive_path)?;
    let size_mb = size_bytes as f64 / (1024.0 * 1024.0);
    info!("{}: created {archive_path} ({size_mb:.2} MB)", area.source);

    Ok(ArchiveManifestEntry {
        source_name: area.source.clone(),
        archive_path,
        size_bytes,
        sha256,
    })
}

fn write_tar_gz(area: &SourceWorkingArea, archive_path: &Utf8Path) -> Result<(), ArchiveError> {
    let output_file = fs::File::create(archive_path)?;
    let mut builder = tar::Builder::new(GzEncoder::new(output_file, Compression::default()));
    builder.follow_symlinks(false);
    builder.mode(tar::HeaderMode::Deterministic);
    builder.append_dir_all(area.dir_name(), &area.path)?;
    builder.into_inner()?.finish()?;
    Ok(())
}

/// Remove archives an earlier run left in `rules_dir`.
///
/// Only top-level `*.tar.gz` files are removed. The archive index and any
/// other content are left in place. Returns the number of files removed.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be listed or an archive
/// cannot be removed.
pub fn remove_stale_archives(rules_dir: &Utf8Path) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(rules_dir)? {
        let entry = entry?;
        let is_archive = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(".tar.gz"));
        if is_archive && entry.file_type()?.is_file() {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    if removed > 0 {
        info!("removed {removed} stale archive(s) from {rules_dir}");
    }
    Ok(removed)
}

/// Compute the lowercase hex SHA-256 digest of a file.
///
/// # Errors
///
/// Returns [`ArchiveError::Io`] if the file cannot be read.
pub fn compute_sha256(path: &Utf8Path) -> Result<String, ArchiveError> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(buffer.get(..bytes_read).unwrap_or_default());
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Write the archive index as pretty-printed JSON.
///
/// # Errors
///
/// Returns [`ArchiveError`] on serialisation or write failure.
pub fn write_archive_index(
    entries: &[ArchiveManifestEntry],
    path: &Utf8Path,
) -> Result<(), ArchiveError> {
    let json = serde_json::to_string_pretty(&ArchiveIndex { archives: entries })?;
    fs::write(path, json + "\n")?;
    Ok(())
}
