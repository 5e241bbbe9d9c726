//! Per-source working areas and rule file discovery.
//!
//! Every source owns one directory under the downloads root, named by
//! [`SourceName::dir_name`]. The directory is recreated empty at the start of
//! each run so content from an earlier run can never reach validation.
//!
//! Discovery walks a working area recursively with entries sorted by file
//! name, which makes the discovered order a pure function of the tree.

use crate::source_name::SourceName;
use camino::{Utf8Path, Utf8PathBuf};
use std::io;

/// File suffix that marks a rule file for validation and combination.
pub const RULE_FILE_SUFFIX: &str = ".rules";

/// A directory exclusively owned by one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceWorkingArea {
    /// The owning source.
    pub source: SourceName,
    /// Directory holding the source's fetched and unpacked files.
    pub path: Utf8PathBuf,
}

impl SourceWorkingArea {
    /// Working area location for `source` under `downloads_root`, without
    /// touching the filesystem.
    #[must_use]
    pub fn locate(downloads_root: &Utf8Path, source: &SourceName) -> Self {
        Self {
            source: source.clone(),
            path: downloads_root.join(source.dir_name()),
        }
    }

    /// Remove any previous contents and create the directory afresh.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from removing or creating the directory.
    pub fn prepare(downloads_root: &Utf8Path, source: &SourceName) -> io::Result<Self> {
        let area = Self::locate(downloads_root, source);
        area.clear()?;
        std::fs::create_dir_all(&area.path)?;
        Ok(area)
    }

    /// Remove the directory and everything in it, if present.
    ///
    /// # Errors
    ///
    /// Returns any I/O error other than the directory being absent.
    pub fn clear(&self) -> io::Result<()> {
        match std::fs::remove_dir_all(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    /// Directory name used for the archive root entry.
    #[must_use]
    pub fn dir_name(&self) -> &str {
        self.path.file_name().unwrap_or(self.path.as_str())
    }

    /// Rule files in this working area in deterministic discovery order.
    ///
    /// Symbolic links are not followed and never reported.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while reading directories.
    pub fn discover_rule_files(&self) -> io::Result<Vec<Utf8PathBuf>> {
        let mut found = Vec::new();
        walk_sorted(&self.path, &mut found)?;
        Ok(found)
    }
}

fn walk_sorted(dir: &Utf8Path, found: &mut Vec<Utf8PathBuf>) -> io::Result<()> {
    let mut entries = dir
        .read_dir_utf8()?
        .collect::<io::Result<Vec<camino::Utf8DirEntry>>>()?;
    entries.sort_by(|a, b| a.file_name().cmp(b.file_name()));

    for entry in entries {
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_sorted(entry.path(), found)?;
        } else if file_type.is_file() && entry.file_name().ends_with(RULE_FILE_SUFFIX) {
            found.push(entry.path().to_owned());
        }
    }
    Ok(())
}
