//! Concatenation of discovered rule files into one deployable artifact.
//!
//! Each file contributes a provenance marker naming its path relative to the
//! downloads root, followed by its bytes. Inclusion does not depend on the
//! file's validation status; the combined artifact is validated as a whole
//! afterwards.

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info, warn};
use serde::Serialize;
use std::io::{self, Write};
use tempfile::NamedTempFile;

/// A rule file that could not be read while combining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("could not read {path}: {reason}")]
pub struct CombineReadError {
    /// The file that was skipped.
    pub path: Utf8PathBuf,
    /// Description of the read failure.
    pub reason: String,
}

/// One file's contribution to the combined artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    /// The rule file that was included.
    pub source_file: Utf8PathBuf,
    /// The path written in the provenance marker.
    pub label: String,
    /// Bytes copied from the file, excluding the marker and any added
    /// trailing newline.
    pub byte_length: u64,
}

/// The merged rule file and what went into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombinedArtifact {
    /// Location of the combined file.
    pub path: Utf8PathBuf,
    /// Included files in discovery order.
    pub sections: Vec<Section>,
    /// Files skipped because they could not be read.
    pub skipped: Vec<CombineReadError>,
}

/// Provenance marker written before each file's contents.
#[must_use]
pub fn section_marker(label: &str) -> String {
    format!("\n# ===== From: {label} =====\n")
}

/// Marker label for `file`: its path relative to `downloads_root` with `/`
/// separators, or the full path when it lies elsewhere.
#[must_use]
pub fn section_label(file: &Utf8Path, downloads_root: &Utf8Path) -> String {
    match file.strip_prefix(downloads_root) {
        Ok(relative) => relative
            .components()
            .map(|component| component.as_str())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => file.as_str().to_owned(),
    }
}

/// Combine `files` into `output` in the order given.
///
/// The artifact is assembled in a temporary file beside `output` and renamed
/// into place, so readers see either the previous or the new complete file.
///
/// # Errors
///
/// Returns an error only when the output itself cannot be written. Files
/// that cannot be read are recorded in [`CombinedArtifact::skipped`].
pub fn combine(
    files: &[Utf8PathBuf],
    downloads_root: &Utf8Path,
    output: &Utf8Path,
) -> io::Result<CombinedArtifact> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut staging = NamedTempFile::new_in(dir)?;
    let mut sections = Vec::with_capacity(files.len());
    let mut skipped = Vec::new();

    for file in files {
        let content = match std::fs::read(file) {
            Ok(content) => content,
            Err(err) => {
                warn!("skipping {file}: {err}");
                skipped.push(CombineReadError {
                    path: file.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
        };
        let label = section_label(file, downloads_root);
        let writer = staging.as_file_mut();
        writer.write_all(section_marker(&label).as_bytes())?;
        writer.write_all(&content)?;
        if !content.ends_with(b"\n") {
            writer.write_all(b"\n")?;
        }
        debug!("added {label} ({} bytes)", content.len());
        sections.push(Section {
            source_file: file.clone(),
            label,
            byte_length: content.len() as u64,
        });
    }

    staging.as_file_mut().sync_all()?;
    staging.persist(output).map_err(|err| err.error)?;
    info!(
        "combined {} rule file(s) into {output} ({} skipped)",
        sections.len(),
        skipped.len()
    );

    Ok(CombinedArtifact {
        path: output.to_owned(),
        sections,
        skipped,
    })
}
