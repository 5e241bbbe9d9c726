//! Source manifest resolution.
//!
//! A manifest is a document with a top-level `sources` mapping from source
//! name to a descriptor holding at least a `url`. Resolution turns it into an
//! ordered list of [`SourceSpec`] records. Manifest order is preserved
//! because it determines the order rule files are combined in.
//!
//! Entries that cannot be fetched (a malformed descriptor, no URL, an
//! unparseable URL, or a URL without a file name) are excluded and reported
//! as [`ManifestIssue`]s while their siblings resolve normally.
//! Duplicate names reject the whole manifest: two entries would otherwise
//! share one working area.

use crate::source_name::SourceName;
use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, warn};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use url::Url;

/// Payload kind declared for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclaredType {
    /// A gzip-compressed tar archive expanded into the working area.
    Archive,
    /// A single rule file used as-is.
    #[serde(alias = "rules", alias = "rule")]
    SingleRuleFile,
    /// Anything else; kept in place without interpretation.
    Unknown,
}

impl DeclaredType {
    /// Classify a payload by its file name suffix.
    ///
    /// # Examples
    ///
    /// ```
    /// use rulehub_aggregator::manifest::DeclaredType;
    ///
    /// assert_eq!(DeclaredType::from_file_name("emerging.rules.tar.gz"), DeclaredType::Archive);
    /// assert_eq!(DeclaredType::from_file_name("feodo.rules"), DeclaredType::SingleRuleFile);
    /// assert_eq!(DeclaredType::from_file_name("blocklist.txt"), DeclaredType::Unknown);
    /// ```
    #[must_use]
    pub fn from_file_name(file_name: &str) -> Self {
        if file_name.ends_with(".tar.gz") || file_name.ends_with(".tgz") {
            Self::Archive
        } else if file_name.ends_with(".rules") || file_name.ends_with(".rule") {
            Self::SingleRuleFile
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Archive => "archive",
            Self::SingleRuleFile => "rule file",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// One resolved, fetchable rule source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    /// Unique manifest key.
    pub name: SourceName,
    /// Fetch location.
    pub url: Url,
    /// Payload kind, from the manifest hint or the file name suffix.
    pub declared_type: DeclaredType,
    /// Final path segment of the URL, used as the payload file name.
    pub file_name: String,
}

/// Why a manifest entry was excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestIssueKind {
    /// The descriptor has no `url`, or it is blank.
    MissingUrl,
    /// The `url` could not be parsed.
    InvalidUrl {
        /// Parser message.
        reason: String,
    },
    /// The URL path has no final segment to name the payload after.
    NoFileName,
    /// The name cannot be turned into a directory name.
    InvalidName,
    /// The descriptor is not a mapping of the expected shape.
    InvalidDescriptor {
        /// Deserializer message.
        reason: String,
    },
}

/// A non-fatal problem found while resolving the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestIssue {
    /// The raw manifest key of the excluded entry.
    pub source: String,
    /// What was wrong with it.
    pub kind: ManifestIssueKind,
}

impl fmt::Display for ManifestIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ManifestIssueKind::MissingUrl => write!(f, "{}: no URL found", self.source),
            ManifestIssueKind::InvalidUrl { reason } => {
                write!(f, "{}: invalid URL: {reason}", self.source)
            }
            ManifestIssueKind::NoFileName => {
                write!(f, "{}: URL path has no file name", self.source)
            }
            ManifestIssueKind::InvalidName => {
                write!(f, "{:?}: name cannot be used as a directory", self.source)
            }
            ManifestIssueKind::InvalidDescriptor { reason } => {
                write!(f, "{}: malformed descriptor: {reason}", self.source)
            }
        }
    }
}

/// Fatal manifest errors.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest file could not be read.
    #[error("failed to read manifest {path}: {source}")]
    Read {
        /// Manifest path.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The manifest is not a well-formed document of the expected shape.
    #[error("failed to parse {format} manifest: {reason}")]
    Parse {
        /// Serialization format that was attempted.
        format: ManifestFormat,
        /// Parser message.
        reason: String,
    },

    /// Two entries map to the same working area.
    #[error("duplicate source {name:?} (working area {dir_name:?} already used by {first:?})")]
    DuplicateSource {
        /// The later, rejected entry.
        name: String,
        /// The entry that claimed the working area first.
        first: String,
        /// The shared directory name.
        dir_name: String,
    },
}

/// Serialization format of a manifest document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    /// YAML, the reference format.
    Yaml,
    /// JSON.
    Json,
    /// TOML.
    Toml,
}

impl ManifestFormat {
    /// Choose a format from a file extension; anything unrecognised is YAML.
    #[must_use]
    pub fn from_path(path: &Utf8Path) -> Self {
        match path.extension().map(str::to_ascii_lowercase).as_deref() {
            Some("json") => Self::Json,
            Some("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }
}

impl fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Yaml => "YAML",
            Self::Json => "JSON",
            Self::Toml => "TOML",
        };
        f.write_str(label)
    }
}

/// Outcome of resolving a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedManifest {
    /// Fetchable sources in manifest order.
    pub sources: Vec<SourceSpec>,
    /// Excluded entries, in manifest order.
    pub issues: Vec<ManifestIssue>,
}

#[derive(Debug, Default, Deserialize)]
struct RawManifest {
    #[serde(default)]
    sources: Option<RawSources>,
}

/// Source entries in document order.
///
/// Descriptors stay untyped here so that one malformed entry is reported on
/// its own instead of failing the whole document.
#[derive(Debug, Default)]
struct RawSources(Vec<(String, serde_json::Value)>);

impl<'de> Deserialize<'de> for RawSources {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = RawSources;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a mapping from source name to source descriptor")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, serde_json::Value>()? {
                    entries.push(entry);
                }
                Ok(RawSources(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawSource {
    #[serde(default)]
    url: Option<String>,
    #[serde(default, rename = "type")]
    declared_type: Option<DeclaredType>,
}

/// Read and resolve the manifest at `path`.
///
/// # Errors
///
/// Returns [`ManifestError::Read`] if the file cannot be read, otherwise the
/// errors of [`resolve_manifest`].
pub fn load_manifest(path: &Utf8Path) -> Result<ResolvedManifest, ManifestError> {
    let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_owned(),
        source,
    })?;
    resolve_manifest(&content, ManifestFormat::from_path(path))
}

/// Resolve manifest `content` written in `format`.
///
/// # Examples
///
/// ```
/// use rulehub_aggregator::manifest::{ManifestFormat, resolve_manifest};
///
/// let content = r#"{"sources": {"feodo": {"url": "https://example.test/feodo.rules"}}}"#;
/// let resolved = resolve_manifest(content, ManifestFormat::Json)?;
/// assert_eq!(resolved.sources.len(), 1);
/// assert_eq!(resolved.sources[0].file_name, "feodo.rules");
/// # Ok::<(), rulehub_aggregator::manifest::ManifestError>(())
/// ```
///
/// # Errors
///
/// Returns [`ManifestError::Parse`] for malformed documents and
/// [`ManifestError::DuplicateSource`] when two entries share a working area.
pub fn resolve_manifest(
    content: &str,
    format: ManifestFormat,
) -> Result<ResolvedManifest, ManifestError> {
    let raw = parse_raw(content, format)?;
    let entries = raw.sources.unwrap_or_default().0;

    reject_duplicates(&entries)?;

    let mut resolved = ResolvedManifest::default();
    for (name, descriptor) in entries {
        match resolve_entry(&name, descriptor) {
            Ok(spec) => {
                debug!(
                    "resolved source {} ({}) from {}",
                    spec.name, spec.declared_type, spec.url
                );
                resolved.sources.push(spec);
            }
            Err(kind) => {
                let issue = ManifestIssue { source: name, kind };
                warn!("skipping manifest entry {issue}");
                resolved.issues.push(issue);
            }
        }
    }
    Ok(resolved)
}

fn parse_raw(content: &str, format: ManifestFormat) -> Result<RawManifest, ManifestError> {
    let parse_error = |reason: String| ManifestError::Parse { format, reason };
    match format {
        // An empty YAML document deserialises to nothing rather than a mapping.
        ManifestFormat::Yaml if content.trim().is_empty() => Ok(RawManifest::default()),
        ManifestFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|err| parse_error(err.to_string()))
        }
        ManifestFormat::Json => {
            serde_json::from_str(content).map_err(|err| parse_error(err.to_string()))
        }
        ManifestFormat::Toml => toml::from_str(content).map_err(|err| parse_error(err.to_string())),
    }
}

fn reject_duplicates(entries: &[(String, serde_json::Value)]) -> Result<(), ManifestError> {
    let mut seen: HashMap<String, &str> = HashMap::with_capacity(entries.len());
    for (name, _) in entries {
        let dir_name = SourceName::from(name.as_str()).dir_name();
        if let Some(first) = seen.get(&dir_name) {
            return Err(ManifestError::DuplicateSource {
                name: name.clone(),
                first: (*first).to_owned(),
                dir_name,
            });
        }
        seen.insert(dir_name, name.as_str());
    }
    Ok(())
}

fn resolve_entry(
    name: &str,
    descriptor: serde_json::Value,
) -> Result<SourceSpec, ManifestIssueKind> {
    let source_name = SourceName::from(name);
    if !source_name.has_usable_dir_name() {
        return Err(ManifestIssueKind::InvalidName);
    }
    let descriptor = parse_descriptor(descriptor)?;

    let raw_url = descriptor
        .url
        .filter(|url| !url.trim().is_empty())
        .ok_or(ManifestIssueKind::MissingUrl)?;
    let url = Url::parse(raw_url.trim()).map_err(|err| ManifestIssueKind::InvalidUrl {
        reason: err.to_string(),
    })?;
    let file_name = payload_file_name(&url).ok_or(ManifestIssueKind::NoFileName)?;
    let declared_type = descriptor
        .declared_type
        .unwrap_or_else(|| DeclaredType::from_file_name(&file_name));

    Ok(SourceSpec {
        name: source_name,
        url,
        declared_type,
        file_name,
    })
}

/// Type one descriptor. An empty entry is a descriptor without a URL.
fn parse_descriptor(value: serde_json::Value) -> Result<RawSource, ManifestIssueKind> {
    if value.is_null() {
        return Ok(RawSource::default());
    }
    RawSource::deserialize(value).map_err(|err| ManifestIssueKind::InvalidDescriptor {
        reason: err.to_string(),
    })
}

/// Final non-empty path segment of `url`, if any.
fn payload_file_name(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    if segment.is_empty() || segment == "." || segment == ".." {
        return None;
    }
    Some(segment.to_owned())
}

#[cfg(test)]
#[path = "manifest_tests.rs"]
mod tests;
