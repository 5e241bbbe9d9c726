//! Semantic wrapper for rule source names.
//!
//! This module provides the [`SourceName`] newtype for type-safe handling of
//! manifest keys throughout the pipeline, together with the normalisation
//! that turns a name into a working area directory name.

use serde::Serialize;
use std::fmt;

/// A rule source name as written in the manifest.
///
/// The raw name is kept for reporting. Filesystem use goes through
/// [`SourceName::dir_name`], which never yields a path separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SourceName(String);

impl SourceName {
    /// Create a new source name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the source name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory name for this source's working area and archive root.
    ///
    /// Path separators and NUL bytes are replaced with `_`.
    ///
    /// # Examples
    ///
    /// ```
    /// use rulehub_aggregator::source_name::SourceName;
    ///
    /// let name = SourceName::from("et/open");
    /// assert_eq!(name.dir_name(), "et_open");
    /// ```
    #[must_use]
    pub fn dir_name(&self) -> String {
        self.0
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
            .collect()
    }

    /// Returns true when [`Self::dir_name`] can safely name a directory.
    ///
    /// Empty names and the special entries `.` and `..` are unusable.
    #[must_use]
    pub fn has_usable_dir_name(&self) -> bool {
        let dir = self.dir_name();
        !(dir.trim().is_empty() || dir == "." || dir == "..")
    }
}

impl AsRef<str> for SourceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SourceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for SourceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::plain("feodo", "feodo")]
    #[case::slash("et/open", "et_open")]
    #[case::backslash("abuse\\sslbl", "abuse_sslbl")]
    #[case::nested("a/b/c", "a_b_c")]
    fn dir_name_replaces_separators(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(SourceName::from(raw).dir_name(), expected);
    }

    #[rstest]
    #[case::empty("", false)]
    #[case::blank("   ", false)]
    #[case::dot(".", false)]
    #[case::dot_dot("..", false)]
    #[case::hidden(".hidden", true)]
    #[case::slash_only("/", true)]
    fn usable_dir_names(#[case] raw: &str, #[case] usable: bool) {
        assert_eq!(SourceName::from(raw).has_usable_dir_name(), usable);
    }

    #[test]
    fn display_shows_raw_name() {
        assert_eq!(SourceName::from("et/open").to_string(), "et/open");
    }
}
