//! Publication of finished archives to an object store.
//!
//! Publishing is a thin interface: confirm the target is reachable, then
//! upload each archive under `<prefix>/<file name>`. The pipeline only
//! publishes a deployable run. [`DirectoryPublisher`] mirrors the bucket
//! layout on a local filesystem, which suits staging hosts and tests; real
//! object-store clients implement [`ArtifactPublisher`] and own their
//! credentials.

use crate::archiver::ArchiveManifestEntry;
use camino::{Utf8Path, Utf8PathBuf};
use log::{info, warn};
use rulehub::PublishConfig;
use serde::Serialize;

/// Errors arising from publication.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The target could not be reached or is not writable.
    #[error("publish target {target} is unreachable: {reason}")]
    Unreachable {
        /// Description of the target.
        target: String,
        /// Why the connectivity check failed.
        reason: String,
    },

    /// An individual upload failed.
    #[error("upload of {key} failed: {reason}")]
    Upload {
        /// The object key being written.
        key: String,
        /// Why the upload failed.
        reason: String,
    },
}

/// Destination capable of storing archives under object keys.
#[cfg_attr(test, mockall::automock)]
pub trait ArtifactPublisher: Send + Sync {
    /// Human-readable description of the target, for logs and summaries.
    fn target(&self) -> String;

    /// Confirm the target is reachable before any upload is attempted.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Unreachable`] when the target cannot be used.
    fn check_connectivity(&self) -> Result<(), PublishError>;

    /// Store the archive described by `entry` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Upload`] when the archive cannot be stored.
    fn upload(&self, entry: &ArchiveManifestEntry, key: &str) -> Result<(), PublishError>;
}

/// One successfully uploaded archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadRecord {
    /// Local archive that was uploaded.
    pub archive_path: Utf8PathBuf,
    /// Object key it was stored under.
    pub key: String,
}

/// One archive that could not be uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadFailure {
    /// Object key that was being written.
    pub key: String,
    /// Why the upload failed.
    pub reason: String,
}

/// Outcome of a publish attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// Description of the target.
    pub target: String,
    /// Connectivity failure, in which case nothing was uploaded.
    pub unreachable: Option<String>,
    /// Archives stored, in archive order.
    pub uploaded: Vec<UploadRecord>,
    /// Archives that failed, in archive order.
    pub failed: Vec<UploadFailure>,
}

impl PublishReport {
    /// Whether every archive reached the target.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unreachable.is_none() && self.failed.is_empty()
    }
}

/// Check connectivity, then upload each archive.
///
/// Upload failures are recorded per archive and do not stop the remaining
/// uploads.
pub fn publish(
    publisher: &dyn ArtifactPublisher,
    entries: &[ArchiveManifestEntry],
    config: &PublishConfig,
) -> PublishReport {
    let mut report = PublishReport {
        target: publisher.target(),
        unreachable: None,
        uploaded: Vec::new(),
        failed: Vec::new(),
    };

    if let Err(err) = publisher.check_connectivity() {
        warn!("skipping publish: {err}");
        report.unreachable = Some(err.to_string());
        return report;
    }
    info!("publishing {} archive(s) to {}", entries.len(), report.target);

    for entry in entries {
        let key = config.key_for(entry.file_name());
        match publisher.upload(entry, &key) {
            Ok(()) => {
                info!("uploaded {} as {key}", entry.archive_path);
                report.uploaded.push(UploadRecord {
                    archive_path: entry.archive_path.clone(),
                    key,
                });
            }
            Err(err) => {
                warn!("{err}");
                report.failed.push(UploadFailure {
                    key,
                    reason: err.to_string(),
                });
            }
        }
    }
    report
}

/// Publisher that mirrors archives to `<root>/<bucket>/<key>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryPublisher {
    bucket_root: Utf8PathBuf,
}

impl DirectoryPublisher {
    /// Create a publisher writing under `root` for the configured bucket.
    #[must_use]
    pub fn new(root: &Utf8Path, config: &PublishConfig) -> Self {
        Self {
            bucket_root: root.join(&config.bucket),
        }
    }

    /// Directory standing in for the bucket.
    #[must_use]
    pub fn bucket_root(&self) -> &Utf8Path {
        &self.bucket_root
    }
}

impl ArtifactPublisher for DirectoryPublisher {
    fn target(&self) -> String {
        self.bucket_root.to_string()
    }

    fn check_connectivity(&self) -> Result<(), PublishError> {
        let unreachable = |reason: String| PublishError::Unreachable {
            target: self.target(),
            reason,
        };
        std::fs::create_dir_all(&self.bucket_root).map_err(|err| unreachable(err.to_string()))?;
        let metadata =
            std::fs::metadata(&self.bucket_root).map_err(|err| unreachable(err.to_string()))?;
        if metadata.permissions().readonly() {
            return Err(unreachable("directory is read-only".to_owned()));
        }
        Ok(())
    }

    fn upload(&self, entry: &ArchiveManifestEntry, key: &str) -> Result<(), PublishError> {
        let failed = |reason: String| PublishError::Upload {
            key: key.to_owned(),
            reason,
        };
        let dest = self.bucket_root.join(key);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|err| failed(err.to_string()))?;
        }
        std::fs::copy(&entry.archive_path, &dest).map_err(|err| failed(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source_name::SourceName;
    use mockall::predicate::eq;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    fn entry(name: &str) -> ArchiveManifestEntry {
        ArchiveManifestEntry {
            source_name: SourceName::from(name),
            archive_path: Utf8PathBuf::from(format!("rules/{name}.tar.gz")),
            size_bytes: 10,
            sha256: "00".repeat(32),
        }
    }

    #[test]
    fn unreachable_target_uploads_nothing() {
        let mut publisher = MockArtifactPublisher::new();
        publisher.expect_target().return_const("s3://suricata-rules".to_owned());
        publisher.expect_check_connectivity().times(1).returning(|| {
            Err(PublishError::Unreachable {
                target: "s3://suricata-rules".to_owned(),
                reason: "no route to host".to_owned(),
            })
        });
        publisher.expect_upload().never();

        let report = publish(&publisher, &[entry("feodo")], &PublishConfig::default());

        assert!(report.unreachable.as_deref().is_some_and(|r| r.contains("no route")));
        assert!(report.uploaded.is_empty());
        assert!(!report.is_complete());
    }

    #[test]
    fn each_archive_is_uploaded_under_prefixed_key() {
        let mut publisher = MockArtifactPublisher::new();
        publisher.expect_target().return_const("mock".to_owned());
        publisher.expect_check_connectivity().returning(|| Ok(()));
        publisher
            .expect_upload()
            .withf(|_, key| key == "rules/feodo.tar.gz")
            .times(1)
            .returning(|_, _| Ok(()));
        publisher
            .expect_upload()
            .withf(|_, key| key == "rules/et_open.tar.gz")
            .times(1)
            .returning(|_, key| {
                Err(PublishError::Upload {
                    key: key.to_owned(),
                    reason: "access denied".to_owned(),
                })
            });

        let report = publish(
            &publisher,
            &[entry("feodo"), entry("et_open")],
            &PublishConfig::default(),
        );

        assert_eq!(report.uploaded.len(), 1);
        assert_eq!(report.uploaded[0].key, "rules/feodo.tar.gz");
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].reason.contains("access denied"));
    }

    #[test]
    fn empty_prefix_uses_bare_file_names() {
        let mut publisher = MockArtifactPublisher::new();
        publisher.expect_target().return_const("mock".to_owned());
        publisher.expect_check_connectivity().returning(|| Ok(()));
        publisher
            .expect_upload()
            .with(eq(entry("feodo")), eq("feodo.tar.gz"))
            .times(1)
            .returning(|_, _| Ok(()));
        let config = PublishConfig {
            prefix: String::new(),
            ..PublishConfig::default()
        };

        let report = publish(&publisher, &[entry("feodo")], &config);

        assert!(report.is_complete());
    }

    struct Mirror {
        _guard: TempDir,
        root: Utf8PathBuf,
    }

    #[fixture]
    fn mirror() -> Mirror {
        let guard = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::try_from(guard.path().to_path_buf()).expect("utf-8 temp dir");
        Mirror {
            _guard: guard,
            root,
        }
    }

    #[rstest]
    fn directory_publisher_mirrors_bucket_layout(mirror: Mirror) {
        let archive = mirror.root.join("feodo.tar.gz");
        std::fs::write(&archive, b"archive bytes").expect("write archive");
        let archived = ArchiveManifestEntry {
            archive_path: archive,
            ..entry("feodo")
        };
        let publisher =
            DirectoryPublisher::new(&mirror.root.join("mirror"), &PublishConfig::default());

        let report = publish(&publisher, &[archived], &PublishConfig::default());

        assert!(report.is_complete(), "{report:?}");
        let stored = mirror.root.join("mirror/suricata-rules/rules/feodo.tar.gz");
        assert_eq!(std::fs::read(stored).expect("read mirror"), b"archive bytes");
        assert_eq!(
            publisher.bucket_root(),
            mirror.root.join("mirror/suricata-rules")
        );
    }

    #[rstest]
    fn directory_publisher_records_missing_archive(mirror: Mirror) {
        let publisher = DirectoryPublisher::new(&mirror.root, &PublishConfig::default());
        let missing = ArchiveManifestEntry {
            archive_path: mirror.root.join("absent.tar.gz"),
            ..entry("absent")
        };

        let report = publish(&publisher, &[missing], &PublishConfig::default());

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key, "rules/absent.tar.gz");
    }

    #[rstest]
    fn blocked_bucket_root_is_unreachable(mirror: Mirror) {
        let blocker = mirror.root.join("file");
        std::fs::write(&blocker, b"not a directory").expect("write");
        let publisher = DirectoryPublisher::new(&blocker, &PublishConfig::default());

        assert!(matches!(
            publisher.check_connectivity(),
            Err(PublishError::Unreachable { .. })
        ));
    }
}
