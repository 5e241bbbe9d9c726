//! Shared helpers for aggregator integration tests.

use camino::Utf8Path;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

/// A rule line the stub engines accept.
pub const VALID_RULE: &str = "alert ip any any -> any any (msg:\"test\"; sid:1000001;)\n";

/// A rule line the content-rejecting stub engine refuses.
pub const BROKEN_RULE: &str = "alert BROKEN any any\n";

/// Build an in-memory `.tar.gz` holding `files` as `(path, body)` pairs.
pub fn tar_gz(files: &[(String, String)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, name, body.as_bytes())
            .expect("append entry");
    }
    builder
        .into_inner()
        .expect("tar finish")
        .finish()
        .expect("gzip finish")
}

/// Paths of the regular files inside the `.tar.gz` at `path`.
pub fn archive_file_entries(path: &Utf8Path) -> Vec<String> {
    let file = std::fs::File::open(path).expect("open archive");
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let mut names: Vec<String> = archive
        .entries()
        .expect("entries")
        .map(|entry| entry.expect("entry"))
        .filter(|entry| entry.header().entry_type().is_file())
        .map(|entry| entry.path().expect("path").display().to_string())
        .collect();
    names.sort();
    names
}
