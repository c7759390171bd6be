use std::path::Path;

use tracing::warn;

use crate::checksum::{CheckedFiles, ChecksumRegistry};
use crate::fs::{Fs, leading_digits};
use crate::metadata::MetaRegistry;
use crate::model::FileState;

/// A point-in-time read of whatever sits at a storage location, independent
/// of what the index believes is there. Used both to materialize a freshly
/// ingested artifact and to re-verify an existing one during the broken/
/// dangling scans.
#[derive(Debug, Clone, Default)]
pub struct DiskArtifact {
    pub location: String,
    pub all_files: Vec<String>,
    pub files: CheckedFiles,
    pub checksum: String,
    pub checksum_file: String,
    pub created_at: i64,
    pub created_at_file: String,
    pub size: i64,
    /// Set when the checksum manifest could not be verified at all (missing,
    /// unreadable, or not a recognized checksum format). Distinct from
    /// `files.bad` being non-empty, which means the manifest itself is fine
    /// but lists files that fail their own check.
    pub checksum_error: Option<String>,
}

impl DiskArtifact {
    /// Walks `location` on disk, finds its one checksum manifest (if any),
    /// and verifies it. Used by the broken/dangling scans, which only know a
    /// storage path and must rediscover everything else.
    pub async fn walk(fs: &dyn Fs, checksums: &ChecksumRegistry, location: &str) -> Self {
        let mut da = DiskArtifact {
            location: location.to_string(),
            ..Default::default()
        };

        let files = match fs.walk_files(Path::new(location)).await {
            Ok(files) => files,
            Err(e) => {
                da.checksum_error = Some(format!("unable to walk {location}: {e}"));
                return da;
            }
        };

        for path in files {
            let name = path.to_string_lossy().to_string();
            if checksums.is_checksum_file(&name) {
                if !da.checksum_file.is_empty() {
                    warn!(existing = %da.checksum_file, found = %name, "second checksum file detected");
                    da.all_files.push(name);
                    continue;
                }
                da.checksum_file = name.clone();
            }
            da.all_files.push(name);
        }

        da.process_checksum_file(fs, checksums).await;
        da
    }

    /// Starts from an already-known checksum manifest path, as produced by
    /// the input watcher when a new `*.sha256sum` file appears.
    pub async fn from_checksum_file(fs: &dyn Fs, checksums: &ChecksumRegistry, checksum_file: &str) -> Self {
        let mut da = DiskArtifact {
            checksum_file: checksum_file.to_string(),
            ..Default::default()
        };
        da.process_checksum_file(fs, checksums).await;
        da
    }

    async fn process_checksum_file(&mut self, fs: &dyn Fs, checksums: &ChecksumRegistry) {
        if self.checksum_file.is_empty() {
            self.checksum_error = Some("no checksum file found".to_string());
            return;
        }

        match checksums.check_checksum(fs, &self.checksum_file).await {
            Ok((checksum, files)) => {
                self.checksum = checksum;
                self.files = files;
            }
            Err(e) => {
                self.checksum_error = Some(e.to_string());
            }
        }

        if !self.files.good.contains(&self.checksum_file) {
            warn!(checksum_file = %self.checksum_file, "checksum file is not in checksum file");
            self.files.good.push(self.checksum_file.clone());
        }

        let dir = Path::new(&self.checksum_file)
            .parent()
            .unwrap_or_else(|| Path::new("/"));
        self.created_at_file = dir.join("_createdAt.txt").to_string_lossy().to_string();
        if fs.exists(Path::new(&self.created_at_file)).await
            && !self.files.good.contains(&self.created_at_file)
        {
            warn!(file = %self.created_at_file, "createdAt file is not in checksum file");
            self.files.good.push(self.created_at_file.clone());
        }
        self.files.good.sort();
        self.all_files.sort();

        self.created_at = match fs.read_to_string(Path::new(&self.created_at_file)).await {
            Ok(contents) => leading_digits(contents.trim_start()).parse().unwrap_or(0),
            Err(_) => 0,
        };

        let mut size = 0i64;
        for file in &self.files.good {
            size += fs.file_size(Path::new(file)).await as i64;
        }
        self.size = size;
    }

    /// Merges every `*_export.txt`-style metadata file found among the good
    /// files into one key/value map (later files win on key collision).
    pub async fn artifact_meta(&self, fs: &dyn Fs, metas: &MetaRegistry) -> Vec<(String, String)> {
        let mut merged = std::collections::BTreeMap::new();
        for f in &self.files.good {
            if !metas.is_meta_file(f) {
                continue;
            }
            if let Ok(Some(kv)) = metas.parse_meta_file(fs, f).await {
                merged.extend(kv);
            }
        }
        merged.into_iter().collect()
    }

    /// True when the checksum manifest verified cleanly and lists no broken
    /// files. Does not require a prior [`DiskArtifact::walk`] call — usable
    /// right after [`DiskArtifact::from_checksum_file`] to gate ingest of a
    /// freshly dropped manifest.
    pub fn checksum_ok(&self) -> bool {
        self.checksum_error.is_none() && self.files.bad.is_empty()
    }

    /// Full health invariant, only meaningful for a probe
    /// built via [`DiskArtifact::walk`] (where `all_files` is populated):
    /// the checksum verified, no bad files, and the good set accounts for
    /// every file found under the location.
    pub fn is_healthy(&self) -> bool {
        let mut good_sorted = self.files.good.clone();
        good_sorted.sort();
        self.checksum_ok()
            && good_sorted.len() == self.all_files.len()
            && good_sorted == self.all_files
    }

    /// Builds the per-file entry list: name relative to `location`, size,
    /// and good/bad state.
    pub async fn artifact_files(&self, fs: &dyn Fs) -> Vec<(String, i64, FileState)> {
        let mut out = Vec::new();
        let rel_name = |path: &str| {
            path.strip_prefix(&self.location)
                .unwrap_or(path)
                .trim_start_matches(std::path::MAIN_SEPARATOR)
                .to_string()
        };

        for f in &self.files.good {
            let size = fs.file_size(Path::new(f)).await as i64;
            out.push((rel_name(f), size, FileState::Ok));
        }
        for f in &self.files.bad {
            out.push((rel_name(f), 0, FileState::Broken));
        }
        if !self.files.good.contains(&self.checksum_file) && !self.checksum_file.is_empty() {
            out.push((rel_name(&self.checksum_file), 0, FileState::Ok));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::RealFs;
    use sha2::{Digest, Sha256};

    fn digest_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    #[tokio::test]
    async fn walk_discovers_manifest_and_verifies_files() {
        let dir = tempfile::tempdir().unwrap();
        let payload = dir.path().join("data.bin");
        tokio::fs::write(&payload, b"payload").await.unwrap();

        let body = format!("{}  data.bin\n", digest_hex(b"payload"));
        let manifest_digest = digest_hex(body.as_bytes());
        let manifest_name = dir.path().join(format!("{manifest_digest}.sha256sum"));
        tokio::fs::write(&manifest_name, &body).await.unwrap();

        let fs = RealFs::new();
        let checksums = ChecksumRegistry::new();
        let da = DiskArtifact::walk(&fs, &checksums, dir.path().to_str().unwrap()).await;

        assert!(da.checksum_error.is_none(), "{:?}", da.checksum_error);
        assert!(da.files.bad.is_empty());
        assert!(da.size > 0);
        assert!(da.is_healthy());
    }

    #[tokio::test]
    async fn tampered_file_breaks_health_invariant() {
        let dir = tempfile::tempdir().unwrap();
        let payload = dir.path().join("data.bin");
        tokio::fs::write(&payload, b"payload").await.unwrap();

        let body = format!("{}  data.bin\n", digest_hex(b"payload"));
        let manifest_digest = digest_hex(body.as_bytes());
        let manifest_name = dir.path().join(format!("{manifest_digest}.sha256sum"));
        tokio::fs::write(&manifest_name, &body).await.unwrap();

        // tamper after the manifest was written
        tokio::fs::write(&payload, b"tampered").await.unwrap();

        let fs = RealFs::new();
        let checksums = ChecksumRegistry::new();
        let da = DiskArtifact::walk(&fs, &checksums, dir.path().to_str().unwrap()).await;

        assert!(!da.is_healthy());
        assert!(!da.checksum_ok());
    }
}
