use std::path::Path;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{CheckedFiles, ChecksumAlgo, is_secure_file_name};
use crate::error::{LakeError, Result};
use crate::fs::Fs;

/// The only checksum algorithm shipped out of the box: sha256sum-format
/// manifests (`<hex digest>  <relative path>` per line).
pub struct Sha256Algo;

#[async_trait]
impl ChecksumAlgo for Sha256Algo {
    async fn sum(&self, fs: &dyn Fs, file_name: &str) -> Result<Vec<u8>> {
        let bytes = fs.read(Path::new(file_name)).await?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hasher.finalize().to_vec())
    }

    async fn check_files(&self, fs: &dyn Fs, checksum_file_name: &str) -> Result<CheckedFiles> {
        let dir = Path::new(checksum_file_name)
            .parent()
            .unwrap_or_else(|| Path::new("/"));

        let contents = fs.read_to_string(Path::new(checksum_file_name)).await?;
        let mut files = CheckedFiles::default();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 2 {
                files.bad.push(line.to_string());
                continue;
            }
            let (checksum, rel_name) = (fields[0], fields[1]);

            if !is_secure_file_name(rel_name) {
                files.bad.push(rel_name.to_string());
                return Err(LakeError::UnsecureFileName(rel_name.to_string()));
            }

            let abs_name = dir.join(rel_name);
            let abs_name_str = abs_name.to_string_lossy().to_string();

            let sum = match self.sum(fs, &abs_name_str).await {
                Ok(s) => s,
                Err(_) => {
                    files.bad.push(abs_name_str);
                    continue;
                }
            };

            if !checksum.eq_ignore_ascii_case(&hex::encode(&sum)) {
                files.bad.push(abs_name_str);
                continue;
            }
            files.good.push(abs_name_str);
        }

        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::RealFs;
    use std::path::PathBuf;

    fn digest_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    #[tokio::test]
    async fn sum_matches_manual_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let fs = RealFs::new();
        let digest = Sha256Algo.sum(&fs, path.to_str().unwrap()).await.unwrap();
        assert_eq!(hex::encode(&digest), digest_hex(b"hello world"));
    }

    #[tokio::test]
    async fn check_files_partitions_good_and_bad() {
        let dir = tempfile::tempdir().unwrap();
        let good_path: PathBuf = dir.path().join("good.bin");
        let bad_path: PathBuf = dir.path().join("bad.bin");
        tokio::fs::write(&good_path, b"good contents").await.unwrap();
        tokio::fs::write(&bad_path, b"tampered").await.unwrap();

        let manifest = dir.path().join("x.sha256sum");
        let manifest_body = format!(
            "{}  good.bin\n{}  bad.bin\n",
            digest_hex(b"good contents"),
            digest_hex(b"untampered"),
        );
        tokio::fs::write(&manifest, manifest_body).await.unwrap();

        let fs = RealFs::new();
        let files = Sha256Algo
            .check_files(&fs, manifest.to_str().unwrap())
            .await
            .unwrap();

        assert_eq!(files.good, vec![good_path.to_string_lossy().to_string()]);
        assert_eq!(files.bad, vec![bad_path.to_string_lossy().to_string()]);
    }

    #[tokio::test]
    async fn check_files_rejects_unsecure_names() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("x.sha256sum");
        tokio::fs::write(&manifest, "deadbeef  ../escape.bin\n")
            .await
            .unwrap();

        let fs = RealFs::new();
        let err = Sha256Algo
            .check_files(&fs, manifest.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, LakeError::UnsecureFileName(_)));
    }
}
