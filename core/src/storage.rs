use std::path::Path;

use tracing::warn;

use crate::checksum::is_secure_file_name;
use crate::error::{LakeError, Result};
use crate::fs::Fs;
use crate::model::ArtifactId;

/// Result of materializing a new artifact: the total byte size moved in, and
/// the creation timestamp recovered from (or written to) `_createdAt.txt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewArtifactInfo {
    pub size: i64,
    pub created_at: i64,
}

/// Moves a set of already-verified input files into content-addressed
/// storage under `storage/<artifact_id>/`, preserving their relative layout
/// within the artifact.
pub struct StorageAdapter;

impl StorageAdapter {
    pub fn new() -> Self {
        Self
    }

    /// `artifacts` are absolute paths under `input`, all verified by a
    /// checksum manifest before this call. `input` and `storage` are
    /// absolute directories; `storage` must already exist.
    pub async fn new_artifact(
        &self,
        fs: &dyn Fs,
        input: &str,
        artifacts: &[String],
        storage: &str,
        id: &ArtifactId,
    ) -> Result<NewArtifactInfo> {
        assert!(!storage.is_empty());
        assert!(!artifacts.is_empty());

        if !fs.is_dir(Path::new(storage)).await {
            return Err(LakeError::NoSuchDirectory(storage.to_string()));
        }

        let dest = Path::new(storage).join(id.as_str());
        if fs.exists(&dest).await {
            return Err(LakeError::ArtifactAlreadyExists(
                dest.to_string_lossy().to_string(),
            ));
        }
        fs.create_dir_all(&dest).await?;

        let mut size = 0i64;
        for file_name in artifacts {
            assert!(is_secure_file_name(file_name));
            assert!(file_name.starts_with(input));

            let name = artifact_relative_name(input, id, file_name);
            let (dir_part, file_part) = split_dir_file(&name);
            let dest_dir = dest.join(&dir_part);
            if !dir_part.is_empty() {
                fs.create_dir_all(&dest_dir).await?;
            }
            let new_path = dest_dir.join(&file_part);

            fs.rename(Path::new(file_name), &new_path).await?;
            size += fs.file_size(&new_path).await as i64;
        }

        let created_at = self.stamp_created_at(fs, &dest).await;

        Ok(NewArtifactInfo { size, created_at })
    }

    /// Creates `_createdAt.txt` with the current epoch if absent (it may
    /// already exist, moved in as part of the artifact's own files, in which
    /// case the original creation time survives). Either way, reads it back
    /// and parses the leading digits, tolerating a trailing newline or other
    /// external formatting.
    async fn stamp_created_at(&self, fs: &dyn Fs, dest: &Path) -> i64 {
        let file = dest.join("_createdAt.txt");
        if !fs.exists(&file).await {
            let now = chrono::Utc::now().timestamp();
            if let Err(e) = fs.write(&file, now.to_string().as_bytes()).await {
                warn!(file = %file.display(), error = %e, "failed to stamp _createdAt.txt");
            }
        }

        match fs.read_to_string(&file).await {
            Ok(contents) => crate::fs::leading_digits(contents.trim_start())
                .parse()
                .unwrap_or(0),
            Err(_) => 0,
        }
    }

    pub async fn remove_artifact(&self, fs: &dyn Fs, storage: &str, id: &ArtifactId) -> Result<()> {
        let path = Path::new(storage).join(id.as_str());
        fs.remove_dir_all(&path).await?;
        Ok(())
    }
}

impl Default for StorageAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps an absolute input-side file path to its path relative to the
/// artifact root it will land at under `storage/<id>/`: strips the `input`
/// prefix and a leading separator, then strips a redundant `<id>/` prefix
/// for the case where the artifact already sits in its own subdirectory
/// under `input` (the case where a manifest drops directly in an input
/// subdirectory named after the artifact).
pub fn artifact_relative_name(input: &str, id: &ArtifactId, file_name: &str) -> String {
    let name = file_name
        .strip_prefix(input)
        .unwrap_or(file_name)
        .trim_start_matches(std::path::MAIN_SEPARATOR)
        .to_string();
    let id_prefix = format!("{}{}", id.as_str(), std::path::MAIN_SEPARATOR);
    name.strip_prefix(&id_prefix)
        .map(|s| s.to_string())
        .unwrap_or(name)
}

/// Splits `name` into its directory component (possibly empty) and final
/// path segment, mirroring Go's `filepath.Split`.
fn split_dir_file(name: &str) -> (String, String) {
    let path = Path::new(name);
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    (dir, file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::RealFs;

    #[tokio::test]
    async fn new_artifact_moves_files_and_reports_size() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("input");
        let storage = root.path().join("storage");
        tokio::fs::create_dir_all(&input).await.unwrap();
        tokio::fs::create_dir_all(&storage).await.unwrap();

        let file1 = input.join("a.bin");
        tokio::fs::write(&file1, b"12345").await.unwrap();

        let fs = RealFs::new();
        let id = ArtifactId::try_from("abc123").unwrap();
        let adapter = StorageAdapter::new();
        let info = adapter
            .new_artifact(
                &fs,
                input.to_str().unwrap(),
                &[file1.to_string_lossy().to_string()],
                storage.to_str().unwrap(),
                &id,
            )
            .await
            .unwrap();

        assert_eq!(info.size, 5);
        assert!(info.created_at > 0);
        assert!(storage.join("abc123").join("a.bin").exists());
        assert!(!file1.exists());
    }

    #[tokio::test]
    async fn new_artifact_rejects_duplicate_id() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("input");
        let storage = root.path().join("storage");
        tokio::fs::create_dir_all(&input).await.unwrap();
        tokio::fs::create_dir_all(storage.join("abc123")).await.unwrap();

        let file1 = input.join("a.bin");
        tokio::fs::write(&file1, b"x").await.unwrap();

        let fs = RealFs::new();
        let id = ArtifactId::try_from("abc123").unwrap();
        let adapter = StorageAdapter::new();
        let err = adapter
            .new_artifact(
                &fs,
                input.to_str().unwrap(),
                &[file1.to_string_lossy().to_string()],
                storage.to_str().unwrap(),
                &id,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LakeError::ArtifactAlreadyExists(_)));
    }
}
