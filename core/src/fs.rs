use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Filesystem abstraction the storage adapter, probe, and checksum/metadata
/// parsers are written against, so they can be exercised with an in-memory
/// fake instead of touching disk in tests.
#[async_trait]
pub trait Fs: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;
    async fn is_dir(&self, path: &Path) -> bool;
    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;
    async fn read_to_string(&self, path: &Path) -> std::io::Result<String>;
    async fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;
    async fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()>;
    async fn remove_file(&self, path: &Path) -> std::io::Result<()>;
    async fn remove_dir_all(&self, path: &Path) -> std::io::Result<()>;
    async fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()>;
    async fn file_size(&self, path: &Path) -> u64;
    /// Walks the directory tree rooted at `root`, skipping any path whose
    /// last component ends in `.git`, yielding every file path found.
    async fn walk_files(&self, root: &Path) -> std::io::Result<Vec<PathBuf>>;
}

/// Real filesystem, backed by `tokio::fs`.
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RealFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fs for RealFs {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn is_dir(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
        tokio::fs::write(path, contents).await
    }

    async fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn remove_dir_all(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::remove_dir_all(path).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        tokio::fs::rename(from, to).await
    }

    async fn file_size(&self, path: &Path) -> u64 {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.len())
            .unwrap_or(0)
    }

    async fn walk_files(&self, root: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let mut rd = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            while let Some(entry) = rd.next_entry().await? {
                let path = entry.path();
                if path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".git"))
                {
                    continue;
                }
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    stack.push(path);
                } else {
                    out.push(path);
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

/// Returns the first path component after `root`, or `""` if `path` names a
/// file directly inside `root` with no intermediate directory.
pub fn first_subdir(root: &str, path: &str) -> String {
    let rest = path.strip_prefix(root).unwrap_or(path);
    let rest = rest.trim_start_matches(std::path::MAIN_SEPARATOR);
    let mut parts = rest.splitn(2, std::path::MAIN_SEPARATOR);
    let first = parts.next().unwrap_or_default();
    if parts.next().is_none() {
        String::new()
    } else {
        first.to_string()
    }
}

/// Returns the run of leading ASCII digits in `s`.
pub fn leading_digits(s: &str) -> &str {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_subdir_direct_child() {
        assert_eq!(first_subdir("/mnt/input/project", "/mnt/input/project/1234.crc"), "");
    }

    #[test]
    fn first_subdir_nested() {
        assert_eq!(
            first_subdir("/mnt/input/project", "/mnt/input/project/rel-4.2.2/1234.crc"),
            "rel-4.2.2"
        );
    }

    #[test]
    fn leading_digits_examples() {
        assert_eq!(leading_digits("1699999999 extra"), "1699999999");
        assert_eq!(leading_digits("no-digits"), "");
        assert_eq!(leading_digits("123"), "123");
    }
}
