mod sha256;

use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

pub use sha256::Sha256Algo;

use crate::error::{LakeError, Result};
use crate::fs::Fs;

/// Good/bad split of files listed by a checksum manifest, with absolute
/// paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckedFiles {
    pub good: Vec<String>,
    pub bad: Vec<String>,
}

/// One checksum algorithm: computes a manifest file's own digest, and
/// verifies every file the manifest lists.
#[async_trait]
pub trait ChecksumAlgo: Send + Sync {
    async fn sum(&self, fs: &dyn Fs, file_name: &str) -> Result<Vec<u8>>;
    async fn check_files(&self, fs: &dyn Fs, checksum_file_name: &str) -> Result<CheckedFiles>;
}

#[derive(Clone)]
struct ChecksumAlgoInfo {
    prio: i32,
    pattern: String,
    algo: Arc<dyn ChecksumAlgo>,
}

/// Priority-ordered, glob-pattern-keyed set of checksum algorithms. Lower
/// priority numbers are tried first; registration keeps the list sorted.
pub struct ChecksumRegistry {
    algos: RwLock<Vec<ChecksumAlgoInfo>>,
}

impl Default for ChecksumRegistry {
    fn default() -> Self {
        let registry = Self {
            algos: RwLock::new(Vec::new()),
        };
        registry.register(100_000, "*.sha256sum", Arc::new(Sha256Algo));
        registry
    }
}

impl ChecksumRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, prio: i32, pattern: &str, algo: Arc<dyn ChecksumAlgo>) {
        let mut algos = self.algos.write().unwrap();
        assert!(
            !algos.iter().any(|a| a.prio == prio),
            "checksum algo priority {prio} already registered"
        );
        algos.push(ChecksumAlgoInfo {
            prio,
            pattern: pattern.to_string(),
            algo,
        });
        algos.sort_by_key(|a| a.prio);
    }

    /// True if `path`'s basename matches any registered checksum pattern.
    /// `path` must be absolute.
    pub fn is_checksum_file(&self, path: &str) -> bool {
        debug_assert!(path.starts_with('/'), "path must be absolute: {path}");
        let file_name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("");
        self.algos
            .read()
            .unwrap()
            .iter()
            .any(|it| glob_match(&it.pattern, file_name))
    }

    /// Verifies `checksum_file_name` (an absolute path): its own digest must
    /// match its basename, and every file it lists must check out. Returns
    /// the hex digest plus the good/bad split.
    pub async fn check_checksum(
        &self,
        fs: &dyn Fs,
        checksum_file_name: &str,
    ) -> Result<(String, CheckedFiles)> {
        debug_assert!(checksum_file_name.starts_with('/'));
        let file_name = Path::new(checksum_file_name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("");

        // Clone the matching entries out from under the read lock before
        // awaiting anything: a `RwLockReadGuard` held across an `.await`
        // makes the future `!Send`, which breaks `tokio::spawn`.
        let matching: Vec<ChecksumAlgoInfo> = self
            .algos
            .read()
            .unwrap()
            .iter()
            .filter(|it| glob_match(&it.pattern, file_name))
            .cloned()
            .collect();

        for it in matching {
            let digest = match it.algo.sum(fs, checksum_file_name).await {
                Ok(d) => d,
                Err(_) => continue,
            };
            let expected = it.pattern.replacen('*', &hex::encode(&digest), 1);
            if expected != file_name {
                continue;
            }
            let files = it.algo.check_files(fs, checksum_file_name).await?;
            if !files.bad.is_empty() {
                return Err(LakeError::ChecksumFileHasBrokenFiles(
                    checksum_file_name.to_string(),
                ));
            }
            return Ok((hex::encode(&digest), files));
        }

        Err(LakeError::IsNotChecksumFile(checksum_file_name.to_string()))
    }
}

/// Minimal glob: supports a single `*` wildcard, as used by every pattern
/// registered in this codebase (`*.sha256sum`).
fn glob_match(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == name,
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
    }
}

/// Rejects names containing `..`, `./`, or `:` — defends the join in
/// [`Sha256Algo::check_files`] against path traversal out of the checksum
/// file's directory.
pub fn is_secure_file_name(name: &str) -> bool {
    !(name.contains("..") || name.contains("./") || name.contains(':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_suffix_pattern() {
        assert!(glob_match("*.sha256sum", "abc123.sha256sum"));
        assert!(!glob_match("*.sha256sum", "abc123.md5sum"));
    }

    #[test]
    fn secure_file_name_rejects_traversal() {
        assert!(is_secure_file_name("data.bin"));
        assert!(!is_secure_file_name("../etc/passwd"));
        assert!(!is_secure_file_name("./hidden"));
        assert!(!is_secure_file_name("C:windows"));
    }

    #[test]
    fn registry_recognizes_default_sha256sum_pattern() {
        let reg = ChecksumRegistry::new();
        assert!(reg.is_checksum_file("/mnt/storage/artifact/abc.sha256sum"));
        assert!(!reg.is_checksum_file("/mnt/storage/artifact/abc.txt"));
    }
}
