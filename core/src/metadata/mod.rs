mod export;

use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

pub use export::ShellExportAlgo;

use crate::error::Result;
use crate::fs::Fs;

/// One metadata-file format: parses a file into key/value pairs, or signals
/// `None` when the file's content doesn't match this format at all (so the
/// registry can try the next one).
#[async_trait]
pub trait MetaAlgo: Send + Sync {
    async fn parse_meta_file(
        &self,
        fs: &dyn Fs,
        file_name: &str,
    ) -> Result<Option<std::collections::BTreeMap<String, String>>>;
}

#[derive(Clone)]
struct MetaAlgoInfo {
    prio: i32,
    pattern: String,
    algo: Arc<dyn MetaAlgo>,
}

/// Priority-ordered, glob-pattern-keyed set of metadata parsers.
pub struct MetaRegistry {
    algos: RwLock<Vec<MetaAlgoInfo>>,
}

impl Default for MetaRegistry {
    fn default() -> Self {
        let registry = Self {
            algos: RwLock::new(Vec::new()),
        };
        registry.register(100_000, "_export.txt", Arc::new(ShellExportAlgo));
        registry
    }
}

impl MetaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, prio: i32, pattern: &str, algo: Arc<dyn MetaAlgo>) {
        let mut algos = self.algos.write().unwrap();
        assert!(
            !algos.iter().any(|a| a.prio == prio),
            "metadata algo priority {prio} already registered"
        );
        algos.push(MetaAlgoInfo {
            prio,
            pattern: pattern.to_string(),
            algo,
        });
        algos.sort_by_key(|a| a.prio);
    }

    pub fn is_meta_file(&self, path: &str) -> bool {
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

    /// Parses `meta_file_name` with the first registered algorithm whose
    /// pattern matches the basename and whose parser accepts the content.
    /// Returns `Ok(None)` if no registered algorithm recognizes the file —
    /// this is not an error, the file is simply not a metadata file.
    pub async fn parse_meta_file(
        &self,
        fs: &dyn Fs,
        meta_file_name: &str,
    ) -> Result<Option<std::collections::BTreeMap<String, String>>> {
        debug_assert!(meta_file_name.starts_with('/'));
        let file_name = Path::new(meta_file_name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("");

        // Clone the matching entries out from under the read lock before
        // awaiting anything: a `RwLockReadGuard` held across an `.await`
        // makes the future `!Send`, which breaks `tokio::spawn`.
        let matching: Vec<MetaAlgoInfo> = self
            .algos
            .read()
            .unwrap()
            .iter()
            .filter(|it| glob_match(&it.pattern, file_name))
            .cloned()
            .collect();

        for it in matching {
            match it.algo.parse_meta_file(fs, meta_file_name).await? {
                Some(meta) => return Ok(Some(meta)),
                None => continue,
            }
        }
        Ok(None)
    }
}

/// Exact-match glob: every metadata pattern registered in this codebase
/// (`_export.txt`) has no wildcard, unlike checksum patterns.
fn glob_match(pattern: &str, name: &str) -> bool {
    pattern == name
}
