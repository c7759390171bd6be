use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;

use super::MetaAlgo;
use crate::error::Result;
use crate::fs::Fs;

const DECLARE_PREFIX: &str = "declare -x ";
const EXPORT_PREFIX: &str = "export ";

/// Parses `_export.txt` files produced by `declare -x` or `export -p`: one
/// `KEY=VALUE` assignment per line, value quoted with `"` (declare) or `'`
/// (export). The whole file must use one style consistently.
pub struct ShellExportAlgo;

#[async_trait]
impl MetaAlgo for ShellExportAlgo {
    async fn parse_meta_file(
        &self,
        fs: &dyn Fs,
        file_name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let data = fs.read_to_string(Path::new(file_name)).await?;

        let (prefix, quote) = if data.starts_with(DECLARE_PREFIX) {
            (DECLARE_PREFIX, '"')
        } else if data.starts_with(EXPORT_PREFIX) {
            (EXPORT_PREFIX, '\'')
        } else {
            return Ok(None);
        };

        let mut meta = BTreeMap::new();
        for line in data.split('\n') {
            if line.is_empty() || line == "\r" {
                continue;
            }
            let Some(rest) = line.strip_prefix(prefix) else {
                return Ok(None);
            };
            let Some((key, value)) = rest.split_once('=') else {
                return Ok(None);
            };
            meta.insert(key.to_string(), value.trim_matches(quote).to_string());
        }

        Ok(Some(meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::RealFs;

    #[tokio::test]
    async fn parses_declare_style() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("_export.txt");
        tokio::fs::write(&path, "declare -x BUILD_ID=\"42\"\ndeclare -x REPO=\"demo\"\n")
            .await
            .unwrap();

        let fs = RealFs::new();
        let meta = ShellExportAlgo
            .parse_meta_file(&fs, path.to_str().unwrap())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(meta.get("BUILD_ID"), Some(&"42".to_string()));
        assert_eq!(meta.get("REPO"), Some(&"demo".to_string()));
    }

    #[tokio::test]
    async fn parses_export_style() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("_export.txt");
        tokio::fs::write(&path, "export BUILD_ID='42'\nexport REPO='demo'\n")
            .await
            .unwrap();

        let fs = RealFs::new();
        let meta = ShellExportAlgo
            .parse_meta_file(&fs, path.to_str().unwrap())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(meta.get("BUILD_ID"), Some(&"42".to_string()));
    }

    #[tokio::test]
    async fn unrecognized_format_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("_export.txt");
        tokio::fs::write(&path, "BUILD_ID=42\n").await.unwrap();

        let fs = RealFs::new();
        let meta = ShellExportAlgo
            .parse_meta_file(&fs, path.to_str().unwrap())
            .await
            .unwrap();

        assert!(meta.is_none());
    }
}
