use serde::{Deserialize, Serialize};

use super::ids::{ArtifactId, RepoId};

/// Bitmask over an artifact's health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactState(i32);

impl ArtifactState {
    pub const OK: ArtifactState = ArtifactState(0);
    pub const BROKEN: ArtifactState = ArtifactState(1);
    pub const EXPIRED: ArtifactState = ArtifactState(2);

    pub fn from_bits(bits: i32) -> Self {
        ArtifactState(bits)
    }

    pub fn bits(self) -> i32 {
        self.0
    }

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    pub fn is_broken(self) -> bool {
        self.0 & Self::BROKEN.0 != 0
    }

    pub fn is_expired(self) -> bool {
        self.0 & Self::EXPIRED.0 != 0
    }

    #[must_use]
    pub fn with_broken(self) -> Self {
        ArtifactState(self.0 | Self::BROKEN.0)
    }

    #[must_use]
    pub fn with_expired(self) -> Self {
        ArtifactState(self.0 | Self::EXPIRED.0)
    }
}

impl Default for ArtifactState {
    fn default() -> Self {
        Self::OK
    }
}

/// File entry state, rolled up into the owning artifact's BROKEN bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileState {
    Ok,
    Broken,
}

impl FileState {
    pub fn from_bits(bits: i32) -> Self {
        if bits == 0 { FileState::Ok } else { FileState::Broken }
    }

    pub fn bits(self) -> i32 {
        match self {
            FileState::Ok => 0,
            FileState::Broken => 1,
        }
    }
}

/// A verified, immutable bundle inside one [`crate::model::Repo`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub repo_id: RepoId,
    pub artifact_id: ArtifactId,
    pub storage: String,
    pub size: i64,
    pub state: ArtifactState,
    pub created_at: i64,
    pub expired_at: i64,
    pub checksum: String,
    pub meta: Vec<ArtifactMetaEntry>,
    pub files: Vec<ArtifactFileEntry>,
}

impl Artifact {
    /// Validates invariants that apply independent of storage.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::LakeError;

        if self.size <= 0 {
            return Err(LakeError::InvalidArtifact(format!(
                "size must be > 0, got {}",
                self.size
            )));
        }
        if self.created_at <= 0 {
            return Err(LakeError::InvalidArtifact(
                "created_at must be > 0".into(),
            ));
        }
        if self.expired_at <= 0 {
            return Err(LakeError::InvalidArtifact(
                "expired_at must be > 0".into(),
            ));
        }
        if self.created_at == self.expired_at && self.state.is_expired() {
            return Err(LakeError::InvalidArtifact(
                "non-expiring artifact (created_at == expired_at) cannot be marked expired".into(),
            ));
        }
        for m in &self.meta {
            if m.repo_id != self.repo_id || m.artifact_id != self.artifact_id {
                return Err(LakeError::IncorrectMetaId);
            }
        }
        for f in &self.files {
            if f.repo_id != self.repo_id || f.artifact_id != self.artifact_id {
                return Err(LakeError::IncorrectFileId);
            }
        }
        Ok(())
    }

    /// Any BROKEN file entry forces the artifact's BROKEN bit.
    pub fn rollup_file_state(&mut self) {
        if self.files.iter().any(|f| f.state == FileState::Broken) {
            self.state = self.state.with_broken();
        }
    }
}

/// Secret redaction mask applied to metadata values whose key contains
/// `PASSWORD` or `SECRET`.
pub const SECRET_MASK: &str = "********************************";

/// `(repo_id, artifact_id, key, value)`, key unique within the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetaEntry {
    pub repo_id: RepoId,
    pub artifact_id: ArtifactId,
    pub key: String,
    pub value: String,
}

/// Drops `_`-prefixed keys and redacts `PASSWORD`/`SECRET` keys. Applied
/// symmetrically to repo and artifact metadata.
pub fn secure_meta(meta: std::collections::BTreeMap<String, String>) -> Vec<(String, String)> {
    meta.into_iter()
        .filter(|(k, _)| !k.starts_with('_'))
        .map(|(k, v)| {
            let v = if k.contains("PASSWORD") || k.contains("SECRET") {
                SECRET_MASK.to_string()
            } else {
                v
            };
            (k, v)
        })
        .collect()
}

/// `(repo_id, artifact_id, name, size, state)`. `name` is artifact-relative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFileEntry {
    pub repo_id: RepoId,
    pub artifact_id: ArtifactId,
    pub name: String,
    pub size: i64,
    pub state: FileState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn secure_meta_drops_underscore_keys_and_masks_secrets() {
        let mut input = BTreeMap::new();
        input.insert("DB_PASSWORD".to_string(), "hunter2".to_string());
        input.insert("SECRET_TOKEN".to_string(), "abc".to_string());
        input.insert("_INTERNAL".to_string(), "x".to_string());
        input.insert("BUILD_ID".to_string(), "42".to_string());

        let secured: std::collections::BTreeMap<_, _> = secure_meta(input).into_iter().collect();

        assert_eq!(secured.get("DB_PASSWORD"), Some(&SECRET_MASK.to_string()));
        assert_eq!(secured.get("SECRET_TOKEN"), Some(&SECRET_MASK.to_string()));
        assert_eq!(secured.get("BUILD_ID"), Some(&"42".to_string()));
        assert!(!secured.contains_key("_INTERNAL"));
    }

    #[test]
    fn artifact_state_bits() {
        let s = ArtifactState::OK.with_broken().with_expired();
        assert!(s.is_broken());
        assert!(s.is_expired());
        assert!(!s.is_ok());
        assert!(ArtifactState::OK.is_ok());
    }
}
