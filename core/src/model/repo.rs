use serde::{Deserialize, Serialize};

use super::artifact::Artifact;
use super::ids::RepoId;
use crate::error::{LakeError, Result};

/// Per-repo policy for what happens to an artifact once it is declared BROKEN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokenDisposition {
    /// Leave the artifact in place, in storage and in the index, forever.
    Keep,
    /// Delete the artifact from storage (and the index row) outright.
    Delete,
    /// Move the artifact to `<dir>/<repoId>-<artifactId>`.
    MoveTo(String),
}

impl BrokenDisposition {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "" => Ok(BrokenDisposition::Keep),
            "/dev/null" => Ok(BrokenDisposition::Delete),
            dir => {
                if !dir.starts_with('/') {
                    return Err(LakeError::MustBeAbsPath(dir.to_string()));
                }
                Ok(BrokenDisposition::MoveTo(dir.to_string()))
            }
        }
    }
}

/// An ingest domain: one input directory, one storage directory, one
/// retention policy, one broken-artifact disposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repo {
    pub repo_id: RepoId,
    pub name: String,
    pub description: String,
    /// Empty means a read-only repo (no watcher is attached).
    pub input: String,
    pub storage: String,
    /// Signed retention in seconds; zero means "never expires".
    pub retention_secs: i64,
    pub broken: BrokenDisposition,
    pub size: i64,
    pub artifacts_count: i64,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl Repo {
    /// Validates invariants that hold independent of persistence.
    pub fn validate(&self) -> Result<()> {
        if !self.storage.starts_with('/') {
            return Err(LakeError::MustBeAbsPath(self.storage.clone()));
        }
        if !self.input.is_empty() && !self.input.starts_with('/') {
            return Err(LakeError::MustBeAbsPath(self.input.clone()));
        }
        if self.input == self.storage {
            return Err(LakeError::InvalidRepo(
                "input and storage must differ".into(),
            ));
        }
        if self.size < 0 || self.artifacts_count < 0 {
            return Err(LakeError::InvalidRepo(
                "size and artifacts_count must be non-negative".into(),
            ));
        }
        let zero_pair = self.artifacts_count == 0 && self.size == 0;
        let positive_pair = self.artifacts_count > 0 && self.size > 0;
        if !zero_pair && !positive_pair {
            return Err(LakeError::InvalidRepo(format!(
                "count={} and size={} must both be zero or both be positive",
                self.artifacts_count, self.size
            )));
        }
        Ok(())
    }

    /// True if `path` is a directory path nested within `other`, in either
    /// direction (used for the input/storage non-nesting invariant).
    fn is_nested(a: &str, b: &str) -> bool {
        let norm = |s: &str| if s.ends_with('/') { s.to_string() } else { format!("{s}/") };
        let (a, b) = (norm(a), norm(b));
        a.starts_with(&b) || b.starts_with(&a)
    }

    /// Rejects repos whose `input`/`storage` collide or nest with `other`'s.
    pub fn conflicts_with(&self, other: &Repo) -> bool {
        if self.repo_id == other.repo_id {
            return false;
        }
        if !self.input.is_empty() && self.input == other.input {
            return true;
        }
        if self.storage == other.storage {
            return true;
        }
        if Self::is_nested(&self.storage, &other.storage) {
            return true;
        }
        if !self.input.is_empty()
            && !other.input.is_empty()
            && Self::is_nested(&self.input, &other.input)
        {
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(id: &str, input: &str, storage: &str) -> Repo {
        Repo {
            repo_id: RepoId::try_from(id).unwrap(),
            name: id.to_string(),
            description: String::new(),
            input: input.to_string(),
            storage: storage.to_string(),
            retention_secs: 0,
            broken: BrokenDisposition::Keep,
            size: 0,
            artifacts_count: 0,
            artifacts: Vec::new(),
        }
    }

    #[test]
    fn duplicate_input_conflicts() {
        let a = repo("repo1", "/in/a", "/st/a");
        let b = repo("repo2", "/in/a", "/st/b");
        assert!(a.conflicts_with(&b));
    }

    #[test]
    fn nested_storage_conflicts() {
        let a = repo("repo1", "/in/a", "/st/a");
        let b = repo("repo2", "/in/b", "/st/a/b");
        assert!(a.conflicts_with(&b));
    }

    #[test]
    fn disjoint_repos_do_not_conflict() {
        let a = repo("repo1", "/in/a", "/st/a");
        let b = repo("repo2", "/in/b", "/st/b");
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn size_count_invariant_rejects_mismatch() {
        let mut r = repo("repo1", "/in/a", "/st/a");
        r.size = 10;
        assert!(r.validate().is_err());
    }

    #[test]
    fn broken_disposition_parsing() {
        assert_eq!(BrokenDisposition::parse("").unwrap(), BrokenDisposition::Keep);
        assert_eq!(
            BrokenDisposition::parse("/dev/null").unwrap(),
            BrokenDisposition::Delete
        );
        assert_eq!(
            BrokenDisposition::parse("/broken").unwrap(),
            BrokenDisposition::MoveTo("/broken".into())
        );
        assert!(BrokenDisposition::parse("relative").is_err());
    }
}
