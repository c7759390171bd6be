use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error};

use crate::checksum::ChecksumRegistry;
use crate::event_bus::EventBus;
use crate::fs::Fs;
use crate::index::{ArtifactIndex, ArtifactQuery, RepoIndex};
use crate::model::RepoId;

/// Listens for `repo-updated` and walks each repo's storage tree looking
/// for checksum manifests whose parent directory name isn't a known
/// artifact id — those are dangling, and get published as
/// `dangling-repo-artifact` for the ingest engine to back-fill.
pub struct DanglingDiscovery {
    bus: Arc<EventBus>,
    repos: Arc<RepoIndex>,
    artifacts: Arc<ArtifactIndex>,
    fs: Arc<dyn Fs>,
    checksums: Arc<ChecksumRegistry>,
}

impl DanglingDiscovery {
    pub fn new(
        bus: Arc<EventBus>,
        repos: Arc<RepoIndex>,
        artifacts: Arc<ArtifactIndex>,
        fs: Arc<dyn Fs>,
        checksums: Arc<ChecksumRegistry>,
    ) -> Self {
        Self {
            bus,
            repos,
            artifacts,
            fs,
            checksums,
        }
    }

    /// Runs the scan for one repo id. Spawned as its own task per
    /// `repo-updated` event, sequentially (no concurrency within a single
    /// call).
    pub async fn check_repo(&self, repo_id: &RepoId) {
        let repo = match self
            .repos
            .find_by_id(repo_id, ArtifactQuery::with_relations(), &self.artifacts)
            .await
        {
            Ok(repo) => repo,
            Err(e) => {
                error!(repo_id = %repo_id, error = %e, "unable to find repo");
                return;
            }
        };

        if !self.fs.is_dir(Path::new(&repo.storage)).await {
            error!(storage = %repo.storage, "storage not found");
            return;
        }

        debug!(repo_id = %repo_id, "checking repo storage for dangling artifacts");

        let files = match self.fs.walk_files(Path::new(&repo.storage)).await {
            Ok(files) => files,
            Err(e) => {
                error!(storage = %repo.storage, error = %e, "walk error");
                return;
            }
        };

        let known: std::collections::HashSet<&str> =
            repo.artifacts.iter().map(|a| a.artifact_id.as_str()).collect();

        for path in files {
            let name = path.to_string_lossy().to_string();
            if !self.checksums.is_checksum_file(&name) {
                continue;
            }

            let artifact_id = Path::new(&name)
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();

            if known.contains(artifact_id.as_str()) {
                continue;
            }

            self.bus.publish(
                "dangling-repo-artifact",
                vec![repo_id.to_string(), artifact_id],
            );
        }
    }
}
