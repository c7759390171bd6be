mod timers;

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checksum::ChecksumRegistry;
use crate::error::Result;
use crate::event_bus::{Event, EventBus};
use crate::fs::{Fs, first_subdir};
use crate::index::{ArtifactIndex, RepoIndex};
use crate::metadata::MetaRegistry;
use crate::model::{
    Artifact, ArtifactFileEntry, ArtifactId, ArtifactMetaEntry, ArtifactState, BrokenDisposition,
    FileState, Repo, RepoId, secure_meta,
};
use crate::probe::DiskArtifact;
use crate::storage::{self, StorageAdapter};

pub use timers::{ResettableTimer, TimerConfig};

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The single task that owns ingestion end-to-end: watching for new
/// manifests, promoting them into storage, reconciling dangling artifacts
/// the discovery scan finds, and running the two periodic cycles that keep
/// the index honest about expiry and integrity. Everything here runs on one
/// task with no internal concurrency, so the repo cache and
/// broken-scan backlog need no locking.
pub struct IngestEngine {
    bus: Arc<EventBus>,
    repos: Arc<RepoIndex>,
    artifacts: Arc<ArtifactIndex>,
    fs: Arc<dyn Fs>,
    checksums: Arc<ChecksumRegistry>,
    metas: Arc<MetaRegistry>,
    storage: StorageAdapter,
    repo_cache: Vec<Repo>,
    expiration_timer: ResettableTimer,
    expiration_limit: i64,
    broken_timer: ResettableTimer,
    broken_limit: i64,
    /// Artifacts pending re-verification by the broken-scan cycle. Refilled
    /// from the not-broken set whenever it runs dry, so a full sweep of the
    /// repo completes over several fires rather than one long one.
    broken_backlog: Vec<Artifact>,
}

impl IngestEngine {
    pub async fn new(
        bus: Arc<EventBus>,
        repos: Arc<RepoIndex>,
        artifacts: Arc<ArtifactIndex>,
        fs: Arc<dyn Fs>,
        checksums: Arc<ChecksumRegistry>,
        metas: Arc<MetaRegistry>,
        expiration: TimerConfig,
        broken_scan: TimerConfig,
    ) -> Result<Self> {
        let repo_cache = repos.find_all().await?;
        Ok(Self {
            bus,
            repos,
            artifacts,
            fs,
            checksums,
            metas,
            storage: StorageAdapter::new(),
            repo_cache,
            expiration_limit: expiration.limit,
            expiration_timer: ResettableTimer::new(expiration),
            broken_limit: broken_scan.limit,
            broken_timer: ResettableTimer::new(broken_scan),
            broken_backlog: Vec::new(),
        })
    }

    /// Runs until `shutdown` is cancelled. Subscribes to the three topics
    /// this engine reacts to and multiplexes them with its two timers in a
    /// single select loop.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let (repo_handle, mut repo_rx) = self.bus.subscribe("repo-updated");
        let (input_handle, mut input_rx) = self.bus.subscribe("input-file-modified");
        let (dangling_handle, mut dangling_rx) = self.bus.subscribe("dangling-repo-artifact");

        info!("ingest engine started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("ingest engine shutting down");
                    break;
                }
                event = repo_rx.recv() => {
                    match event {
                        Some(_) => self.handle_repo_updated().await,
                        None => break,
                    }
                }
                event = input_rx.recv() => {
                    match event {
                        Some(payload) => self.handle_input_file_modified(payload).await,
                        None => break,
                    }
                }
                event = dangling_rx.recv() => {
                    match event {
                        Some(payload) => self.handle_dangling_repo_artifact(payload).await,
                        None => break,
                    }
                }
                _ = self.expiration_timer.sleep_mut() => {
                    self.fire_expiration().await;
                    self.expiration_timer.reset();
                }
                _ = self.broken_timer.sleep_mut() => {
                    self.fire_broken_scan().await;
                    self.broken_timer.reset();
                }
            }
        }

        self.bus.unsubscribe(&repo_handle);
        self.bus.unsubscribe(&input_handle);
        self.bus.unsubscribe(&dangling_handle);
    }

    fn find_repo_by_id(&self, id: &RepoId) -> Option<&Repo> {
        self.repo_cache.iter().find(|r| &r.repo_id == id)
    }

    /// Finds the longest-prefix-matching repo whose `input` contains `path`.
    /// Longest match wins so a repo nested under another repo's input (were
    /// that ever allowed) doesn't get shadowed by the outer one.
    fn find_owning_repo(&self, path: &str) -> Option<&Repo> {
        self.repo_cache
            .iter()
            .filter(|r| !r.input.is_empty() && path.starts_with(&r.input))
            .max_by_key(|r| r.input.len())
    }

    async fn handle_repo_updated(&mut self) {
        match self.repos.find_all().await {
            Ok(repos) => self.repo_cache = repos,
            Err(e) => error!(error = %e, "failed to refresh repo cache"),
        }
    }

    /// A file appeared or changed somewhere under a watched input root. Only
    /// checksum manifests that verify cleanly turn into artifacts; anything
    /// else (a payload file landing before its manifest, a manifest with
    /// broken entries) is ignored here and picked up again on the next event
    /// for that path once the rest of the drop is complete.
    async fn handle_input_file_modified(&mut self, event: Event) {
        let Some(path) = event.into_iter().next() else {
            return;
        };

        let Some(repo) = self.find_owning_repo(&path).cloned() else {
            debug!(path = %path, "path does not match any configured repo input");
            return;
        };

        if !self.checksums.is_checksum_file(&path) {
            return;
        }

        let probe = DiskArtifact::from_checksum_file(self.fs.as_ref(), &self.checksums, &path).await;
        if !probe.checksum_ok() {
            return;
        }

        let artifact_id = self.derive_artifact_id(&repo, &path);

        let info = match self
            .storage
            .new_artifact(
                self.fs.as_ref(),
                &repo.input,
                &probe.files.good,
                &repo.storage,
                &artifact_id,
            )
            .await
        {
            Ok(info) => info,
            Err(e) => {
                error!(repo_id = %repo.repo_id, artifact_id = %artifact_id, error = %e, "storage adapter failed to materialize artifact");
                return;
            }
        };

        self.cleanup_input_residue(&repo, &probe).await;

        let meta = probe.artifact_meta(self.fs.as_ref(), &self.metas).await;
        let files = self.build_file_entries(&repo, &artifact_id, &probe).await;

        if let Err(e) = self
            .insert_artifact(&repo, &artifact_id, info.size, info.created_at, probe.checksum.clone(), meta, files)
            .await
        {
            error!(repo_id = %repo.repo_id, artifact_id = %artifact_id, error = %e, "failed to record ingested artifact");
        }
    }

    /// Picks the artifact id for a newly verified manifest: the name of the
    /// subdirectory it dropped into under the repo's input root, or a fresh
    /// ULID when the manifest landed directly at the root.
    fn derive_artifact_id(&self, repo: &Repo, manifest_path: &str) -> ArtifactId {
        let subdir = first_subdir(&repo.input, manifest_path);
        if subdir.is_empty() {
            return fresh_artifact_id();
        }
        match ArtifactId::try_from(subdir.as_str()) {
            Ok(id) => id,
            Err(_) => {
                warn!(subdir = %subdir, "input subdirectory name is not a valid artifact id, generating one instead");
                fresh_artifact_id()
            }
        }
    }

    async fn build_file_entries(&self, repo: &Repo, artifact_id: &ArtifactId, probe: &DiskArtifact) -> Vec<ArtifactFileEntry> {
        let mut out = Vec::with_capacity(probe.files.good.len());
        for f in &probe.files.good {
            let rel = storage::artifact_relative_name(&repo.input, artifact_id, f);
            let dest = Path::new(&repo.storage).join(artifact_id.as_str()).join(&rel);
            let size = self.fs.file_size(&dest).await as i64;
            out.push(ArtifactFileEntry {
                repo_id: repo.repo_id.clone(),
                artifact_id: artifact_id.clone(),
                name: rel,
                size,
                state: FileState::Ok,
            });
        }
        out
    }

    /// Removes whatever the manifest's own files leave behind under the
    /// input root once they've been moved into storage. Non-manifest good
    /// files go first (removing their whole first-level subdirectory when
    /// nested, or the bare file when dropped at the root), then the
    /// manifest itself last, so a crash mid-cleanup never leaves a manifest
    /// without its payload still sitting in the input tree.
    async fn cleanup_input_residue(&self, repo: &Repo, probe: &DiskArtifact) {
        let manifest = &probe.checksum_file;
        let mut residue: Vec<&String> = probe.files.good.iter().filter(|f| *f != manifest).collect();
        residue.sort();
        for f in residue {
            self.remove_residue_unit(repo, f).await;
        }
        self.remove_residue_unit(repo, manifest).await;
    }

    async fn remove_residue_unit(&self, repo: &Repo, file: &str) {
        let subdir = first_subdir(&repo.input, file);
        let result = if subdir.is_empty() {
            self.fs.remove_file(Path::new(file)).await
        } else {
            self.fs.remove_dir_all(&Path::new(&repo.input).join(&subdir)).await
        };
        if let Err(e) = result {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(file = %file, error = %e, "failed to clean up input residue");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_artifact(
        &self,
        repo: &Repo,
        artifact_id: &ArtifactId,
        size: i64,
        created_at: i64,
        checksum: String,
        meta: Vec<(String, String)>,
        files: Vec<ArtifactFileEntry>,
    ) -> Result<()> {
        let expired_at = if repo.retention_secs == 0 {
            created_at
        } else {
            created_at + repo.retention_secs
        };

        let meta_entries = secure_meta(meta.into_iter().collect())
            .into_iter()
            .map(|(key, value)| ArtifactMetaEntry {
                repo_id: repo.repo_id.clone(),
                artifact_id: artifact_id.clone(),
                key,
                value,
            })
            .collect();

        let mut artifact = Artifact {
            repo_id: repo.repo_id.clone(),
            artifact_id: artifact_id.clone(),
            storage: repo.storage.clone(),
            size,
            state: ArtifactState::OK,
            created_at,
            expired_at,
            checksum,
            meta: meta_entries,
            files,
        };
        artifact.rollup_file_state();

        self.artifacts.create(&artifact).await?;
        self.bus
            .publish("artifact-updated", vec![repo.repo_id.to_string(), artifact_id.to_string()]);
        Ok(())
    }

    /// A dangling manifest was found on disk with no matching index row (or
    /// possibly a stale one). Re-probes the artifact in place and either
    /// back-fills a missing row or reconciles a mismatched one.
    async fn handle_dangling_repo_artifact(&mut self, event: Event) {
        let (Some(repo_id_raw), Some(artifact_id_raw)) = (event.first(), event.get(1)) else {
            warn!(?event, "malformed dangling-repo-artifact event");
            return;
        };
        let (Ok(repo_id), Ok(artifact_id)) = (
            RepoId::try_from(repo_id_raw.as_str()),
            ArtifactId::try_from(artifact_id_raw.as_str()),
        ) else {
            warn!(?event, "dangling-repo-artifact event carries invalid ids");
            return;
        };

        let Some(repo) = self.find_repo_by_id(&repo_id).cloned() else {
            error!(repo_id = %repo_id, "dangling artifact reported for unknown repo");
            return;
        };

        let location = format!("{}/{}", repo.storage.trim_end_matches('/'), artifact_id.as_str());
        let probe = DiskArtifact::walk(self.fs.as_ref(), &self.checksums, &location).await;
        if !probe.is_healthy() {
            warn!(repo_id = %repo_id, artifact_id = %artifact_id, "dangling artifact failed the on-disk health check");
            self.bus
                .publish("broken-repo-artifact", vec![repo_id.to_string(), artifact_id.to_string()]);
            return;
        }

        match self.artifacts.find_by_id(&repo_id, &artifact_id).await {
            Ok(None) => {
                if let Err(e) = self.backfill_dangling(&repo, &artifact_id, &probe).await {
                    error!(repo_id = %repo_id, artifact_id = %artifact_id, error = %e, "failed to back-fill dangling artifact");
                }
            }
            Ok(Some(existing)) => self.reconcile_dangling(&repo_id, &artifact_id, &existing, &probe),
            Err(e) => {
                error!(repo_id = %repo_id, artifact_id = %artifact_id, error = %e, "failed to look up artifact for dangling check");
            }
        }
    }

    async fn backfill_dangling(&self, repo: &Repo, artifact_id: &ArtifactId, probe: &DiskArtifact) -> Result<()> {
        let expired_at = if repo.retention_secs == 0 {
            probe.created_at
        } else {
            probe.created_at + repo.retention_secs
        };
        let mut state = ArtifactState::OK;
        if expired_at != probe.created_at && expired_at < now_secs() {
            state = state.with_expired();
        }

        let meta = probe.artifact_meta(self.fs.as_ref(), &self.metas).await;
        let meta_entries = secure_meta(meta.into_iter().collect())
            .into_iter()
            .map(|(key, value)| ArtifactMetaEntry {
                repo_id: repo.repo_id.clone(),
                artifact_id: artifact_id.clone(),
                key,
                value,
            })
            .collect();

        let files = probe
            .artifact_files(self.fs.as_ref())
            .await
            .into_iter()
            .map(|(name, size, file_state)| ArtifactFileEntry {
                repo_id: repo.repo_id.clone(),
                artifact_id: artifact_id.clone(),
                name,
                size,
                state: file_state,
            })
            .collect();

        let mut artifact = Artifact {
            repo_id: repo.repo_id.clone(),
            artifact_id: artifact_id.clone(),
            storage: repo.storage.clone(),
            size: probe.size,
            state,
            created_at: probe.created_at,
            expired_at,
            checksum: probe.checksum.clone(),
            meta: meta_entries,
            files,
        };
        artifact.rollup_file_state();

        self.artifacts.create(&artifact).await?;
        self.bus
            .publish("artifact-updated", vec![repo.repo_id.to_string(), artifact_id.to_string()]);
        Ok(())
    }

    /// Classifies an already-indexed artifact that the discovery scan also
    /// found on disk. createdAt and checksum both matching means nothing
    /// changed; createdAt alone differing means a clean re-upload of
    /// identical content, kept as-is. Either createdAt matching while the
    /// checksum differs, or both differing, means the on-disk content no
    /// longer corresponds to what was recorded — treated as tampering.
    fn reconcile_dangling(&self, repo_id: &RepoId, artifact_id: &ArtifactId, existing: &Artifact, probe: &DiskArtifact) {
        let created_at_matches = existing.created_at == probe.created_at;
        let checksum_matches = existing.checksum == probe.checksum;

        if created_at_matches && checksum_matches {
            return;
        }
        if !created_at_matches && checksum_matches {
            debug!(repo_id = %repo_id, artifact_id = %artifact_id, "artifact re-uploaded with identical content, keeping original record");
            return;
        }

        warn!(repo_id = %repo_id, artifact_id = %artifact_id, "on-disk artifact diverges from the index: tampering");
        self.bus
            .publish("broken-repo-artifact", vec![repo_id.to_string(), artifact_id.to_string()]);
    }

    /// Fires on the retention cycle: first purges artifacts already flagged
    /// EXPIRED, then marks newly clock-expired ones.
    async fn fire_expiration(&mut self) {
        match self.artifacts.find_all_status_expired(self.expiration_limit).await {
            Ok(rows) => {
                for row in rows {
                    self.purge_expired(&row).await;
                }
            }
            Err(e) => error!(error = %e, "failed to list expired artifacts for purge"),
        }

        match self.artifacts.find_all_time_expired(now_secs()).await {
            Ok(rows) => {
                let limit = self.expiration_limit.max(0) as usize;
                for row in rows.into_iter().take(limit) {
                    self.mark_expired(&row).await;
                }
            }
            Err(e) => error!(error = %e, "failed to list time-expired artifacts"),
        }
    }

    async fn purge_expired(&self, row: &Artifact) {
        let Some(repo) = self.find_repo_by_id(&row.repo_id) else {
            error!(repo_id = %row.repo_id, "expired artifact references unknown repo");
            return;
        };
        if let Err(e) = self.storage.remove_artifact(self.fs.as_ref(), &repo.storage, &row.artifact_id).await {
            error!(repo_id = %row.repo_id, artifact_id = %row.artifact_id, error = %e, "failed to remove expired artifact from storage");
        }
        if let Err(e) = self.artifacts.delete(&row.repo_id, &row.artifact_id).await {
            error!(repo_id = %row.repo_id, artifact_id = %row.artifact_id, error = %e, "failed to delete expired artifact row");
            return;
        }
        self.bus
            .publish("artifact-updated", vec![row.repo_id.to_string(), row.artifact_id.to_string()]);
    }

    async fn mark_expired(&self, row: &Artifact) {
        if let Err(e) = self
            .artifacts
            .update_state(&row.repo_id, &row.artifact_id, row.state.with_expired())
            .await
        {
            error!(repo_id = %row.repo_id, artifact_id = %row.artifact_id, error = %e, "failed to mark artifact expired");
            return;
        }
        self.bus
            .publish("artifact-updated", vec![row.repo_id.to_string(), row.artifact_id.to_string()]);
    }

    /// Fires on the integrity cycle: disposes of artifacts already flagged
    /// BROKEN per their repo's disposition, then re-verifies a batch drawn
    /// from the not-broken backlog, refilling it from the full not-broken
    /// set whenever it runs dry so the whole repo gets swept over repeated
    /// fires instead of in one long pass.
    async fn fire_broken_scan(&mut self) {
        match self.artifacts.find_all_status_broken(self.broken_limit).await {
            Ok(rows) => {
                for row in rows {
                    self.dispose_broken(&row).await;
                }
            }
            Err(e) => error!(error = %e, "failed to list broken artifacts for disposal"),
        }

        if self.broken_backlog.is_empty() {
            match self.artifacts.find_all_status_not_broken().await {
                Ok(rows) => self.broken_backlog = rows,
                Err(e) => {
                    error!(error = %e, "failed to refill broken-scan backlog");
                    return;
                }
            }
        }

        let take = self.broken_backlog.len().min(self.broken_limit.max(0) as usize);
        let batch: Vec<Artifact> = self.broken_backlog.drain(..take).collect();
        for row in batch {
            self.verify_not_broken(&row).await;
        }
    }

    async fn dispose_broken(&self, row: &Artifact) {
        let Some(repo) = self.find_repo_by_id(&row.repo_id) else {
            error!(repo_id = %row.repo_id, "broken artifact references unknown repo");
            return;
        };

        match &repo.broken {
            BrokenDisposition::Keep => {
                // No disposal: the row stays BROKEN until its repo's
                // disposition policy changes. See DESIGN.md.
            }
            BrokenDisposition::Delete => {
                if let Err(e) = self.storage.remove_artifact(self.fs.as_ref(), &repo.storage, &row.artifact_id).await {
                    error!(repo_id = %row.repo_id, artifact_id = %row.artifact_id, error = %e, "failed to delete broken artifact from storage");
                    return;
                }
                if let Err(e) = self.artifacts.delete(&row.repo_id, &row.artifact_id).await {
                    error!(repo_id = %row.repo_id, artifact_id = %row.artifact_id, error = %e, "failed to delete broken artifact row");
                }
            }
            BrokenDisposition::MoveTo(dir) => {
                let from = Path::new(&repo.storage).join(row.artifact_id.as_str());
                let to = Path::new(dir).join(format!("{}-{}", row.repo_id, row.artifact_id));
                if let Err(e) = self.fs.rename(&from, &to).await {
                    error!(repo_id = %row.repo_id, artifact_id = %row.artifact_id, error = %e, "failed to move broken artifact aside");
                    return;
                }
                if let Err(e) = self.artifacts.delete(&row.repo_id, &row.artifact_id).await {
                    error!(repo_id = %row.repo_id, artifact_id = %row.artifact_id, error = %e, "failed to delete broken artifact row after move");
                }
            }
        }
    }

    async fn verify_not_broken(&self, row: &Artifact) {
        let Some(repo) = self.find_repo_by_id(&row.repo_id) else {
            error!(repo_id = %row.repo_id, "artifact references unknown repo during broken-scan verify");
            return;
        };
        let location = format!("{}/{}", repo.storage.trim_end_matches('/'), row.artifact_id.as_str());
        let probe = DiskArtifact::walk(self.fs.as_ref(), &self.checksums, &location).await;

        let diverged = !probe.is_healthy()
            || probe.size != row.size
            || probe.created_at != row.created_at
            || probe.checksum != row.checksum;

        if !diverged {
            return;
        }

        warn!(repo_id = %row.repo_id, artifact_id = %row.artifact_id, "re-verification failed, marking artifact broken");
        if let Err(e) = self
            .artifacts
            .update_state(&row.repo_id, &row.artifact_id, row.state.with_broken())
            .await
        {
            error!(repo_id = %row.repo_id, artifact_id = %row.artifact_id, error = %e, "failed to mark artifact broken");
            return;
        }
        self.bus
            .publish("broken-repo-artifact", vec![row.repo_id.to_string(), row.artifact_id.to_string()]);
    }
}

fn fresh_artifact_id() -> ArtifactId {
    ArtifactId::try_from(ulid::Ulid::new().to_string()).expect("a freshly generated ulid is always a valid artifact id")
}
