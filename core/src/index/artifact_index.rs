use sqlx::PgPool;

use crate::error::{LakeError, Result};
use crate::model::{
    Artifact, ArtifactFileEntry, ArtifactId, ArtifactMetaEntry, ArtifactState, FileState, RepoId,
};

/// Independent, typed query options: whether to preload relations at all,
/// and separately how many artifacts to preload when doing so.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactQuery {
    pub with_relations: bool,
    pub limit_artifacts: Option<i64>,
}

impl ArtifactQuery {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_relations() -> Self {
        Self {
            with_relations: true,
            limit_artifacts: None,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ArtifactRow {
    repo_id: String,
    artifact_id: String,
    storage: String,
    size: i64,
    state: i32,
    created_at: i64,
    expired_at: i64,
    checksum: String,
}

impl ArtifactRow {
    fn into_domain(self, meta: Vec<ArtifactMetaEntry>, files: Vec<ArtifactFileEntry>) -> Result<Artifact> {
        Ok(Artifact {
            repo_id: RepoId::try_from(self.repo_id)?,
            artifact_id: ArtifactId::try_from(self.artifact_id)?,
            storage: self.storage,
            size: self.size,
            state: ArtifactState::from_bits(self.state),
            created_at: self.created_at,
            expired_at: self.expired_at,
            checksum: self.checksum,
            meta,
            files,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MetaRow {
    repo_id: String,
    artifact_id: String,
    key: String,
    value: String,
}

#[derive(sqlx::FromRow)]
struct FileRow {
    repo_id: String,
    artifact_id: String,
    name: String,
    size: i64,
    state: i32,
}

/// Relational store of artifact rows plus their metadata and file entries.
/// Create/delete are transactional and keep the parent repo's `size`/
/// `artifacts_count` aggregates consistent with the artifact set.
pub struct ArtifactIndex {
    pool: PgPool,
}

impl ArtifactIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, repo_id: &RepoId, artifact_id: &ArtifactId) -> Result<Option<Artifact>> {
        let row: Option<ArtifactRow> = sqlx::query_as(
            "SELECT repo_id, artifact_id, storage, size, state, created_at, expired_at, checksum
             FROM artifacts WHERE repo_id = $1 AND artifact_id = $2",
        )
        .bind(repo_id.as_str())
        .bind(artifact_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let meta = self.fetch_meta(repo_id, artifact_id).await?;
        let files = self.fetch_files(repo_id, artifact_id).await?;
        Ok(Some(row.into_domain(meta, files)?))
    }

    /// Artifacts currently belonging to a repo, core fields only (no
    /// per-artifact meta/files), capped by `limit` when given.
    pub async fn find_by_repo(&self, repo_id: &RepoId, limit: Option<i64>) -> Result<Vec<Artifact>> {
        let rows: Vec<ArtifactRow> = sqlx::query_as(
            "SELECT repo_id, artifact_id, storage, size, state, created_at, expired_at, checksum
             FROM artifacts WHERE repo_id = $1 ORDER BY artifact_id
             LIMIT $2",
        )
        .bind(repo_id.as_str())
        .bind(limit.unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| r.into_domain(Vec::new(), Vec::new()))
            .collect()
    }

    async fn fetch_meta(&self, repo_id: &RepoId, artifact_id: &ArtifactId) -> Result<Vec<ArtifactMetaEntry>> {
        let rows: Vec<MetaRow> = sqlx::query_as(
            "SELECT repo_id, artifact_id, key, value FROM artifact_meta
             WHERE repo_id = $1 AND artifact_id = $2 ORDER BY key",
        )
        .bind(repo_id.as_str())
        .bind(artifact_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(ArtifactMetaEntry {
                    repo_id: RepoId::try_from(r.repo_id)?,
                    artifact_id: ArtifactId::try_from(r.artifact_id)?,
                    key: r.key,
                    value: r.value,
                })
            })
            .collect()
    }

    async fn fetch_files(&self, repo_id: &RepoId, artifact_id: &ArtifactId) -> Result<Vec<ArtifactFileEntry>> {
        let rows: Vec<FileRow> = sqlx::query_as(
            "SELECT repo_id, artifact_id, name, size, state FROM artifact_files
             WHERE repo_id = $1 AND artifact_id = $2 ORDER BY name",
        )
        .bind(repo_id.as_str())
        .bind(artifact_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(ArtifactFileEntry {
                    repo_id: RepoId::try_from(r.repo_id)?,
                    artifact_id: ArtifactId::try_from(r.artifact_id)?,
                    name: r.name,
                    size: r.size,
                    state: FileState::from_bits(r.state),
                })
            })
            .collect()
    }

    /// Inserts the artifact row, its metadata (expected already secured by
    /// the caller) and file entries, and bumps the parent repo's aggregates,
    /// all in one transaction.
    pub async fn create(&self, artifact: &Artifact) -> Result<()> {
        artifact.validate()?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO artifacts (repo_id, artifact_id, storage, size, state, created_at, expired_at, checksum)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(artifact.repo_id.as_str())
        .bind(artifact.artifact_id.as_str())
        .bind(&artifact.storage)
        .bind(artifact.size)
        .bind(artifact.state.bits())
        .bind(artifact.created_at)
        .bind(artifact.expired_at)
        .bind(&artifact.checksum)
        .execute(&mut *tx)
        .await?;

        for m in &artifact.meta {
            sqlx::query(
                "INSERT INTO artifact_meta (repo_id, artifact_id, key, value) VALUES ($1, $2, $3, $4)",
            )
            .bind(m.repo_id.as_str())
            .bind(m.artifact_id.as_str())
            .bind(&m.key)
            .bind(&m.value)
            .execute(&mut *tx)
            .await?;
        }

        for f in &artifact.files {
            sqlx::query(
                "INSERT INTO artifact_files (repo_id, artifact_id, name, size, state) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(f.repo_id.as_str())
            .bind(f.artifact_id.as_str())
            .bind(&f.name)
            .bind(f.size)
            .bind(f.state.bits())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE repos SET size = size + $1, artifacts_count = artifacts_count + 1 WHERE repo_id = $2",
        )
        .bind(artifact.size)
        .bind(artifact.repo_id.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Deletes the artifact row (cascading to meta/files) and decrements the
    /// parent repo's aggregates, in one transaction.
    pub async fn delete(&self, repo_id: &RepoId, artifact_id: &ArtifactId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let size: Option<i64> = sqlx::query_scalar(
            "SELECT size FROM artifacts WHERE repo_id = $1 AND artifact_id = $2",
        )
        .bind(repo_id.as_str())
        .bind(artifact_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(size) = size else {
            return Err(LakeError::ArtifactNotFound(repo_id.clone(), artifact_id.clone()));
        };

        sqlx::query("DELETE FROM artifacts WHERE repo_id = $1 AND artifact_id = $2")
            .bind(repo_id.as_str())
            .bind(artifact_id.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE repos SET size = size - $1, artifacts_count = artifacts_count - 1 WHERE repo_id = $2",
        )
        .bind(size)
        .bind(repo_id.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn update_state(&self, repo_id: &RepoId, artifact_id: &ArtifactId, state: ArtifactState) -> Result<()> {
        sqlx::query("UPDATE artifacts SET state = $1 WHERE repo_id = $2 AND artifact_id = $3")
            .bind(state.bits())
            .bind(repo_id.as_str())
            .bind(artifact_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Expired by clock but not yet state-marked, ordered by `expired_at`
    /// ascending (oldest first).
    pub async fn find_all_time_expired(&self, now: i64) -> Result<Vec<Artifact>> {
        let rows: Vec<ArtifactRow> = sqlx::query_as(
            "SELECT repo_id, artifact_id, storage, size, state, created_at, expired_at, checksum
             FROM artifacts
             WHERE (state & 2) = 0 AND expired_at <> created_at AND expired_at < $1
             ORDER BY expired_at ASC",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| r.into_domain(Vec::new(), Vec::new())).collect()
    }

    pub async fn find_all_status_expired(&self, limit: i64) -> Result<Vec<Artifact>> {
        let rows: Vec<ArtifactRow> = sqlx::query_as(
            "SELECT repo_id, artifact_id, storage, size, state, created_at, expired_at, checksum
             FROM artifacts WHERE (state & 2) <> 0 ORDER BY expired_at ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| r.into_domain(Vec::new(), Vec::new())).collect()
    }

    pub async fn find_all_status_broken(&self, limit: i64) -> Result<Vec<Artifact>> {
        let rows: Vec<ArtifactRow> = sqlx::query_as(
            "SELECT repo_id, artifact_id, storage, size, state, created_at, expired_at, checksum
             FROM artifacts WHERE (state & 1) <> 0 ORDER BY created_at ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| r.into_domain(Vec::new(), Vec::new())).collect()
    }

    pub async fn find_all_status_not_broken(&self) -> Result<Vec<Artifact>> {
        let rows: Vec<ArtifactRow> = sqlx::query_as(
            "SELECT repo_id, artifact_id, storage, size, state, created_at, expired_at, checksum
             FROM artifacts WHERE (state & 1) = 0 ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| r.into_domain(Vec::new(), Vec::new())).collect()
    }
}
