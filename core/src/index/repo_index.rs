use sqlx::PgPool;

use crate::error::{LakeError, Result};
use crate::model::{BrokenDisposition, Repo, RepoId};

use super::ArtifactQuery;

#[derive(sqlx::FromRow)]
struct RepoRow {
    repo_id: String,
    name: String,
    description: String,
    input: String,
    storage: String,
    retention_secs: i64,
    broken: String,
    size: i64,
    artifacts_count: i64,
}

impl RepoRow {
    fn into_domain(self) -> Result<Repo> {
        Ok(Repo {
            repo_id: RepoId::try_from(self.repo_id)?,
            name: self.name,
            description: self.description,
            input: self.input,
            storage: self.storage,
            retention_secs: self.retention_secs,
            broken: BrokenDisposition::parse(&self.broken)?,
            size: self.size,
            artifacts_count: self.artifacts_count,
            artifacts: Vec::new(),
        })
    }
}

fn broken_disposition_str(b: &BrokenDisposition) -> String {
    match b {
        BrokenDisposition::Keep => String::new(),
        BrokenDisposition::Delete => "/dev/null".to_string(),
        BrokenDisposition::MoveTo(dir) => dir.clone(),
    }
}

/// Relational store of repo definitions. Created from config at startup and
/// never mutated at runtime except through artifact create/delete, which
/// adjust `size`/`artifacts_count` transactionally alongside the artifact
/// row itself (see [`crate::index::ArtifactIndex`]).
pub struct RepoIndex {
    pool: PgPool,
}

impl RepoIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_all(&self) -> Result<Vec<Repo>> {
        let rows: Vec<RepoRow> = sqlx::query_as(
            "SELECT repo_id, name, description, input, storage, retention_secs, broken, size, artifacts_count
             FROM repos ORDER BY repo_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RepoRow::into_domain).collect()
    }

    /// `query.with_relations` preloads the repo's current artifacts (core
    /// fields only, no per-artifact meta/files); `query.limit_artifacts`
    /// caps how many are preloaded, independently of `with_relations`.
    pub async fn find_by_id(&self, id: &RepoId, query: ArtifactQuery, artifacts: &super::ArtifactIndex) -> Result<Repo> {
        let row: Option<RepoRow> = sqlx::query_as(
            "SELECT repo_id, name, description, input, storage, retention_secs, broken, size, artifacts_count
             FROM repos WHERE repo_id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Err(LakeError::RepoNotFound(id.clone()));
        };
        let mut repo = row.into_domain()?;

        if query.with_relations {
            repo.artifacts = artifacts.find_by_repo(id, query.limit_artifacts).await?;
        }

        Ok(repo)
    }

    /// Inserts a new repo row. Rejects config-time collisions against every
    /// existing repo's `input`/`storage` (equal or nested paths).
    pub async fn create(&self, repo: &Repo) -> Result<()> {
        repo.validate()?;
        for existing in self.find_all().await? {
            if repo.conflicts_with(&existing) {
                return Err(LakeError::OverlappingRepo(repo.repo_id.clone()));
            }
        }

        sqlx::query(
            "INSERT INTO repos (repo_id, name, description, input, storage, retention_secs, broken, size, artifacts_count)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 0, 0)",
        )
        .bind(repo.repo_id.as_str())
        .bind(&repo.name)
        .bind(&repo.description)
        .bind(&repo.input)
        .bind(&repo.storage)
        .bind(repo.retention_secs)
        .bind(broken_disposition_str(&repo.broken))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
