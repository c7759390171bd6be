use thiserror::Error;

use crate::model::{ArtifactId, RepoId};

/// Error taxonomy for the ingestion and lifecycle engine.
///
/// Startup errors surface to the process as exit codes; runtime per-event
/// errors are logged with repo/artifact context and the triggering event is
/// dropped rather than killing the owning task (see `ingest`/`discovery`).
#[derive(Error, Debug)]
pub enum LakeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("must be an absolute path: {0}")]
    MustBeAbsPath(String),

    #[error("no such directory: {0}")]
    NoSuchDirectory(String),

    #[error("artifact already exists: {0}")]
    ArtifactAlreadyExists(String),

    #[error("is not a checksum file: {0}")]
    IsNotChecksumFile(String),

    #[error("checksum file has broken file(s): {0}")]
    ChecksumFileHasBrokenFiles(String),

    #[error("unsecure file name: {0}")]
    UnsecureFileName(String),

    #[error("artifact is broken: {0}/{1}")]
    ArtifactIsBroken(RepoId, ArtifactId),

    #[error("wrong metadata format")]
    WrongMetaFormat,

    #[error("path does not match any repo input: {0}")]
    NotMatchRepoInput(String),

    #[error("incorrect metadata repo/artifact id")]
    IncorrectMetaId,

    #[error("incorrect file entry repo/artifact id")]
    IncorrectFileId,

    #[error("repo not found: {0}")]
    RepoNotFound(RepoId),

    #[error("artifact not found: {0}/{1}")]
    ArtifactNotFound(RepoId, ArtifactId),

    #[error("invalid repo or artifact id: {0}")]
    InvalidId(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("repo paths overlap with an existing repo: {0}")]
    OverlappingRepo(RepoId),

    #[error("repo invariant violated: {0}")]
    InvalidRepo(String),

    #[error("artifact invariant violated: {0}")]
    InvalidArtifact(String),
}

pub type Result<T> = std::result::Result<T, LakeError>;
