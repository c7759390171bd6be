//! Core library for the artifact lake: the ingestion and lifecycle engine
//! that watches per-repo input directories, verifies checksum manifests,
//! promotes verified drops into content-addressed storage, and keeps a
//! relational index in sync with what is actually on disk.
//!
//! The HTTP presentation layer, the YAML configuration loader, and the
//! layered read-only virtual filesystem consume this crate but live
//! outside it (see `server` for the process that wires everything up).

pub mod checksum;
pub mod config;
pub mod discovery;
pub mod error;
pub mod event_bus;
pub mod fs;
pub mod index;
pub mod ingest;
pub mod metadata;
pub mod model;
pub mod probe;
pub mod storage;
pub mod watcher;

pub use error::{LakeError, Result};
pub use event_bus::{Event, EventBus, SubscriptionHandle, Topic};
pub use model::{
    Artifact, ArtifactFileEntry, ArtifactId, ArtifactMetaEntry, ArtifactState, BrokenDisposition,
    FileState, Repo, RepoId,
};

/// Runs the embedded schema migrations. Path is resolved relative to this
/// crate's manifest directory at compile time.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
