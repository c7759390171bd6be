//! Process entry point for the artifact lake: wires the database, the event
//! bus, the repo set, the filesystem watcher, and the two long-running
//! tasks (Ingest Engine, Dangling Discovery) together, then blocks until
//! ctrl-c.
//!
//! Loading the repo set from its authoritative YAML configuration (with
//! `${REPO_ID}`-style template expansion) is out of scope for this crate;
//! in its place this binary reads a flat JSON array of
//! [`lake_core::config::RepoSpec`] from `--repos-file`, which is the
//! "already macro-expanded" shape the core crate actually consumes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use lake_core::checksum::ChecksumRegistry;
use lake_core::config::{RepoSpec, parse_duration};
use lake_core::discovery::DanglingDiscovery;
use lake_core::fs::{Fs, RealFs};
use lake_core::ingest::{IngestEngine, TimerConfig};
use lake_core::index::{ArtifactIndex, RepoIndex};
use lake_core::metadata::MetaRegistry;
use lake_core::model::RepoId;
use lake_core::watcher::InputWatcher;
use lake_core::{EventBus, LakeError};

/// Process exit codes for startup failures, one per dependency this process
/// brings up before it can start serving. The HTTP-server cause is kept
/// for taxonomy completeness even though this binary never reaches it.
#[derive(Debug, Clone, Copy)]
#[repr(i32)]
enum ExitCode {
    Filesystem = 9,
    LoadConfig = 10,
    CreateDatabase = 11,
    MigrateDatabase = 12,
    CreateRepoRepository = 13,
    CreateArtifactRepository = 14,
    CreateArtifactStorage = 15,
    #[allow(dead_code)]
    CreateChecksumService = 16,
    #[allow(dead_code)]
    CreateInputWatcher = 17,
    CreateRepoRecord = 20,
    #[allow(dead_code)]
    CreateWebServer = 40,
}

fn bail(code: ExitCode, err: impl std::fmt::Display) -> ! {
    error!(code = code as i32, error = %err, "fatal startup error");
    std::process::exit(code as i32);
}

#[derive(Parser, Debug)]
#[command(name = "lake-server")]
#[command(about = "Ingestion and lifecycle engine for build artifacts")]
struct Args {
    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// JSON array of repo definitions (see `lake_core::config::RepoSpec`).
    #[arg(long, env = "REPOS_FILE")]
    repos_file: PathBuf,

    /// How often the retention cycle runs (compact duration grammar).
    #[arg(long, env = "EXPIRATION_INTERVAL", default_value = "1h")]
    expiration_interval: String,

    /// How often the integrity cycle runs (compact duration grammar).
    #[arg(long, env = "BROKEN_SCAN_INTERVAL", default_value = "1h")]
    broken_scan_interval: String,

    /// Max artifacts touched per retention cycle fire.
    #[arg(long, env = "EXPIRATION_BATCH_LIMIT", default_value_t = 100)]
    expiration_batch_limit: i64,

    /// Max artifacts touched per integrity cycle fire.
    #[arg(long, env = "BROKEN_SCAN_BATCH_LIMIT", default_value_t = 100)]
    broken_scan_batch_limit: i64,
}

fn parse_interval(raw: &str) -> Duration {
    match parse_duration(raw) {
        Ok(ns) if ns > 0 => Duration::from_nanos(ns as u64),
        Ok(_) => {
            warn!(value = %raw, "interval duration means never; defaulting to 1h");
            Duration::from_secs(3600)
        }
        Err(e) => {
            warn!(value = %raw, error = %e, "unparseable interval duration; defaulting to 1h");
            Duration::from_secs(3600)
        }
    }
}

fn load_repo_specs(path: &Path) -> anyhow::Result<Vec<RepoSpec>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lake_server=info,lake_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = match PgPoolOptions::new()
        .max_connections(10)
        .connect(&args.database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => bail(ExitCode::CreateDatabase, e),
    };
    info!("connected to database");

    if let Err(e) = lake_core::run_migrations(&pool).await {
        bail(ExitCode::MigrateDatabase, e);
    }
    info!("migrations applied");

    let repos = Arc::new(RepoIndex::new(pool.clone()));
    let artifacts = Arc::new(ArtifactIndex::new(pool.clone()));
    let bus = Arc::new(EventBus::new());
    let fs: Arc<dyn Fs> = Arc::new(RealFs::new());
    let checksums = Arc::new(ChecksumRegistry::new());
    let metas = Arc::new(MetaRegistry::new());

    let specs = match load_repo_specs(&args.repos_file) {
        Ok(specs) => specs,
        Err(e) => bail(ExitCode::LoadConfig, e),
    };

    for spec in specs {
        let repo = match spec.into_repo() {
            Ok(repo) => repo,
            Err(e) => bail(ExitCode::CreateRepoRecord, e),
        };
        if !fs.is_dir(Path::new(&repo.storage)).await {
            bail(ExitCode::Filesystem, format!("storage directory missing: {}", repo.storage));
        }
        match repos.create(&repo).await {
            Ok(()) => info!(repo_id = %repo.repo_id, "repo registered"),
            Err(LakeError::OverlappingRepo(id)) => {
                info!(repo_id = %id, "repo already registered, skipping");
            }
            Err(e) => bail(ExitCode::CreateRepoRepository, e),
        }
    }

    let all_repos = match repos.find_all().await {
        Ok(repos) => repos,
        Err(e) => bail(ExitCode::CreateRepoRepository, e),
    };

    let watcher = InputWatcher::new(bus.clone());
    let shutdown = CancellationToken::new();
    let watcher_handle = tokio::spawn(watcher.run(shutdown.clone()));

    for repo in &all_repos {
        if !repo.input.is_empty() {
            bus.publish("input-updated", vec![repo.repo_id.to_string(), repo.input.clone()]);
        }
        // Published for every repo, including read-only ones with no input:
        // dangling discovery scans storage, not input, so it doesn't depend
        // on a watcher being attached.
        bus.publish("repo-updated", vec![repo.repo_id.to_string()]);
    }
    info!(count = all_repos.len(), "repos loaded");

    let ingest = match IngestEngine::new(
        bus.clone(),
        repos.clone(),
        artifacts.clone(),
        fs.clone(),
        checksums.clone(),
        metas.clone(),
        TimerConfig {
            start_delay: parse_interval(&args.expiration_interval),
            interval: parse_interval(&args.expiration_interval),
            limit: args.expiration_batch_limit,
        },
        TimerConfig {
            start_delay: parse_interval(&args.broken_scan_interval),
            interval: parse_interval(&args.broken_scan_interval),
            limit: args.broken_scan_batch_limit,
        },
    )
    .await
    {
        Ok(engine) => engine,
        Err(e) => bail(ExitCode::CreateArtifactStorage, e),
    };

    let ingest_handle = tokio::spawn(ingest.run(shutdown.clone()));

    let discovery = Arc::new(DanglingDiscovery::new(
        bus.clone(),
        repos.clone(),
        artifacts.clone(),
        fs.clone(),
        checksums.clone(),
    ));
    let (repo_updated_handle, mut repo_updated_rx) = bus.subscribe("repo-updated");
    let discovery_shutdown = shutdown.clone();
    let discovery_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = discovery_shutdown.cancelled() => break,
                event = repo_updated_rx.recv() => {
                    let Some(event) = event else { break };
                    let Some(raw) = event.first() else { continue };
                    let Ok(repo_id) = RepoId::try_from(raw.as_str()) else { continue };
                    let discovery = discovery.clone();
                    tokio::spawn(async move { discovery.check_repo(&repo_id).await; });
                }
            }
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c, shutting down anyway");
    }
    info!("shutdown signal received");

    shutdown.cancel();
    bus.unsubscribe(&repo_updated_handle);
    let _ = watcher_handle.await;
    let _ = ingest_handle.await;
    let _ = discovery_task.await;
    info!("shutdown complete");
}
