use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::{LakeError, Result};
use crate::event_bus::EventBus;

/// Bridges `notify`'s callback-based API into the async world: one
/// unbounded channel per watched root, drained by a forwarding task that
/// republishes onto the event bus. Every create/write of a regular file is
/// published on both `{id}-file-modified` (the dynamic, per-root topic)
/// and the fixed `input-file-modified` topic the Ingest Engine
/// subscribes to; removes/renames publish only on `{id}-file-removed`,
/// since nothing in this crate's ingest path consumes removals directly.
///
/// Directories ending in `.git` are dropped before reaching the bus,
/// matching the disk-walk skip rule applied elsewhere to input/storage
/// trees. `notify`'s recursive watch mode picks up files created in new
/// subdirectories without this crate re-registering the watch, so no manual
/// recursive-add bookkeeping is needed here.
pub struct InputWatcher {
    bus: Arc<EventBus>,
    watchers: HashMap<PathBuf, RecommendedWatcher>,
}

impl InputWatcher {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            watchers: HashMap::new(),
        }
    }

    /// Starts watching `root` recursively, tagging every event it produces
    /// with `id` (conventionally the owning repo's id) for the dynamic
    /// topics. `root` must be absolute. Idempotent for an already-watched
    /// root.
    pub fn watch(&mut self, id: impl Into<String>, root: &Path) -> Result<()> {
        if !root.is_absolute() {
            return Err(LakeError::MustBeAbsPath(root.to_string_lossy().to_string()));
        }
        if self.watchers.contains_key(root) {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if !matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) {
                        return;
                    }
                    let _ = tx.send(event);
                }
                Err(e) => error!(error = %e, "filesystem watch error"),
            },
            notify::Config::default(),
        )
        .map_err(|e| LakeError::InvalidRepo(format!("unable to create watcher: {e}")))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| LakeError::InvalidRepo(format!("unable to watch {}: {e}", root.display())))?;

        let bus = self.bus.clone();
        let id = id.into();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let is_removal = matches!(event.kind, EventKind::Remove(_));
                for path in event.paths {
                    if path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(".git"))
                    {
                        continue;
                    }
                    let Some(path_str) = path.to_str() else {
                        warn!(?path, "skipping non-utf8 path");
                        continue;
                    };

                    if is_removal {
                        bus.publish(&format!("{id}-file-removed"), vec![path_str.to_string()]);
                    } else {
                        bus.publish(&format!("{id}-file-modified"), vec![path_str.to_string()]);
                        bus.publish("input-file-modified", vec![path_str.to_string()]);
                    }
                }
            }
        });

        self.watchers.insert(root.to_path_buf(), watcher);
        Ok(())
    }

    pub fn unwatch(&mut self, root: &Path) {
        if let Some(mut watcher) = self.watchers.remove(root) {
            let _ = watcher.unwatch(root);
        }
    }

    /// Subscribes to `input-updated` and adds every directory it names to
    /// the watch set, tagged with `id`. One event carries `[id, absDir]`;
    /// `id` is conventionally the owning repo's id, reused verbatim for the
    /// `{id}-file-modified` / `{id}-file-removed` topics this watcher emits
    /// on. Runs until `shutdown` is cancelled or the bus closes the
    /// subscription.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let (handle, mut rx) = self.bus.subscribe("input-updated");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let (Some(id), Some(dir)) = (event.first(), event.get(1)) else {
                        warn!(?event, "malformed input-updated event");
                        continue;
                    };
                    if let Err(e) = self.watch(id.clone(), Path::new(dir)) {
                        error!(id = %id, dir = %dir, error = %e, "failed to watch directory from input-updated event");
                    }
                }
            }
        }
        self.bus.unsubscribe(&handle);
    }
}
