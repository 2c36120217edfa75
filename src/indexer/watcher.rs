// File watcher feeding incremental reindex

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::indexer::Indexer;

/// Watches the repository and keeps the index current: created and
/// modified files go through an incremental reindex, removed files are
/// dropped from the store.
pub struct FileWatcher {
    indexer: Arc<Indexer>,
    watch_path: PathBuf,
}

impl FileWatcher {
    pub fn new(indexer: Arc<Indexer>) -> Self {
        let watch_path = indexer.repo_root().to_path_buf();
        Self { indexer, watch_path }
    }

    /// Start watching for file changes
    pub async fn watch(&self) -> Result<()> {
        info!("Starting file watcher for: {}", self.watch_path.display());

        let (tx, mut rx) = mpsc::channel(100);

        // The notify callback runs on the watcher's own thread, outside
        // the runtime; blocking_send is the bridge back in.
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if let Err(e) = tx.blocking_send(event) {
                        error!("Failed to forward file event: {}", e);
                    }
                }
                Err(e) => error!("File watch error: {}", e),
            },
            Config::default(),
        )?;

        watcher.watch(&self.watch_path, RecursiveMode::Recursive)?;

        info!("File watcher started. Monitoring for changes...");

        while let Some(event) = rx.recv().await {
            self.handle_event(event).await;
        }

        Ok(())
    }

    /// Handle a file system event
    async fn handle_event(&self, event: Event) {
        debug!("File event: {:?}", event);

        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
                for path in &event.paths {
                    if self.should_track(path, &event.kind) {
                        self.handle_file_change(path, &event.kind).await;
                    }
                }
            }
            _ => {}
        }
    }

    /// Handle a file change event. Per-file failures never stop the
    /// watcher.
    async fn handle_file_change(&self, path: &Path, kind: &EventKind) {
        let Some(rel_path) = self.relative(path) else {
            return;
        };

        match kind {
            EventKind::Create(_) | EventKind::Modify(_) => {
                info!("File changed: {}", rel_path);
                match self.indexer.reindex(Some(vec![rel_path.clone()]), false).await {
                    Ok(report) if report.errors > 0 => {
                        warn!("Reindex of {} reported an error", rel_path)
                    }
                    Ok(_) => {}
                    Err(e) => error!("Failed to reindex {}: {:#}", rel_path, e),
                }
            }
            EventKind::Remove(_) => {
                info!("File removed: {}", rel_path);
                if let Err(e) = self.indexer.store().remove_file(&rel_path) {
                    error!("Failed to remove {} from index: {}", rel_path, e);
                }
            }
            _ => {}
        }
    }

    /// Whether the event concerns a source file we index. Removed paths no
    /// longer exist on disk, so only the name can be checked.
    fn should_track(&self, path: &Path, kind: &EventKind) -> bool {
        if self.indexer.is_excluded(path) {
            return false;
        }

        let has_source_extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.indexer.extensions().iter().any(|wanted| wanted == ext))
            .unwrap_or(false);

        if !has_source_extension {
            return false;
        }

        match kind {
            EventKind::Remove(_) => true,
            _ => path.is_file(),
        }
    }

    fn relative(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.watch_path)
            .ok()
            .map(|rel| rel.to_string_lossy().to_string())
    }
}

/// Start the file watcher for an indexer (runs until the channel closes)
pub async fn start_watcher(indexer: Arc<Indexer>) -> Result<()> {
    let watcher = FileWatcher::new(indexer);
    watcher.watch().await
}
