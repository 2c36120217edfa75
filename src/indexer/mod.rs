// Reindex orchestration: discovery, bounded fan-out, fan-in

pub mod extractor;
pub mod watcher;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::config::{FileTypeRules, IndexingConfig};
use crate::index::db::IndexDatabase;
use crate::indexer::extractor::Extractor;

/// Outcome of one reindex batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexReport {
    pub files_indexed: usize,
    pub errors: usize,
    pub elapsed_seconds: f64,
    pub files_per_second: f64,
}

/// Coordinates discovery, bounded extraction fan-out, and storage fan-in
pub struct Indexer {
    repo_root: PathBuf,
    store: IndexDatabase,
    extractor: Arc<Extractor>,
    rules: Arc<FileTypeRules>,
    exclude: Vec<String>,
    extensions: Vec<String>,
    concurrency: usize,
}

impl Indexer {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        store: IndexDatabase,
        extractor: Arc<Extractor>,
        rules: Arc<FileTypeRules>,
        indexing: &IndexingConfig,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            store,
            extractor,
            rules,
            exclude: indexing.exclude.clone(),
            extensions: indexing.extensions.clone(),
            concurrency: indexing.concurrency,
        }
    }

    pub fn store(&self) -> &IndexDatabase {
        &self.store
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Whether any path component is an excluded directory
    pub fn is_excluded(&self, path: &Path) -> bool {
        path.components().any(|component| {
            component
                .as_os_str()
                .to_str()
                .map(|name| self.exclude.iter().any(|excluded| excluded == name))
                .unwrap_or(false)
        })
    }

    /// Discover all source files under the repository root, pruning
    /// excluded directories
    pub fn discover_files(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.repo_root)
            .into_iter()
            .filter_entry(|entry| {
                if !entry.file_type().is_dir() {
                    return true;
                }
                entry
                    .file_name()
                    .to_str()
                    .map(|name| !self.exclude.iter().any(|excluded| excluded == name))
                    .unwrap_or(true)
            })
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| self.extensions.iter().any(|wanted| wanted == ext))
                    .unwrap_or(false)
            })
            .map(|entry| entry.into_path())
            .collect()
    }

    /// Reindex the given paths, or the whole tree. One file's failure never
    /// aborts the batch; it is logged and counted. Files are processed in
    /// no particular order.
    pub async fn reindex(&self, paths: Option<Vec<String>>, full: bool) -> Result<ReindexReport> {
        let started = Instant::now();

        if full {
            info!("Full reindex requested, clearing existing index");
            self.store.clear().context("clearing index")?;
        }

        let files: Vec<PathBuf> = match (paths, full) {
            (Some(paths), false) => paths.iter().map(|p| self.repo_root.join(p)).collect(),
            _ => self.discover_files(),
        };

        let dispatched = files.len();
        info!("Dispatching {} files for extraction", dispatched);

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(dispatched);

        for file in files {
            let semaphore = Arc::clone(&semaphore);
            let store = self.store.clone();
            let extractor = Arc::clone(&self.extractor);
            let rules = Arc::clone(&self.rules);
            let repo_root = self.repo_root.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| anyhow::anyhow!("worker pool closed: {}", e))?;

                let result = index_one(&repo_root, &file, &extractor, &rules, &store).await;
                if let Err(ref err) = result {
                    error!("Failed to index {}: {:#}", file.display(), err);
                }
                result
            }));
        }

        // Join barrier: counters are only meaningful once every dispatched
        // unit has finished.
        let mut files_indexed = 0usize;
        let mut errors = 0usize;
        for outcome in join_all(handles).await {
            match outcome {
                Ok(Ok(())) => files_indexed += 1,
                Ok(Err(_)) => errors += 1,
                Err(join_err) => {
                    error!("Indexing task aborted: {}", join_err);
                    errors += 1;
                }
            }
        }

        let elapsed_seconds = started.elapsed().as_secs_f64();
        let files_per_second = if elapsed_seconds > 0.0 {
            files_indexed as f64 / elapsed_seconds
        } else {
            0.0
        };

        info!(
            "Reindex complete: {} indexed, {} errors in {:.2}s",
            files_indexed, errors, elapsed_seconds
        );

        Ok(ReindexReport {
            files_indexed,
            errors,
            elapsed_seconds,
            files_per_second,
        })
    }
}

/// Extract one file and persist its facts, keyed by the path relative to
/// the repository root
async fn index_one(
    repo_root: &Path,
    file: &Path,
    extractor: &Extractor,
    rules: &FileTypeRules,
    store: &IndexDatabase,
) -> Result<()> {
    let rel_path = file
        .strip_prefix(repo_root)
        .unwrap_or(file)
        .to_string_lossy()
        .to_string();

    let mut doc = extractor
        .extract(file)
        .await
        .with_context(|| format!("extracting {}", rel_path))?;

    if doc.file_type.is_none() {
        doc.file_type = rules.classify(&rel_path).map(str::to_string);
    }

    store
        .upsert_file(&rel_path, &doc)
        .with_context(|| format!("storing {}", rel_path))?;

    debug!("Indexed {} ({} symbols)", rel_path, doc.symbols.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::fs;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    /// Fake extractor: emits one class symbol named after the file, and
    /// fails for any path containing "bad".
    const FAKE_EXTRACTOR: &str = r#"
[ -f "$1" ] || { echo "no such file: $1" >&2; exit 2; }
case "$1" in
  *bad*) echo "boom" >&2; exit 1 ;;
esac
name=$(basename "$1" .rb)
cat <<EOF
{"file_type":null,"line_count":2,"symbols":[{"name":"$name","type":"class","start_line":1,"end_line":2}]}
EOF
"#;

    struct Fixture {
        _repo: TempDir,
        indexer: Indexer,
    }

    fn fixture(files: &[&str]) -> Fixture {
        let repo = tempdir().unwrap();
        for file in files {
            let path = repo.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "class Placeholder\nend\n").unwrap();
        }

        let script = repo.path().join("fake_extractor.sh");
        fs::write(&script, FAKE_EXTRACTOR).unwrap();

        let store = IndexDatabase::new(repo.path().join("test.db")).unwrap();
        let extractor = Arc::new(Extractor::new("sh", &script, Duration::from_secs(5)));
        let config = Config::default();
        let rules = Arc::new(FileTypeRules::from_config(&config).unwrap());
        let indexer = Indexer::new(repo.path(), store, extractor, rules, &config.indexing);

        Fixture { _repo: repo, indexer }
    }

    #[tokio::test]
    async fn test_full_reindex_discovers_and_excludes() {
        let fx = fixture(&[
            "app/models/user.rb",
            "app/models/post.rb",
            "vendor/gems/skipped.rb",
            "README.md",
        ]);

        let report = fx.indexer.reindex(None, true).await.unwrap();
        assert_eq!(report.files_indexed, 2);
        assert_eq!(report.errors, 0);

        let store = fx.indexer.store();
        assert!(store.get_symbol("app/models/user.rb", "user").unwrap().is_some());
        assert!(store
            .get_symbol("vendor/gems/skipped.rb", "skipped")
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_batch_accounting() {
        let fx = fixture(&["app/models/good.rb", "app/models/bad.rb"]);

        let report = fx.indexer.reindex(None, true).await.unwrap();
        assert_eq!(report.files_indexed + report.errors, 2);
        assert_eq!(report.errors, 1);

        // The failing file is absent, the good one landed
        let store = fx.indexer.store();
        assert!(store.get_symbol("app/models/good.rb", "good").unwrap().is_some());
        assert!(store.get_symbol("app/models/bad.rb", "bad").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_paths_mode_indexes_exactly_that_set() {
        let fx = fixture(&["app/models/user.rb", "app/models/post.rb"]);

        let report = fx
            .indexer
            .reindex(Some(vec!["app/models/user.rb".to_string()]), false)
            .await
            .unwrap();

        assert_eq!(report.files_indexed, 1);
        let store = fx.indexer.store();
        assert!(store.get_symbol("app/models/user.rb", "user").unwrap().is_some());
        assert!(store.get_symbol("app/models/post.rb", "post").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_extraction_preserves_previous_facts() {
        let fx = fixture(&["app/models/user.rb"]);
        fx.indexer.reindex(None, true).await.unwrap();

        // Rename on disk so the extractor now refuses it, as if the file
        // became unparseable
        let old = fx.indexer.repo_root().join("app/models/user.rb");
        let bad = fx.indexer.repo_root().join("app/models/user_bad.rb");
        fs::rename(&old, &bad).unwrap();

        let report = fx
            .indexer
            .reindex(Some(vec!["app/models/user_bad.rb".to_string()]), false)
            .await
            .unwrap();
        assert_eq!(report.errors, 1);

        // Previously stored facts for the original path are untouched
        let store = fx.indexer.store();
        assert!(store.get_symbol("app/models/user.rb", "user").unwrap().is_some());

        // Once the root cause is fixed, reindexing that path succeeds
        fs::rename(&bad, &old).unwrap();
        let report = fx
            .indexer
            .reindex(Some(vec!["app/models/user.rb".to_string()]), false)
            .await
            .unwrap();
        assert_eq!(report.files_indexed, 1);
        assert_eq!(report.errors, 0);
    }

    #[tokio::test]
    async fn test_missing_path_counts_as_error() {
        let fx = fixture(&[]);
        let report = fx
            .indexer
            .reindex(Some(vec!["app/models/ghost.rb".to_string()]), false)
            .await
            .unwrap();
        assert_eq!(report.files_indexed, 0);
        assert_eq!(report.errors, 1);
    }

    #[tokio::test]
    async fn test_full_reindex_clears_first() {
        let fx = fixture(&["app/models/user.rb"]);
        fx.indexer.reindex(None, true).await.unwrap();

        fs::remove_file(fx.indexer.repo_root().join("app/models/user.rb")).unwrap();
        let report = fx.indexer.reindex(None, true).await.unwrap();

        assert_eq!(report.files_indexed, 0);
        assert_eq!(fx.indexer.store().statistics().unwrap().file_count, 0);
    }

    #[tokio::test]
    async fn test_classification_fallback_applied() {
        let fx = fixture(&["app/models/user.rb"]);
        fx.indexer.reindex(None, true).await.unwrap();

        // The fake extractor leaves file_type null; the rules fill it in
        let conn = fx.indexer.store().get_conn().unwrap();
        let file_type: Option<String> = conn
            .query_row(
                "SELECT file_type FROM files WHERE path = 'app/models/user.rb'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(file_type.as_deref(), Some("model"));
    }
}
