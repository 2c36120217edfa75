// CLI command implementations

pub mod index;
pub mod serve;
pub mod stats;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::config::{Config, FileTypeRules};
use crate::index::db::IndexDatabase;
use crate::indexer::extractor::Extractor;
use crate::indexer::Indexer;
use crate::query::engine::QueryEngine;

/// Everything a command needs, wired once from configuration
pub struct Components {
    pub config: Config,
    pub repo_root: PathBuf,
    pub store: IndexDatabase,
    pub indexer: Arc<Indexer>,
    pub engine: Arc<QueryEngine>,
}

/// Build the component graph for a project directory
pub fn build_components(project: &str) -> Result<Components> {
    let config = Config::from_project_dir(project);
    let repo_root = Path::new(project).to_path_buf();

    let store = IndexDatabase::new(config.db_path(&repo_root))?;
    let extractor = Arc::new(Extractor::from_config(&config.extractor));
    let rules = Arc::new(FileTypeRules::from_config(&config)?);

    let indexer = Arc::new(Indexer::new(
        &repo_root,
        store.clone(),
        Arc::clone(&extractor),
        Arc::clone(&rules),
        &config.indexing,
    ));
    let engine = Arc::new(QueryEngine::new(
        &repo_root,
        store.clone(),
        extractor,
        rules,
    ));

    Ok(Components {
        config,
        repo_root,
        store,
        indexer,
        engine,
    })
}
