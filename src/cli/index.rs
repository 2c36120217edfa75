use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::info;

use crate::cli::build_components;

pub async fn index_project(project: String, paths: Option<Vec<String>>, full: bool) -> Result<()> {
    info!("Indexing project: {}", project);

    let components = build_components(&project)?;

    println!("Railgraph Indexer v{}", env!("CARGO_PKG_VERSION"));
    println!("Project: {}", project);
    println!(
        "Config: {}",
        if components.config.project.name != "unnamed-project" {
            "loaded"
        } else {
            "default"
        }
    );
    println!(
        "Database: {}",
        components.config.db_path(&components.repo_root).display()
    );
    println!("Full rebuild: {}", full);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    spinner.set_message("Extracting and indexing...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let report = components.indexer.reindex(paths, full).await?;

    spinner.finish_and_clear();

    println!("\nIndexing complete!");
    println!("  Files indexed: {}", report.files_indexed);
    println!("  Errors: {}", report.errors);
    println!("  Elapsed: {:.2}s", report.elapsed_seconds);
    println!("  Throughput: {:.1} files/s", report.files_per_second);

    let stats = components.store.statistics()?;
    println!("  Total symbols: {}", stats.symbol_count);

    Ok(())
}
