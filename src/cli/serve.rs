use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use crate::cli::build_components;
use crate::indexer::watcher::start_watcher;
use crate::mcp::server::McpServer;

/// Start MCP server with stdio transport
pub async fn serve_stdio(project: String) -> Result<()> {
    let components = build_components(&project)?;

    info!("MCP server (stdio) for project: {}", project);

    // First run against an empty index: build it before serving, the way
    // a fresh install expects.
    let stats = components.store.statistics()?;
    if stats.file_count == 0 {
        info!("Index is empty, performing initial indexing...");
        let report = components.indexer.reindex(None, true).await?;
        info!(
            "Initial index: {} files, {} errors",
            report.files_indexed, report.errors
        );
    }

    if components.config.indexing.watch {
        let indexer = Arc::clone(&components.indexer);
        tokio::spawn(async move {
            if let Err(e) = start_watcher(indexer).await {
                error!("File watcher stopped: {:#}", e);
            }
        });
    }

    let server = McpServer::new(components.engine, components.indexer);
    server.run().await?;

    Ok(())
}
