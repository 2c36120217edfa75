use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use railgraph::cli;

#[derive(Parser)]
#[command(name = "railgraph")]
#[command(version)]
#[command(about = "Persistent structural index and retrieval engine for Rails codebases via MCP", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Project directory (shorthand for 'railgraph serve <project>')
    #[arg(value_name = "PROJECT")]
    project: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server over stdio (indexes on first run) - default command
    Serve {
        /// Project directory to serve
        #[arg(default_value = ".")]
        project: String,
    },

    /// Index a project
    Index {
        /// Project directory to index
        #[arg(short, long, default_value = ".")]
        project: String,

        /// Specific paths to reindex (comma-separated, relative to the root)
        #[arg(long, value_delimiter = ',')]
        paths: Option<Vec<String>>,

        /// Clear and rebuild the entire index
        #[arg(short, long)]
        full: bool,
    },

    /// Show index statistics
    Stats {
        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: String,
    },
}

fn init_logging(debug: bool, verbose: bool) {
    let default_level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Stdout belongs to the JSON-RPC transport; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.debug, cli.verbose);

    info!("railgraph v{} starting...", env!("CARGO_PKG_VERSION"));

    // Handle shorthand: railgraph <project>
    let command = match (cli.command, cli.project) {
        (Some(command), _) => command,
        (None, Some(project)) => Commands::Serve { project },
        (None, None) => Commands::Serve {
            project: ".".to_string(),
        },
    };

    match command {
        Commands::Serve { project } => {
            info!("Starting MCP server for project: {}", project);
            cli::serve::serve_stdio(project).await?;
        }

        Commands::Index { project, paths, full } => {
            cli::index::index_project(project, paths, full).await?;
        }

        Commands::Stats { project } => {
            cli::stats::show_stats(project, cli.verbose).await?;
        }
    }

    Ok(())
}
