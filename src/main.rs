use std::path::PathBuf;

use clap::{Parser, Subcommand};
use docseek::Result;
use docseek::commands::{
    index_folders, related, reset, search, show_config, show_status, write_config,
};
use docseek::config::{Config, get_config_dir};
use docseek::service::{DEFAULT_RELATED_LIMIT, DEFAULT_SEARCH_LIMIT};

#[derive(Parser)]
#[command(name = "docseek")]
#[command(about = "Local semantic search over your documents")]
#[command(version)]
struct Cli {
    /// Application directory holding config, index and state
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or validate the configuration file
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Index one or more folders, replacing the index if the folder set changed
    Index {
        /// Folders to index
        #[arg(required = true)]
        folders: Vec<PathBuf>,
    },
    /// Search indexed documents
    Search {
        query: String,
        /// Maximum number of results
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },
    /// Find documents similar to a file
    Related {
        file: PathBuf,
        /// Maximum number of results
        #[arg(long, default_value_t = DEFAULT_RELATED_LIMIT)]
        limit: usize,
    },
    /// Delete the index and forget the indexed folders
    Reset,
    /// Show connectivity and index status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let base_dir = match cli.base_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };
    let config = Config::load(&base_dir)?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config)?;
            } else {
                write_config(&config)?;
            }
        }
        Commands::Index { folders } => {
            index_folders(config, folders).await?;
        }
        Commands::Search { query, limit } => {
            search(config, &query, limit).await?;
        }
        Commands::Related { file, limit } => {
            related(config, &file, limit).await?;
        }
        Commands::Reset => {
            reset(config).await?;
        }
        Commands::Status => {
            show_status(config).await?;
        }
    }

    Ok(())
}
