//! CLI parser and command dispatch.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "docpipe")]
#[command(about = "Resumable acquisition pipeline for paginated document-listing sites")]
#[command(version)]
pub struct Cli {
    /// Data directory (overrides config file)
    #[arg(long, short = 'd', global = true)]
    data: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and databases
    Init,

    /// Walk the listing site and record discovered documents
    Discover {
        /// Start URL (overrides the configured listing start_url)
        #[arg(long)]
        start_url: Option<String>,

        /// Page ceiling for this pass
        #[arg(long)]
        max_pages: Option<usize>,
    },

    /// Download pending documents
    Download {
        /// Maximum documents to process this pass
        #[arg(short, long)]
        limit: Option<usize>,

        /// Ignore eligibility predicates and attempt caps
        #[arg(long)]
        force: bool,
    },

    /// Extract text (and best-effort tables) from downloaded documents
    Extract {
        /// Maximum documents to process this pass
        #[arg(short, long)]
        limit: Option<usize>,

        /// Re-extract everything that has a raw file
        #[arg(long)]
        force: bool,
    },

    /// Queue table-extraction jobs for the async worker
    SubmitJobs {
        /// Maximum documents to submit this pass
        #[arg(short, long, default_value_t = 500)]
        limit: usize,

        /// Submit even documents already extracted
        #[arg(long)]
        force: bool,
    },

    /// Drain one batch of worker results from the queue
    CollectResults,

    /// Submit jobs, then poll for results until drained or idle
    Pipeline {
        /// Maximum documents to submit this pass
        #[arg(short, long, default_value_t = 500)]
        limit: usize,

        /// Submit even documents already extracted
        #[arg(long)]
        force: bool,
    },

    /// Probe stale documents for remote changes
    Revalidate {
        /// Also reopen documents whose raw file vanished from disk
        #[arg(long)]
        reconcile: bool,

        /// Maximum documents to probe this pass
        #[arg(short, long, default_value_t = 200)]
        limit: usize,
    },

    /// Show document and job counts
    Status {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Serve the queue over HTTP for out-of-process workers
    QueueServe {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Bind port
        #[arg(long, default_value_t = 8077)]
        port: u16,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (settings, _config) = load_settings_with_options(LoadOptions {
        config_path: cli.config.clone(),
        data: cli.data.clone(),
    });

    match cli.command {
        Commands::Init => commands::init::cmd_init(&settings).await,
        Commands::Discover {
            start_url,
            max_pages,
        } => commands::discover::cmd_discover(&settings, start_url, max_pages).await,
        Commands::Download { limit, force } => {
            commands::download::cmd_download(&settings, limit, force).await
        }
        Commands::Extract { limit, force } => {
            commands::extract::cmd_extract(&settings, limit, force).await
        }
        Commands::SubmitJobs { limit, force } => {
            commands::jobs::cmd_submit_jobs(&settings, limit, force).await
        }
        Commands::CollectResults => commands::jobs::cmd_collect_results(&settings).await,
        Commands::Pipeline { limit, force } => {
            commands::jobs::cmd_pipeline(&settings, limit, force).await
        }
        Commands::Revalidate { reconcile, limit } => {
            commands::revalidate::cmd_revalidate(&settings, reconcile, limit).await
        }
        Commands::Status { json } => commands::status::cmd_status(&settings, json).await,
        Commands::QueueServe { host, port } => {
            commands::serve::cmd_queue_serve(&settings, &host, port).await
        }
    }
}
