//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod db;
mod jobs;
mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::helpers::parse_job_type;
use crate::config::Config;
use crate::models::JobType;

#[derive(Parser)]
#[command(name = "tocwatch")]
#[command(about = "Serial fiction toc crawler and release tracker")]
#[command(version)]
pub struct Cli {
    /// Config file path (default: $TOCWATCH_CONFIG or ./tocwatch.toml)
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
    /// Run the scheduler until interrupted
    Run,

    /// Create or update the database schema
    Migrate,

    /// Add a scrape job
    Enqueue {
        /// Job type: toc, one-time-toc, feed, news or list
        #[arg(value_parser = parse_job_type)]
        job_type: JobType,
        /// Link to scrape
        url: String,
        /// Medium the link belongs to
        #[arg(long)]
        medium_id: Option<i64>,
        /// Repeat every N milliseconds (0 = run once)
        #[arg(long, default_value = "0")]
        interval_ms: i64,
    },

    /// List stored jobs
    Jobs,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Run => run::cmd_run(&config).await,
        Commands::Migrate => db::cmd_migrate(&config).await,
        Commands::Enqueue {
            job_type,
            url,
            medium_id,
            interval_ms,
        } => jobs::cmd_enqueue(&config, job_type, &url, medium_id, interval_ms).await,
        Commands::Jobs => jobs::cmd_jobs(&config).await,
    }
}
