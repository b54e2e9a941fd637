//! CLI for the reseed replication checker.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use reseed_core::config;

use commands::{run_check, run_upload};

/// Top-level CLI for reseed.
#[derive(Debug, Parser)]
#[command(name = "reseed")]
#[command(about = "reseed: verify and replenish content replication", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Check which claimed names are actually available from peers.
    Check {
        /// Check a single name instead of the whole claim set.
        #[arg(long)]
        name: Option<String>,

        /// Only process the first N claims.
        #[arg(long, value_name = "N")]
        limit: Option<usize>,

        /// Concurrency window for pipeline stages.
        #[arg(long, value_name = "N")]
        window: Option<usize>,

        /// Availability probe attempts per name.
        #[arg(long, value_name = "N")]
        max_attempts: Option<u32>,
    },

    /// Download descriptors and push them to reflector destinations.
    Upload {
        /// Reflector destinations, "host" or "host:port". Config
        /// destinations are used when none are given.
        destinations: Vec<String>,

        /// Only push these names.
        #[arg(long, num_args = 1..)]
        names: Vec<String>,

        /// Only process the first N claims.
        #[arg(long, value_name = "N")]
        limit: Option<usize>,

        /// Concurrency window for pipeline stages.
        #[arg(long, value_name = "N")]
        window: Option<usize>,

        /// Per-descriptor download timeout in seconds.
        #[arg(long, value_name = "SECS")]
        timeout_secs: Option<u64>,

        /// Give up on a destination's batch acknowledgement after SECS.
        #[arg(long, value_name = "SECS")]
        completion_timeout_secs: Option<u64>,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Check {
                name,
                limit,
                window,
                max_attempts,
            } => run_check(&cfg, name, limit, window, max_attempts).await?,
            CliCommand::Upload {
                destinations,
                names,
                limit,
                window,
                timeout_secs,
                completion_timeout_secs,
            } => {
                run_upload(
                    &cfg,
                    destinations,
                    names,
                    limit,
                    window,
                    timeout_secs,
                    completion_timeout_secs,
                )
                .await?
            }
        }

        Ok(())
    }
}
