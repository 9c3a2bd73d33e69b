//! CLI for the UPQ batched upload scheduler.

mod commands;
mod control_socket;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use upq_core::config;
use upq_core::task::{BatchId, TaskId};

use commands::{run_cancel, run_config, run_upload};

/// Top-level CLI for the UPQ upload scheduler.
#[derive(Debug, Parser)]
#[command(name = "upq")]
#[command(about = "UPQ: batched, resumable upload scheduler", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Upload files in batches; batches run concurrently, files within a batch one by one.
    Upload {
        /// Files to upload.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Put at most N files in each batch (default: one batch for all files).
        #[arg(long, value_name = "N")]
        batch_size: Option<usize>,

        /// Destination directory (default: `server_endpoint` from the config).
        #[arg(long, value_name = "DIR")]
        dest: Option<PathBuf>,
    },

    /// Cancel a batch, or one task of it, in a running `upq upload`.
    Cancel {
        /// Batch identifier.
        batch: BatchId,

        /// Cancel only this task of the batch.
        #[arg(long, value_name = "ID")]
        task: Option<TaskId>,
    },

    /// Print the effective configuration.
    Config,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Upload {
                files,
                batch_size,
                dest,
            } => run_upload(&cfg, &files, batch_size, dest.as_deref()).await?,
            CliCommand::Cancel { batch, task } => run_cancel(batch, task).await?,
            CliCommand::Config => run_config(&cfg)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
