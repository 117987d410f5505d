// Path: crates/cli/src/main.rs

//! # canopy-snapshot
//!
//! Serializes one committed version of a canopy store into a chunk
//! directory, or restores such a directory into a fresh store. Runs as its
//! own process so a live writer is never sharing the transaction stack.

use anyhow::{Context, Result};
use canopy_state::snapshot;
use canopy_storage::Store;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "canopy-snapshot",
    version,
    about = "Snapshot tooling for canopy store directories"
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serialize one committed version into a snapshot directory.
    Create {
        /// Store directory to read from.
        #[clap(long)]
        db_dir: PathBuf,
        /// Snapshot directory to (re)create.
        #[clap(long)]
        dir: PathBuf,
        /// Version to serialize.
        #[clap(long)]
        version: u32,
        /// Upper bound on chunk size in bytes.
        #[clap(long, default_value_t = snapshot::DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },
    /// Restore a snapshot directory into a store.
    Apply {
        /// Store directory to restore into.
        #[clap(long)]
        db_dir: PathBuf,
        /// Snapshot directory holding snapshot.json and its chunks.
        #[clap(long)]
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();
    let cli = Cli::parse();
    match cli.command {
        Command::Create {
            db_dir,
            dir,
            version,
            chunk_size,
        } => {
            let store = Store::open(&db_dir)
                .with_context(|| format!("opening store at {}", db_dir.display()))?;
            let descriptor = snapshot::create_snapshot(&store, &dir, Some(version), chunk_size)
                .with_context(|| format!("creating snapshot of version {version}"))?;
            log::info!(
                "wrote {} chunks for version {} to {}",
                descriptor.chunks.len(),
                descriptor.version,
                dir.display()
            );
        }
        Command::Apply { db_dir, dir } => {
            let mut store = Store::open(&db_dir)
                .with_context(|| format!("opening store at {}", db_dir.display()))?;
            let descriptor = snapshot::apply_snapshot(&mut store, &dir)
                .with_context(|| format!("applying snapshot from {}", dir.display()))?;
            log::info!("restored version {}", descriptor.version);
        }
    }
    Ok(())
}
