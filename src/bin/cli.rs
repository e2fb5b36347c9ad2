//! channelstore administration tool
//!
//! Inspects and maintains a storage directory offline.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use channelstore::transactions::EntryAssembler;
use channelstore::{Engine, OpaqueTypeDictionary, Result, StorageConfig};

/// channelstore CLI
#[derive(Parser, Debug)]
#[command(name = "channelstore")]
#[command(about = "Administration tool for channelstore storage directories")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a transactions log as tab-separated text
    ParseLog {
        /// Path of the transactions file
        file: PathBuf,
    },

    /// Print data file statistics per channel
    Stats {
        #[command(flatten)]
        storage: StorageArgs,
    },

    /// Rewrite every channel's transactions log to its minimal form
    CompactLog {
        #[command(flatten)]
        storage: StorageArgs,
    },

    /// Synchronize a backup directory with the storage
    Backup {
        #[command(flatten)]
        storage: StorageArgs,

        /// Backup directory
        #[arg(short, long)]
        target: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct StorageArgs {
    /// Storage directory
    #[arg(short, long, default_value = "./channelstore_data")]
    dir: PathBuf,

    /// Channel count the storage was created with
    #[arg(short, long, default_value = "1")]
    channels: usize,
}

impl StorageArgs {
    /// Schema-less configuration: no garbage collection, no background work
    fn config(&self, backup_dir: Option<&PathBuf>) -> Result<StorageConfig> {
        let mut builder = StorageConfig::builder()
            .base_dir(&self.dir)
            .channel_count(self.channels)
            .gc_enabled(false)
            .housekeeping_interval_ms(u32::MAX as u64);
        if let Some(dir) = backup_dir {
            builder = builder.backup_dir(dir);
        }
        builder.build()
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,channelstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args.command) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::ParseLog { file } => {
            print!("{}", EntryAssembler::assemble_file(&file)?);
            Ok(())
        }
        Commands::Stats { storage } => {
            let engine = Engine::open(storage.config(None)?, Arc::new(OpaqueTypeDictionary))?;
            for channel in engine.statistics()? {
                println!(
                    "channel {}: {} files, {} live bytes of {}",
                    channel.channel_index,
                    channel.file_count,
                    channel.live_data_length,
                    channel.total_data_length
                );
                for file in &channel.files {
                    println!(
                        "  #{:<6} {:>12} / {:<12} {}",
                        file.number,
                        file.data_length,
                        file.total_length,
                        file.path.display()
                    );
                }
            }
            engine.shutdown()
        }
        Commands::CompactLog { storage } => {
            let engine = Engine::open(storage.config(None)?, Arc::new(OpaqueTypeDictionary))?;
            engine.issue_transactions_file_check(false)?;
            tracing::info!("transactions logs compacted");
            engine.shutdown()
        }
        Commands::Backup { storage, target } => {
            // startup synchronization does the work
            let engine =
                Engine::open(storage.config(Some(&target))?, Arc::new(OpaqueTypeDictionary))?;
            tracing::info!(target = %target.display(), "backup synchronized");
            engine.shutdown()
        }
    }
}
