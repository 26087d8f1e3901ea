//! shardkv admin tool
//!
//! Opens a data directory in-process and runs one command against it.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use shardkv::{Config, KvError, Router};
use tracing_subscriber::{fmt, EnvFilter};

/// shardkv admin tool
#[derive(Parser, Debug)]
#[command(name = "shardkv")]
#[command(about = "Embedded sharded key-value store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./shardkv_data")]
    data_dir: String,

    /// Number of shards (must match the directory's existing layout)
    #[arg(short, long, default_value = "1")]
    shards: usize,

    /// MemTable size limit in KB before flush
    #[arg(short = 'm', long, default_value = "4096")]
    memtable_kb: usize,

    /// Max uncompressed segment page length in bytes
    #[arg(short = 'l', long, default_value = "4096")]
    segment_length: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Flush every memtable and compact every shard
    Compact,

    /// Print per-shard counters
    Stats,
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,shardkv=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let memtable_bytes = match kib_to_bytes(args.memtable_kb) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .shard_count(args.shards)
        .memtable_size_limit(memtable_bytes)
        .segment_length(args.segment_length)
        .build();

    let router = match Router::open(config) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Failed to open data directory: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = run(&router, args.command);
    if let Err(e) = router.close() {
        tracing::error!("Failed to close cleanly: {}", e);
    }

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(KvError::NotFound) => {
            eprintln!("(not found)");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn kib_to_bytes(kb: usize) -> shardkv::Result<usize> {
    kb.checked_mul(1024)
        .ok_or_else(|| KvError::Config(format!("memtable size of {} KB is too large", kb)))
}

fn run(router: &Router, command: Commands) -> shardkv::Result<()> {
    match command {
        Commands::Get { key } => {
            println!("{}", router.get(&key)?);
        }
        Commands::Set { key, value } => {
            router.set(&key, &value)?;
            println!("OK");
        }
        Commands::Compact => {
            router.flush_all()?;
            let compacted = router.compact_all()?;
            println!("compacted {} of {} shards", compacted, router.shard_count());
        }
        Commands::Stats => {
            for (i, stats) in router.stats().iter().enumerate() {
                println!(
                    "shard-{}: memtable_entries={} memtable_bytes={} segments={} dirty={}",
                    i, stats.memtable_entries, stats.memtable_bytes, stats.segment_count, stats.dirty
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memtable_size_overflow_is_config_error() {
        assert_eq!(kib_to_bytes(4096).unwrap(), 4096 * 1024);
        assert!(matches!(kib_to_bytes(usize::MAX), Err(KvError::Config(_))));
    }
}
