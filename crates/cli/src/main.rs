//! querycache command-line tool.
//!
//! Operator commands against the cache namespace in Redis: flush, stats,
//! targeted invalidation and key inspection. Output is JSON on stdout; logs go
//! to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use querycache_client::RedisStore;
use querycache_core::cache::PayloadCodec;
use querycache_core::{CacheConfig, InvalidationManager};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "querycache")]
#[command(author, version, about = "Inspect and invalidate the query result cache", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path (overrides QUERYCACHE_CONFIG_FILE)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Delete every key under the cache prefix
    Flush,

    /// Show hit/miss counters and store memory usage
    Stats {
        /// Zero the counters after printing them
        #[arg(long)]
        reset: bool,
    },

    /// Drop every cached query that read from a table
    InvalidateTable {
        /// Table name
        table: String,
    },

    /// Drop every cached query that returned a given row
    InvalidateRow {
        /// Table name
        table: String,

        /// Primary key value
        pk: String,

        /// Treat the key as a string even if it looks numeric
        #[arg(short, long)]
        string: bool,
    },

    /// Describe the value stored at a cache key
    Inspect {
        /// Full key, e.g. qc:query:<hash> or qc:index:table:posts
        key: String,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose { EnvFilter::new("debug") } else { EnvFilter::from_default_env() };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => CacheConfig::load_from(Some(path.as_path())),
        None => CacheConfig::load(),
    }
    .context("loading cache configuration")?;

    tracing::debug!(prefix = %config.prefix, url = %config.redis_url, "Loaded configuration");

    let store = Arc::new(RedisStore::connect(&config)?);
    let codec = PayloadCodec::new(config.compress_threshold);
    let invalidation = InvalidationManager::new(Arc::clone(&store), Arc::new(config));

    let output = match cli.command {
        Commands::Flush => commands::flush(&invalidation).await?,
        Commands::Stats { reset } => commands::stats(store.as_ref(), invalidation.keys(), reset).await?,
        Commands::InvalidateTable { table } => commands::invalidate_table(&invalidation, &table).await?,
        Commands::InvalidateRow { table, pk, string } => {
            let pk = commands::parse_primary_key(&pk, string);
            commands::invalidate_row(&invalidation, &table, &pk).await?
        }
        Commands::Inspect { key } => commands::inspect(store.as_ref(), &codec, &key).await?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
