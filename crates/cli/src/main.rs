//! script-cache command-line entry point.
//!
//! Warms, inspects and purges the persistent script cache. Reports go to
//! stdout as JSON; logging goes to stderr.

use anyhow::Result;
use clap::{Parser, Subcommand};
use script_cache_client::ScriptCache;
use script_cache_core::{AppConfig, CacheDb, CacheStore};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;

#[derive(Parser)]
#[command(name = "script-cache")]
#[command(version, about = "Persistent cache for remote scripts", long_about = None)]
struct Cli {
    /// Override the database path from configuration
    #[arg(long, global = true, env = "SCRIPT_CACHE_DB_PATH")]
    db: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch URLs in the background worker and cache them
    Warm {
        /// Script URLs to cache
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Show the cached entry for a URL
    Get {
        /// Script URL
        url: String,
    },

    /// Remove expired entries, or everything with --all
    Purge {
        /// Remove every entry regardless of expiry
        #[arg(long)]
        all: bool,
    },

    /// Load a URL through the cache the way a host would
    Load {
        /// Script URL
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    tracing::info!(db = %config.db_path.display(), "opening script cache");
    let db = CacheDb::open(&config.db_path, config.quota_bytes).await?;

    let report = match cli.command {
        Commands::Warm { urls } => {
            let cache = ScriptCache::with_db(db, &config).await?;
            let report = commands::warm_impl(&cache, &urls, config.request_timeout()).await?;
            cache.shutdown();
            report
        }
        Commands::Get { url } => {
            let store = CacheStore::new(db, config.key_prefix.clone());
            commands::get_impl(&store, &url).await?
        }
        Commands::Purge { all } => {
            let store = CacheStore::new(db, config.key_prefix.clone());
            commands::purge_impl(&store, all).await?
        }
        Commands::Load { url } => {
            let cache = ScriptCache::with_db(db, &config).await?;
            let report = commands::load_impl(&cache, &url, config.request_timeout()).await?;
            cache.shutdown();
            report
        }
    };

    println!("{report}");
    Ok(())
}
