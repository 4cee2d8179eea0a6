//! Shelf application binary - composition root.
//!
//! Ties together the Shelf crates into a small maintenance tool:
//! 1. Load configuration from TOML, applying CLI and env overrides
//! 2. Build the session with env-based credentials and no sync service
//! 3. Open the library facade with the plain-text extractor and SHA-256 hasher
//! 4. Run one subcommand and print its result

mod cli;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use clap::Parser;

use shelf_core::config::ShelfConfig;
use shelf_core::types::SortOrder;
use shelf_extract::{PlainTextExtractor, Sha256Hasher};
use shelf_storage::{CredentialProvider, Library, NoCloud, Session};

use cli::{categorizer_listing, CliArgs, Command};

/// Reads sync secrets from `SHELF_SECRET_<KEY>` environment variables.
struct EnvCredentialProvider;

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn get_secret(&self, key: &str) -> Option<String> {
        let var = format!(
            "SHELF_SECRET_{}",
            key.to_ascii_uppercase().replace(['-', '.'], "_")
        );
        std::env::var(var).ok().filter(|s| !s.is_empty())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let loaded = ShelfConfig::load(&config_file);
    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => ShelfConfig::default(),
    };
    if let Some(dir) = args.resolve_library_dir() {
        config.general.library_dir = dir;
    }
    let log_level = args
        .resolve_log_level()
        .unwrap_or_else(|| config.general.log_level.clone());

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Shelf v{}", env!("CARGO_PKG_VERSION"));
    match loaded {
        Ok(_) => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Err(e) => tracing::warn!(
            path = %config_file.display(),
            error = %e,
            "Failed to load config, using defaults"
        ),
    }

    let default_mode = config.search.default_mode;
    let session = Arc::new(Session::new(
        config,
        Arc::new(EnvCredentialProvider),
        Arc::new(NoCloud),
    ));
    tracing::info!(path = %session.library_dir().display(), "Library directory resolved");

    let library = Library::new(
        Arc::clone(&session),
        Arc::new(PlainTextExtractor::default()),
        Arc::new(Sha256Hasher),
    );

    match &args.command {
        Command::Search { .. } => {
            let params = args
                .command
                .search_params(default_mode)
                .ok_or("search arguments missing")?;
            let papers = library.search(&params).await?;
            for paper in &papers {
                println!("{}", serde_json::to_string(paper)?);
            }
            tracing::info!(count = papers.len(), "Search complete");
        }
        Command::Tags { folders, by_count } => {
            let (kind, sort_by) = categorizer_listing(*folders, *by_count);
            let order = if *by_count {
                SortOrder::Desc
            } else {
                SortOrder::Asc
            };
            for categorizer in library.load_categorizers(kind, sort_by, order).await? {
                println!("{:>6}  {}", categorizer.count, categorizer.name);
            }
        }
        Command::PurgeFeeds => {
            let result = library.purge_feed_entities(Utc::now()).await?;
            let mut feeds: Vec<_> = result.per_feed.iter().collect();
            feeds.sort();
            for (name, deleted) in feeds {
                println!("{:>6}  {}", deleted, name);
            }
            println!(
                "read: {}, unread: {}, total: {}",
                result.read_deleted,
                result.unread_deleted,
                result.total()
            );
        }
        Command::Reindex => {
            let count = library.reindex(None).await?;
            println!("reindexed {} papers", count);
        }
        Command::Stats => {
            let stats = library.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    session.close().await;
    Ok(())
}
