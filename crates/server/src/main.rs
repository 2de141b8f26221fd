//! waystation entry point.
//!
//! Reads trigger events as JSON lines on stdin and writes one reply line per
//! event on stdout. Logging goes to stderr to keep stdout for the protocol.
//! A previously activated version is picked up again at startup.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use waystation_client::{FetchClient, FetchConfig, delivery_handlers};
use waystation_core::{AppConfig, CacheManager, ControlSurface, Fetcher, KvStore, SqliteStore};

mod driver;
mod error;
mod handler;
mod protocol;

use handler::EventHandler;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(db = %config.db_path.display(), origin = %config.origin, version = %config.cache_version, "starting waystation");

    let store: Arc<dyn KvStore> = Arc::new(SqliteStore::open(&config.db_path).await?);
    let fetcher: Arc<dyn Fetcher> = Arc::new(FetchClient::new(FetchConfig::from(&config))?);
    let handlers = delivery_handlers(&config, Arc::clone(&fetcher))?;
    let prune_every = config.prune_interval();

    let mut surface = ControlSurface::new(CacheManager::new(store, fetcher, config)?);
    for (tag, handler) in handlers {
        surface.register(tag, handler);
    }
    let state = surface.restore().await?;
    tracing::info!(?state, "lifecycle state");
    let handler = Arc::new(EventHandler::new(surface));

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    driver::run(Arc::clone(&handler), BufReader::new(tokio::io::stdin()), tokio::io::stdout(), prune_every, shutdown)
        .await?;

    handler.surface().settle().await;
    tracing::info!("waystation stopped");
    Ok(())
}
