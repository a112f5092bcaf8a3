//! querycache MCP server entry point.
//!
//! Boots the cache administration server on stdio transport.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use querycache_client::RedisStore;
use querycache_core::CacheConfig;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = CacheConfig::load().context("loading cache configuration")?;
    let store = RedisStore::connect(&config)?;
    if let Err(err) = store.ping().await {
        tracing::warn!(error = %err, url = %config.redis_url, "Redis not reachable at startup");
    }

    tracing::info!(prefix = %config.prefix, "Starting querycache server on stdio transport");

    let handler = handler::QueryCacheServer::new(Arc::new(store), Arc::new(config));
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    Ok(())
}
