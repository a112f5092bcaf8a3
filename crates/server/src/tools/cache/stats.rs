//! cache_stats tool implementation.
//!
//! Reports hit/miss counters and store memory usage, optionally resetting the
//! counters afterwards.

use querycache_core::cache::{CacheStats, collect_stats, reset_stats};
use querycache_core::{CacheStore, Error, KeyGenerator};
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the cache_stats tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CacheStatsParams {
    /// Zero the hit/miss counters after reading them.
    #[serde(default)]
    pub reset: bool,
}

/// Output from the cache_stats tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheStatsOutput {
    #[serde(flatten)]
    pub stats: CacheStats,

    /// Whether the counters were reset after this snapshot.
    pub reset: bool,
}

/// Implementation of the cache_stats tool.
pub async fn stats_impl<S: CacheStore>(
    store: &S, keys: &KeyGenerator, params: CacheStatsParams,
) -> Result<CallToolResult, McpError> {
    let stats = collect_stats(store, keys).await?;
    if params.reset {
        let removed = reset_stats(store, keys).await?;
        tracing::info!(removed, "Cache counters reset");
    }

    let output = CacheStatsOutput { stats, reset: params.reset };
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}
