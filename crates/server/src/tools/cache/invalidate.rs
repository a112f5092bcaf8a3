//! cache_invalidate tool implementation.
//!
//! Drops cached queries for a whole table, or for one row when `pk` is given.

use querycache_core::{CacheStore, Error, InvalidationManager, InvalidationReport, PrimaryKey};
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the cache_invalidate tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheInvalidateParams {
    /// Table whose cached queries should be dropped.
    pub table: String,

    /// Restrict to queries that returned this row.
    pub pk: Option<PrimaryKey>,
}

/// Output from the cache_invalidate tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheInvalidateOutput {
    pub table: String,
    pub pk: Option<PrimaryKey>,
    #[serde(flatten)]
    pub report: InvalidationReport,
}

/// Implementation of the cache_invalidate tool.
pub async fn invalidate_impl<S: CacheStore>(
    invalidation: &InvalidationManager<S>, params: CacheInvalidateParams,
) -> Result<CallToolResult, McpError> {
    let table = params.table.trim();
    if table.is_empty() {
        return Err(Error::InvalidInput("table must not be empty".to_string()).into());
    }

    let report = match &params.pk {
        Some(pk) => invalidation.invalidate_row(table, pk).await?,
        None => invalidation.invalidate_table(table).await?,
    };

    let output = CacheInvalidateOutput { table: table.to_string(), pk: params.pk, report };
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}
