//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use std::sync::Arc;

use crate::tools::cache::{flush_impl, invalidate_impl, stats_impl};
use crate::tools::{CacheInvalidateParams, CacheStatsParams};

use querycache_client::RedisStore;
use querycache_core::{CacheConfig, InvalidationManager};
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

/// The main MCP server handler for querycache.
#[derive(Clone)]
pub struct QueryCacheServer {
    store: Arc<RedisStore>,
    invalidation: Arc<InvalidationManager<RedisStore>>,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl QueryCacheServer {
    /// Create a new server handler over a connected store.
    pub fn new(store: Arc<RedisStore>, config: Arc<CacheConfig>) -> Self {
        let invalidation = Arc::new(InvalidationManager::new(Arc::clone(&store), config));
        Self { store, invalidation, tool_router: Self::tool_router() }
    }

    /// Report cache hit/miss counters and store memory usage.
    #[tool(description = "Report cache hits, misses, hit rate and store memory usage. Set reset=true to zero the counters.")]
    async fn cache_stats(&self, params: Parameters<CacheStatsParams>) -> Result<CallToolResult, McpError> {
        stats_impl(self.store.as_ref(), self.invalidation.keys(), params.0).await
    }

    /// Delete every key under the cache prefix.
    #[tool(description = "Delete every cached query, index set and counter under the configured prefix.")]
    async fn cache_flush(&self) -> Result<CallToolResult, McpError> {
        flush_impl(&self.invalidation).await
    }

    /// Drop cached queries for a table or a single row.
    #[tool(description = "Invalidate cached queries for a table, or only those that returned the row with primary key pk.")]
    async fn cache_invalidate(&self, params: Parameters<CacheInvalidateParams>) -> Result<CallToolResult, McpError> {
        invalidate_impl(&self.invalidation, params.0).await
    }
}

impl ServerHandler for QueryCacheServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "querycache".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tools_listed() {
        let config = Arc::new(CacheConfig::default());
        let store = Arc::new(RedisStore::connect(&config).unwrap());
        let server = QueryCacheServer::new(store, config);

        let mut names: Vec<String> = server.tool_router.list_all().into_iter().map(|t| t.name.to_string()).collect();
        names.sort();
        assert_eq!(names, ["cache_flush", "cache_invalidate", "cache_stats"]);
    }
}
