//! cache_flush tool implementation.
//!
//! Deletes every key under the configured prefix.

use querycache_core::{CacheStore, Error, InvalidationManager};
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Output from the cache_flush tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheFlushOutput {
    /// Pattern that was scanned.
    pub pattern: String,

    /// Number of keys deleted.
    pub deleted: u64,
}

/// Implementation of the cache_flush tool.
pub async fn flush_impl<S: CacheStore>(invalidation: &InvalidationManager<S>) -> Result<CallToolResult, McpError> {
    let deleted = invalidation.flush_all().await?;

    let output = CacheFlushOutput { pattern: invalidation.keys().namespace_pattern(), deleted };
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use querycache_core::{CacheConfig, MemoryStore};

    #[tokio::test]
    async fn test_flush_only_touches_namespace() {
        let store = Arc::new(MemoryStore::new());
        store.set("qc:query:a", b"{}", None).await.unwrap();
        store.set_add("qc:index:table:posts", &["qc:query:a".to_string()]).await.unwrap();
        store.set("other:key", b"1", None).await.unwrap();
        let invalidation = InvalidationManager::new(Arc::clone(&store), Arc::new(CacheConfig::default()));

        let result = flush_impl(&invalidation).await.unwrap();
        let content_val = serde_json::to_value(&result.content[0]).unwrap();
        let text = content_val
            .get("text")
            .and_then(|v| v.as_str())
            .expect("Expected text field in content");
        let output: CacheFlushOutput = serde_json::from_str(text).unwrap();

        assert_eq!(output.deleted, 2);
        assert_eq!(output.pattern, "qc:*");
        assert_eq!(store.keys().await, vec!["other:key".to_string()]);
    }
}
