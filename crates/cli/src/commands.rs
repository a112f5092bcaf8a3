//! Subcommand implementations.
//!
//! Each command returns the JSON document `main` prints, so they can be
//! exercised against an in-memory store.

use anyhow::{Result, bail};
use querycache_core::cache::{CacheEntry, KeyKind, PayloadCodec, collect_stats, reset_stats};
use querycache_core::{CacheStore, InvalidationManager, KeyGenerator, PrimaryKey};
use serde_json::{Value, json};

/// Read a primary key from the command line. Digits become an integer key
/// unless `as_string` is set.
pub fn parse_primary_key(raw: &str, as_string: bool) -> PrimaryKey {
    match raw.parse::<i64>() {
        Ok(n) if !as_string => PrimaryKey::Int(n),
        _ => PrimaryKey::Str(raw.to_string()),
    }
}

pub async fn flush<S: CacheStore>(invalidation: &InvalidationManager<S>) -> Result<Value> {
    let deleted = invalidation.flush_all().await?;
    Ok(json!({ "pattern": invalidation.keys().namespace_pattern(), "deleted": deleted }))
}

pub async fn stats<S: CacheStore>(store: &S, keys: &KeyGenerator, reset: bool) -> Result<Value> {
    let stats = collect_stats(store, keys).await?;
    if reset {
        reset_stats(store, keys).await?;
    }
    Ok(serde_json::to_value(stats)?)
}

pub async fn invalidate_table<S: CacheStore>(invalidation: &InvalidationManager<S>, table: &str) -> Result<Value> {
    let report = invalidation.invalidate_table(table).await?;
    Ok(json!({ "table": table, "report": report }))
}

pub async fn invalidate_row<S: CacheStore>(
    invalidation: &InvalidationManager<S>, table: &str, pk: &PrimaryKey,
) -> Result<Value> {
    let report = invalidation.invalidate_row(table, pk).await?;
    Ok(json!({ "table": table, "pk": pk, "report": report }))
}

/// Describe whatever lives at `key`: a decoded entry summary, index members,
/// or a counter value.
pub async fn inspect<S: CacheStore>(store: &S, codec: &PayloadCodec, key: &str) -> Result<Value> {
    let Some(parsed) = KeyGenerator::parse_key(key) else {
        bail!("{key} is not a querycache key");
    };

    let detail = match parsed.kind {
        KeyKind::Query => match store.get(key).await? {
            Some(bytes) => {
                let entry: CacheEntry = codec.decode(&bytes)?;
                json!({
                    "table": entry.table,
                    "pks": entry.pks,
                    "relations": entry.relations,
                    "created_at": entry.created_at,
                    "rows": entry.data.len(),
                    "bytes": bytes.len(),
                })
            }
            None => Value::Null,
        },
        KeyKind::TableIndex | KeyKind::RowIndex => {
            let mut members = store.set_members(key).await?;
            members.sort();
            json!({ "members": members })
        }
        KeyKind::Metrics => match store.get(key).await? {
            Some(bytes) => json!({ "value": String::from_utf8_lossy(&bytes) }),
            None => Value::Null,
        },
    };

    Ok(json!({ "key": key, "parsed": parsed, "detail": detail }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use querycache_core::cache::column;
    use querycache_core::{CacheConfig, CacheManager, Error, MemoryStore, QueryDescriptor, QueryOptions, Row};

    fn rows(ids: &[i64]) -> Vec<Row> {
        ids.iter()
            .map(|id| {
                let mut row = Row::new();
                row.insert("id".into(), json!(id));
                row
            })
            .collect()
    }

    async fn cached(store: &Arc<MemoryStore>) -> (CacheManager<MemoryStore>, String) {
        let cache = CacheManager::new(Arc::clone(store), Arc::new(CacheConfig::default()));
        let query = QueryDescriptor::new("SELECT * FROM posts");
        let data = rows(&[1, 2]);
        cache
            .fetch_or_compute(&query, "posts", column("id"), QueryOptions::default(), || async move {
                Ok::<_, Error>(data)
            })
            .await
            .unwrap();
        let key = cache.keys().query_key(&query);
        (cache, key)
    }

    #[test]
    fn test_parse_primary_key() {
        assert_eq!(parse_primary_key("42", false), PrimaryKey::Int(42));
        assert_eq!(parse_primary_key("42", true), PrimaryKey::Str("42".to_string()));
        assert_eq!(parse_primary_key("abc", false), PrimaryKey::Str("abc".to_string()));
    }

    #[tokio::test]
    async fn test_inspect_query_entry() {
        let store = Arc::new(MemoryStore::new());
        let (_, key) = cached(&store).await;

        let out = inspect(store.as_ref(), &PayloadCodec::new(0), &key).await.unwrap();
        assert_eq!(out["parsed"]["kind"], json!("query"));
        assert_eq!(out["detail"]["table"], json!("posts"));
        assert_eq!(out["detail"]["rows"], json!(2));
        assert_eq!(out["detail"]["pks"], json!([1, 2]));
    }

    #[tokio::test]
    async fn test_inspect_index_members() {
        let store = Arc::new(MemoryStore::new());
        let (_, key) = cached(&store).await;

        let out = inspect(store.as_ref(), &PayloadCodec::new(0), "qc:rowindex:table:posts:pk:1").await.unwrap();
        assert_eq!(out["parsed"]["kind"], json!("row_index"));
        assert_eq!(out["detail"]["members"], json!([key]));
    }

    #[tokio::test]
    async fn test_inspect_rejects_foreign_key() {
        let store = MemoryStore::new();
        assert!(inspect(&store, &PayloadCodec::new(0), "session:abc").await.is_err());
    }

    #[tokio::test]
    async fn test_invalidate_row_and_stats() {
        let store = Arc::new(MemoryStore::new());
        let (cache, key) = cached(&store).await;
        let invalidation = InvalidationManager::new(Arc::clone(&store), Arc::new(CacheConfig::default()));

        let out = invalidate_row(&invalidation, "posts", &PrimaryKey::Int(2)).await.unwrap();
        assert_eq!(out["report"]["entries_removed"], json!(1));
        assert!(!store.contains(&key).await);

        let out = stats(store.as_ref(), cache.keys(), true).await.unwrap();
        assert_eq!(out["misses"], json!(1));
        assert!(!store.contains("qc:metrics:misses").await);
    }

    #[tokio::test]
    async fn test_flush() {
        let store = Arc::new(MemoryStore::new());
        cached(&store).await;
        let invalidation = InvalidationManager::new(Arc::clone(&store), Arc::new(CacheConfig::default()));

        let out = flush(&invalidation).await.unwrap();
        assert!(out["deleted"].as_u64().unwrap() >= 4);
        assert!(store.keys().await.is_empty());
    }
}
