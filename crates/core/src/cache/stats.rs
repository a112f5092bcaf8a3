//! Hit/miss counters and store statistics.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::keys::KeyGenerator;
use super::store::CacheStore;
use crate::Error;

/// Counter bumped on every cache hit.
pub const HITS: &str = "hits";
/// Counter bumped on every cache miss.
pub const MISSES: &str = "misses";

const COUNTERS: [&str; 2] = [HITS, MISSES];

/// Snapshot of cache effectiveness.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// hits / (hits + misses), 0 when there were no lookups.
    pub hit_rate: f64,
    /// Selected fields from the store's `memory` and `keyspace` info sections.
    pub store_info: BTreeMap<String, String>,
}

/// Read the counters and store info.
pub async fn collect_stats<S: CacheStore>(store: &S, keys: &KeyGenerator) -> Result<CacheStats, Error> {
    let hits = read_counter(store, &keys.metrics_key(HITS)).await?;
    let misses = read_counter(store, &keys.metrics_key(MISSES)).await?;

    let mut store_info = BTreeMap::new();
    for section in ["memory", "keyspace"] {
        store_info.extend(store.info(section).await?);
    }

    let lookups = hits + misses;
    let hit_rate = if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 };

    Ok(CacheStats { hits, misses, hit_rate, store_info })
}

/// Delete the hit/miss counters. Returns how many existed.
pub async fn reset_stats<S: CacheStore>(store: &S, keys: &KeyGenerator) -> Result<u64, Error> {
    let counters: Vec<String> = COUNTERS.iter().map(|name| keys.metrics_key(name)).collect();
    store.delete(&counters).await
}

async fn read_counter<S: CacheStore>(store: &S, key: &str) -> Result<u64, Error> {
    let Some(raw) = store.get(key).await? else {
        return Ok(0);
    };
    std::str::from_utf8(&raw)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or_else(|| Error::Decode(format!("counter {key} is not an integer")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::HashAlgorithm;
    use crate::cache::memory::MemoryStore;

    #[tokio::test]
    async fn test_empty_stats() {
        let store = MemoryStore::new();
        let keys = KeyGenerator::new("qc", HashAlgorithm::Sha256);
        let stats = collect_stats(&store, &keys).await.unwrap();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.hit_rate, 0.0);
        assert!(stats.store_info.contains_key("used_memory"));
    }

    #[tokio::test]
    async fn test_hit_rate_and_reset() {
        let store = MemoryStore::new();
        let keys = KeyGenerator::new("qc", HashAlgorithm::Sha256);
        for _ in 0..3 {
            store.increment("qc:metrics:hits").await.unwrap();
        }
        store.increment("qc:metrics:misses").await.unwrap();

        let stats = collect_stats(&store, &keys).await.unwrap();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.75).abs() < f64::EPSILON);

        assert_eq!(reset_stats(&store, &keys).await.unwrap(), 2);
        assert_eq!(collect_stats(&store, &keys).await.unwrap().hits, 0);
    }

    #[tokio::test]
    async fn test_corrupt_counter() {
        let store = MemoryStore::new();
        let keys = KeyGenerator::new("qc", HashAlgorithm::Sha256);
        store.set("qc:metrics:hits", b"many", None).await.unwrap();
        assert!(matches!(collect_stats(&store, &keys).await, Err(Error::Decode(_))));
    }
}
