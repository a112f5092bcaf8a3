//! Read-through caching of query result sets.

use std::future::Future;
use std::sync::Arc;

use super::descriptor::{PrimaryKey, QueryDescriptor, ResultSet, Row, collect_primary_keys};
use super::entry::{CacheEntry, PayloadCodec};
use super::keys::{KeyGenerator, validate_table};
use super::stats::{HITS, MISSES};
use super::store::{CacheStore, StoreOp};
use super::ttl::{QueryOptions, expiry, resolve_ttl};
use crate::Error;
use crate::config::CacheConfig;

/// Read-through cache in front of a caller-supplied query executor.
///
/// Holds no per-query state; every call goes to the shared store.
pub struct CacheManager<S: CacheStore> {
    store: Arc<S>,
    keys: KeyGenerator,
    codec: PayloadCodec,
    config: Arc<CacheConfig>,
}

impl<S: CacheStore> Clone for CacheManager<S> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store), keys: self.keys.clone(), codec: self.codec, config: Arc::clone(&self.config) }
    }
}

impl<S: CacheStore> CacheManager<S> {
    pub fn new(store: Arc<S>, config: Arc<CacheConfig>) -> Self {
        let keys = KeyGenerator::new(config.prefix.clone(), config.hash_algorithm);
        let codec = PayloadCodec::new(config.compress_threshold);
        Self { store, keys, codec, config }
    }

    pub fn keys(&self) -> &KeyGenerator {
        &self.keys
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Return the cached result of `descriptor`, or run `execute` and cache it.
    ///
    /// Rows are registered under `table`'s index and, for every distinct key
    /// `primary_key` extracts, under that row's index. Empty results are never
    /// stored. Store failures fall back to `execute` unless the failure mode
    /// is strict, in which case they are returned as `E`. A `table` containing
    /// `:` is rejected with [`Error::InvalidInput`] before anything runs.
    pub async fn fetch_or_compute<X, F, Fut, E>(
        &self, descriptor: &QueryDescriptor, table: &str, primary_key: X, options: QueryOptions, execute: F,
    ) -> Result<ResultSet, E>
    where
        X: Fn(&Row) -> Option<PrimaryKey>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ResultSet, E>>,
        E: From<Error>,
    {
        if !self.config.enabled || options.skip_cache {
            return execute().await;
        }
        validate_table(table)?;

        let key = self.keys.query_key(descriptor);

        match self.store.get(&key).await {
            Ok(Some(bytes)) => match self.codec.decode(&bytes) {
                Ok(entry) => {
                    self.record(HITS).await;
                    tracing::debug!(key = %key, table = %table, rows = entry.data.len(), "Cache hit");
                    return Ok(entry.data);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Undecodable cache entry; recomputing");
                }
            },
            Ok(None) => {}
            Err(e) => {
                self.absorb(e, "get", &key)?;
                return execute().await;
            }
        }

        self.record(MISSES).await;
        tracing::debug!(key = %key, table = %table, "Cache miss");

        let rows = execute().await?;
        if rows.is_empty() {
            return Ok(rows);
        }

        if let Err(e) = self.store_result(&key, descriptor, table, &primary_key, options, &rows).await {
            self.absorb(e, "store", &key)?;
        }

        Ok(rows)
    }

    /// Write the entry and its index registrations in one pipelined batch.
    ///
    /// The batch is not atomic; a partial write leaves at worst an index
    /// member pointing at a missing entry, which invalidation tolerates.
    async fn store_result<X>(
        &self, key: &str, descriptor: &QueryDescriptor, table: &str, primary_key: &X, options: QueryOptions,
        rows: &[Row],
    ) -> Result<(), Error>
    where
        X: Fn(&Row) -> Option<PrimaryKey>,
    {
        let pks = collect_primary_keys(rows, primary_key);
        let relations = descriptor.relations().map(str::to_string).collect();
        let index_keys = self.keys.entry_index_keys(table, &pks);
        let entry = CacheEntry::new(table, pks, relations, rows.to_vec());
        let payload = self.codec.encode(&entry)?;

        let ttl = resolve_ttl(options.ttl_secs, self.config.table_ttl(table), self.config.default_ttl_secs);

        let mut ops = Vec::with_capacity(index_keys.len() + 1);
        ops.push(StoreOp::Set { key: key.to_string(), value: payload, ttl: expiry(ttl) });
        ops.extend(
            index_keys
                .into_iter()
                .map(|index_key| StoreOp::SetAdd { key: index_key, members: vec![key.to_string()] }),
        );

        self.store.pipeline(ops).await?;
        tracing::debug!(key = %key, table = %table, rows = rows.len(), pks = entry.pks.len(), ttl, "Cached query result");
        Ok(())
    }

    /// Bump a metrics counter. Failures are logged and dropped.
    async fn record(&self, name: &str) {
        if !self.config.metrics_enabled {
            return;
        }
        if let Err(e) = self.store.increment(&self.keys.metrics_key(name)).await {
            tracing::debug!(counter = name, error = %e, "Failed to record cache metric");
        }
    }

    fn absorb(&self, err: Error, op: &'static str, key: &str) -> Result<(), Error> {
        super::absorb(self.config.failure_mode, err, op, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::descriptor::column;
    use crate::cache::entry::COMPRESSED_MARKER;
    use crate::cache::memory::MemoryStore;
    use crate::config::FailureMode;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn rows(ids: &[i64]) -> ResultSet {
        ids.iter()
            .map(|id| json!({"id": id, "title": format!("post {id}")}).as_object().cloned().unwrap())
            .collect()
    }

    fn manager(config: CacheConfig) -> (Arc<MemoryStore>, CacheManager<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let manager = CacheManager::new(Arc::clone(&store), Arc::new(config));
        (store, manager)
    }

    fn posts_query() -> QueryDescriptor {
        QueryDescriptor::new("SELECT * FROM posts")
    }

    async fn fetch(
        manager: &CacheManager<MemoryStore>, descriptor: &QueryDescriptor, options: QueryOptions, result: ResultSet,
        calls: &AtomicUsize,
    ) -> Result<ResultSet, Error> {
        manager
            .fetch_or_compute(descriptor, "posts", column("id"), options, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, Error>(result) }
            })
            .await
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let (store, manager) = manager(CacheConfig::default());
        let calls = AtomicUsize::new(0);
        let query = posts_query();

        let first = fetch(&manager, &query, QueryOptions::default(), rows(&[1, 2]), &calls).await.unwrap();
        let second = fetch(&manager, &query, QueryOptions::default(), rows(&[9]), &calls).await.unwrap();

        assert_eq!(first, rows(&[1, 2]));
        assert_eq!(second, rows(&[1, 2]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let key = manager.keys().query_key(&query);
        assert!(store.contains(&key).await);
        for index in ["qc:index:table:posts", "qc:rowindex:table:posts:pk:1", "qc:rowindex:table:posts:pk:2"] {
            assert_eq!(store.set_members(index).await.unwrap(), vec![key.clone()]);
        }
        assert_eq!(store.get("qc:metrics:hits").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get("qc:metrics:misses").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_counters_feed_stats() {
        let (store, manager) = manager(CacheConfig::default());
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            fetch(&manager, &posts_query(), QueryOptions::default(), rows(&[1]), &calls).await.unwrap();
        }

        let stats = crate::cache::collect_stats(store.as_ref(), manager.keys()).await.unwrap();
        assert_eq!((stats.hits, stats.misses), (2, 1));
    }

    #[tokio::test]
    async fn test_empty_result_not_stored() {
        let config = CacheConfig { metrics_enabled: false, ..Default::default() };
        let (store, manager) = manager(config);
        let calls = AtomicUsize::new(0);

        let result = fetch(&manager, &posts_query(), QueryOptions::default(), Vec::new(), &calls).await.unwrap();
        assert!(result.is_empty());
        assert!(store.keys().await.is_empty());

        fetch(&manager, &posts_query(), QueryOptions::default(), Vec::new(), &calls).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_skip_cache_never_touches_store() {
        let config = CacheConfig { failure_mode: FailureMode::Strict, ..Default::default() };
        let (store, manager) = manager(config);
        store.set_offline(true);
        let calls = AtomicUsize::new(0);

        let result = fetch(&manager, &posts_query(), QueryOptions::no_cache(), rows(&[1]), &calls).await.unwrap();
        assert_eq!(result, rows(&[1]));
        store.set_offline(false);
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_cache_bypasses_store() {
        let config = CacheConfig { enabled: false, ..Default::default() };
        let (store, manager) = manager(config);
        let calls = AtomicUsize::new(0);

        fetch(&manager, &posts_query(), QueryOptions::default(), rows(&[1]), &calls).await.unwrap();
        fetch(&manager, &posts_query(), QueryOptions::default(), rows(&[1]), &calls).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_lenient_outage_falls_back() {
        let (store, manager) = manager(CacheConfig::default());
        store.set_offline(true);
        let calls = AtomicUsize::new(0);

        let result = fetch(&manager, &posts_query(), QueryOptions::default(), rows(&[4]), &calls).await.unwrap();
        assert_eq!(result, rows(&[4]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_strict_outage_surfaces() {
        let config = CacheConfig { failure_mode: FailureMode::Strict, ..Default::default() };
        let (store, manager) = manager(config);
        store.set_offline(true);
        let calls = AtomicUsize::new(0);

        let result = fetch(&manager, &posts_query(), QueryOptions::default(), rows(&[4]), &calls).await;
        assert!(matches!(result, Err(Error::Connection(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ttl_priority() {
        let mut config = CacheConfig { default_ttl_secs: 7200, ..Default::default() };
        config.table_ttls.insert("posts".into(), 3600);
        let (store, manager) = manager(config);
        let calls = AtomicUsize::new(0);

        let a = QueryDescriptor::new("SELECT * FROM posts WHERE id = ?").bind(1);
        fetch(&manager, &a, QueryOptions::ttl(60), rows(&[1]), &calls).await.unwrap();
        let ttl = store.ttl(&manager.keys().query_key(&a)).await.unwrap();
        assert!(ttl <= Duration::from_secs(60) && ttl > Duration::from_secs(50));

        let b = QueryDescriptor::new("SELECT * FROM posts WHERE id = ?").bind(2);
        fetch(&manager, &b, QueryOptions::default(), rows(&[2]), &calls).await.unwrap();
        let ttl = store.ttl(&manager.keys().query_key(&b)).await.unwrap();
        assert!(ttl <= Duration::from_secs(3600) && ttl > Duration::from_secs(3500));
    }

    #[tokio::test]
    async fn test_zero_ttl_never_expires() {
        let (store, manager) = manager(CacheConfig::default());
        let calls = AtomicUsize::new(0);

        fetch(&manager, &posts_query(), QueryOptions::ttl(0), rows(&[1]), &calls).await.unwrap();
        let key = manager.keys().query_key(&posts_query());
        assert!(store.contains(&key).await);
        assert!(store.ttl(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_compressed_round_trip() {
        let config = CacheConfig { compress_threshold: 64, ..Default::default() };
        let (store, manager) = manager(config);
        let calls = AtomicUsize::new(0);
        let stored = rows(&[1, 2, 3, 4, 5]);

        fetch(&manager, &posts_query(), QueryOptions::default(), stored.clone(), &calls).await.unwrap();
        let raw = store.get(&manager.keys().query_key(&posts_query())).await.unwrap().unwrap();
        assert!(raw.starts_with(COMPRESSED_MARKER));

        let hit = fetch(&manager, &posts_query(), QueryOptions::default(), Vec::new(), &calls).await.unwrap();
        assert_eq!(hit, stored);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_recomputed() {
        let (store, manager) = manager(CacheConfig::default());
        let key = manager.keys().query_key(&posts_query());
        store.set(&key, b"X::garbage", None).await.unwrap();
        let calls = AtomicUsize::new(0);

        let result = fetch(&manager, &posts_query(), QueryOptions::default(), rows(&[3]), &calls).await.unwrap();
        assert_eq!(result, rows(&[3]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.get(&key).await.unwrap().unwrap().starts_with(b"{"));
    }

    #[tokio::test]
    async fn test_rows_without_keys_register_table_only() {
        let (store, manager) = manager(CacheConfig::default());
        let query = QueryDescriptor::new("SELECT level, message FROM logs");
        let log_rows: ResultSet = vec![json!({"level": "info", "message": "hi"}).as_object().cloned().unwrap()];

        manager
            .fetch_or_compute(&query, "logs", column("id"), QueryOptions::default(), || async {
                Ok::<_, Error>(log_rows.clone())
            })
            .await
            .unwrap();

        let keys = store.keys().await;
        assert!(keys.contains(&"qc:index:table:logs".to_string()));
        assert!(!keys.iter().any(|k| k.contains(":rowindex:")));
    }

    #[tokio::test]
    async fn test_colon_table_rejected_before_executing() {
        let (store, manager) = manager(CacheConfig::default());
        let calls = AtomicUsize::new(0);
        let result = manager
            .fetch_or_compute(&posts_query(), "a:pk:b", column("id"), QueryOptions::default(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, Error>(rows(&[1])) }
            })
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_executor_error_propagates() {
        let (store, manager) = manager(CacheConfig::default());
        let result = manager
            .fetch_or_compute(&posts_query(), "posts", column("id"), QueryOptions::default(), || async {
                Err::<ResultSet, _>(Error::QueryFailed("no such table".into()))
            })
            .await;
        assert!(matches!(result, Err(Error::QueryFailed(_))));
        assert!(!store.contains(&manager.keys().query_key(&posts_query())).await);
    }

    #[tokio::test]
    async fn test_relations_stored_sorted() {
        let (store, manager) = manager(CacheConfig::default());
        let calls = AtomicUsize::new(0);
        let query = posts_query().with_relations(["tags", "author"]);

        fetch(&manager, &query, QueryOptions::default(), rows(&[1]), &calls).await.unwrap();
        let raw = store.get(&manager.keys().query_key(&query)).await.unwrap().unwrap();
        let entry = PayloadCodec::new(0).decode(&raw).unwrap();
        assert_eq!(entry.relations, vec!["author", "tags"]);
        assert_eq!(entry.pks, vec![PrimaryKey::Int(1)]);
    }
}
