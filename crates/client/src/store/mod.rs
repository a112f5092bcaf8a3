//! Redis-backed cache store.
//!
//! Every call checks a connection out of a deadpool pool, sends one command
//! (or one pipeline/script) and hands the connection back. Each round trip is
//! bounded by the configured command timeout.

pub mod error;

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use querycache_core::cache::{AtomicScript, CacheStore, ScanPage, StoreOp, StoreReply};
use querycache_core::{CacheConfig, Error};
use redis::RedisResult;

/// Cache store over a pooled Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("status", &self.pool.status()).field("timeout", &self.timeout).finish()
    }
}

impl RedisStore {
    /// Build the pool from `redis_url`, `pool_size` and `timeout_ms`.
    ///
    /// No connection is opened until the first command.
    pub fn connect(config: &CacheConfig) -> Result<Self, Error> {
        let mut cfg = Config::from_url(config.redis_url.clone());
        cfg.pool = Some(PoolConfig::new(config.pool_size));
        let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(error::from_create)?;

        tracing::debug!(url = %config.redis_url, pool_size = config.pool_size, "Redis pool created");
        Ok(Self { pool, timeout: config.timeout() })
    }

    /// Round-trip a PING, for startup health checks.
    pub async fn ping(&self) -> Result<(), Error> {
        let mut conn = self.conn().await?;
        let reply: String = self.bounded("PING", redis::cmd("PING").query_async(&mut conn)).await?;
        tracing::debug!(reply, "Redis reachable");
        Ok(())
    }

    async fn conn(&self) -> Result<Connection, Error> {
        match tokio::time::timeout(self.timeout, self.pool.get()).await {
            Ok(result) => result.map_err(error::from_pool),
            Err(_) => Err(error::timed_out("connection checkout", self.timeout.as_millis())),
        }
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, Error>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(error::from_redis),
            Err(_) => {
                tracing::warn!(op, timeout_ms = self.timeout.as_millis() as u64, "Redis command timed out");
                Err(error::timed_out(op, self.timeout.as_millis()))
            }
        }
    }
}

/// Append SET with an optional whole-second expiry.
fn set_command(pipe: &mut redis::Pipeline, key: &str, value: &[u8], ttl: Option<Duration>) {
    match ttl {
        Some(ttl) => pipe.cmd("SET").arg(key).arg(value).arg("EX").arg(ttl.as_secs().max(1)),
        None => pipe.cmd("SET").arg(key).arg(value),
    };
}

/// Parse an INFO reply: `# Section` headers and blank lines are skipped,
/// every other line is `field:value`.
pub fn parse_info(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(field, value)| (field.to_string(), value.to_string()))
        .collect()
}

fn reply_of(value: redis::Value) -> StoreReply {
    match value {
        redis::Value::Int(n) => StoreReply::Integer(n),
        _ => StoreReply::Ok,
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let mut conn = self.conn().await?;
        self.bounded("GET", redis::cmd("GET").arg(key).query_async(&mut conn)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), Error> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        self.bounded("SET", cmd.query_async(&mut conn)).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, Error> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        self.bounded("DEL", redis::cmd("DEL").arg(keys).query_async(&mut conn)).await
    }

    async fn set_add(&self, set_key: &str, members: &[String]) -> Result<u64, Error> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        self.bounded("SADD", redis::cmd("SADD").arg(set_key).arg(members).query_async(&mut conn)).await
    }

    async fn set_members(&self, set_key: &str) -> Result<Vec<String>, Error> {
        let mut conn = self.conn().await?;
        self.bounded("SMEMBERS", redis::cmd("SMEMBERS").arg(set_key).query_async(&mut conn)).await
    }

    async fn set_remove(&self, set_key: &str, members: &[String]) -> Result<u64, Error> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        self.bounded("SREM", redis::cmd("SREM").arg(set_key).arg(members).query_async(&mut conn)).await
    }

    async fn increment(&self, key: &str) -> Result<i64, Error> {
        let mut conn = self.conn().await?;
        self.bounded("INCR", redis::cmd("INCR").arg(key).query_async(&mut conn)).await
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, Error> {
        let mut conn = self.conn().await?;
        let (cursor, keys): (u64, Vec<String>) = self
            .bounded(
                "SCAN",
                redis::cmd("SCAN").arg(cursor).arg("MATCH").arg(pattern).arg("COUNT").arg(count).query_async(&mut conn),
            )
            .await?;
        Ok(ScanPage { cursor, keys })
    }

    async fn run_atomic_script(&self, script: AtomicScript, keys: &[String], args: &[Vec<u8>]) -> Result<i64, Error> {
        let mut conn = self.conn().await?;
        let script = redis::Script::new(script.lua());
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for arg in args {
            invocation.arg(arg.as_slice());
        }
        self.bounded("EVALSHA", invocation.invoke_async(&mut conn)).await
    }

    async fn info(&self, section: &str) -> Result<HashMap<String, String>, Error> {
        let mut conn = self.conn().await?;
        let raw: String = self.bounded("INFO", redis::cmd("INFO").arg(section).query_async(&mut conn)).await?;
        Ok(parse_info(&raw))
    }

    async fn pipeline(&self, ops: Vec<StoreOp>) -> Result<Vec<StoreReply>, Error> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for op in &ops {
            match op {
                StoreOp::Set { key, value, ttl } => set_command(&mut pipe, key, value, *ttl),
                StoreOp::SetAdd { key, members } => {
                    pipe.cmd("SADD").arg(key).arg(members);
                }
                StoreOp::Delete { keys } => {
                    pipe.cmd("DEL").arg(keys);
                }
            }
        }

        let mut conn = self.conn().await?;
        let replies: Vec<redis::Value> = self.bounded("PIPELINE", pipe.query_async(&mut conn)).await?;
        Ok(replies.into_iter().map(reply_of).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO_MEMORY: &str = "# Memory\r\nused_memory:1048576\r\nused_memory_human:1.00M\r\n\r\n";

    #[test]
    fn test_parse_info_sections() {
        let info = parse_info(INFO_MEMORY);
        assert_eq!(info.get("used_memory").map(String::as_str), Some("1048576"));
        assert_eq!(info.get("used_memory_human").map(String::as_str), Some("1.00M"));
        assert_eq!(info.len(), 2);
    }

    #[test]
    fn test_parse_info_keeps_colons_in_values() {
        let info = parse_info("# Keyspace\ndb0:keys=3,expires=1,avg_ttl=0\n");
        assert_eq!(info.get("db0").map(String::as_str), Some("keys=3,expires=1,avg_ttl=0"));
    }

    #[test]
    fn test_pipeline_replies() {
        assert_eq!(reply_of(redis::Value::Int(2)), StoreReply::Integer(2));
        assert_eq!(reply_of(redis::Value::Okay), StoreReply::Ok);
    }

    #[test]
    fn test_connect_rejects_bad_url() {
        let config = CacheConfig { redis_url: "not a url".to_string(), ..Default::default() };
        assert!(matches!(RedisStore::connect(&config), Err(Error::Connection(_))));
    }

    fn live_config() -> Option<CacheConfig> {
        let url = std::env::var("QUERYCACHE_TEST_REDIS_URL").ok()?;
        Some(CacheConfig { redis_url: url, prefix: "qc_test".to_string(), ..Default::default() })
    }

    #[tokio::test]
    #[ignore = "needs QUERYCACHE_TEST_REDIS_URL"]
    async fn test_live_round_trip() {
        let Some(config) = live_config() else { return };
        let store = RedisStore::connect(&config).unwrap();
        store.ping().await.unwrap();

        let key = "qc_test:query:live".to_string();
        store.set(&key, b"{\"x\":1}", Some(Duration::from_secs(30))).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some(&b"{\"x\":1}"[..]));

        store.set_add("qc_test:index:table:t", &[key.clone()]).await.unwrap();
        let removed = store
            .run_atomic_script(
                AtomicScript::DeleteWithIndexes,
                &[key.clone(), "qc_test:index:table:t".to_string()],
                &[b"{\"x\":1}".to_vec()],
            )
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(&key).await.unwrap().is_none());
        assert!(store.set_members("qc_test:index:table:t").await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "needs QUERYCACHE_TEST_REDIS_URL"]
    async fn test_live_scan_and_pipeline() {
        let Some(config) = live_config() else { return };
        let store = RedisStore::connect(&config).unwrap();

        let ops = (0..5)
            .map(|i| StoreOp::Set { key: format!("qc_test:scan:{i}"), value: b"1".to_vec(), ttl: None })
            .collect();
        assert_eq!(store.pipeline(ops).await.unwrap().len(), 5);

        let mut cursor = 0;
        let mut found = Vec::new();
        loop {
            let page = store.scan(cursor, "qc_test:scan:*", 2).await.unwrap();
            found.extend(page.keys);
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        found.sort();
        found.dedup();
        assert_eq!(found.len(), 5);
        assert_eq!(store.delete(&found).await.unwrap(), 5);
    }
}
