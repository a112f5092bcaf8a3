//! Key-value backend contract.
//!
//! The cache core only talks to its backing store through [`CacheStore`].
//! Drivers implement it; [`super::memory::MemoryStore`] is the in-process
//! reference implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::Error;

/// Server-side scripts the core relies on for atomicity.
///
/// Drivers with a scripting facility run [`AtomicScript::lua`]; others must
/// apply the documented effect as one indivisible step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicScript {
    /// `KEYS[1]` is the query key, `KEYS[2..]` its index sets, `ARGV[1]` the
    /// payload the caller last read at `KEYS[1]` (empty when it read nothing).
    ///
    /// When the stored value still equals `ARGV[1]`, deletes the query key and
    /// removes it from every index set, returning the number of query keys
    /// deleted (0 or 1). Otherwise touches nothing and returns
    /// [`PAYLOAD_CHANGED`].
    DeleteWithIndexes,
}

/// Reply of [`AtomicScript::DeleteWithIndexes`] when the entry was rewritten
/// since the caller read it.
pub const PAYLOAD_CHANGED: i64 = -1;

const DELETE_WITH_INDEXES_LUA: &str = r"
local current = redis.call('GET', KEYS[1])
if (current or '') ~= ARGV[1] then
    return -1
end
local removed = redis.call('DEL', KEYS[1])
for i = 2, #KEYS do
    redis.call('SREM', KEYS[i], KEYS[1])
end
return removed
";

impl AtomicScript {
    pub fn lua(self) -> &'static str {
        match self {
            AtomicScript::DeleteWithIndexes => DELETE_WITH_INDEXES_LUA,
        }
    }
}

/// One operation inside a pipelined batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Set { key: String, value: Vec<u8>, ttl: Option<Duration> },
    SetAdd { key: String, members: Vec<String> },
    Delete { keys: Vec<String> },
}

/// Reply to a single pipelined operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreReply {
    Ok,
    Integer(i64),
}

/// One page of a cursor-based scan. A `cursor` of 0 means the scan is complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// Abstraction over the key-value backend.
///
/// Every call is a bounded, fallible network round trip. Implementations must
/// enforce their own command timeout and must not hold a connection across
/// calls.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;

    /// Store `value`; `ttl` of `None` stores without expiry.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), Error>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, Error>;

    async fn set_add(&self, set_key: &str, members: &[String]) -> Result<u64, Error>;

    async fn set_members(&self, set_key: &str) -> Result<Vec<String>, Error>;

    async fn set_remove(&self, set_key: &str, members: &[String]) -> Result<u64, Error>;

    async fn increment(&self, key: &str) -> Result<i64, Error>;

    /// One non-blocking scan step. Start with cursor 0; a restart from 0 is
    /// the only way to resume.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, Error>;

    /// Run `script` as one indivisible step. `args` are binary-safe.
    async fn run_atomic_script(&self, script: AtomicScript, keys: &[String], args: &[Vec<u8>]) -> Result<i64, Error>;

    async fn info(&self, section: &str) -> Result<HashMap<String, String>, Error>;

    /// Send a batch in one round trip. Not atomic.
    async fn pipeline(&self, ops: Vec<StoreOp>) -> Result<Vec<StoreReply>, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_script_touches_every_index() {
        let lua = AtomicScript::DeleteWithIndexes.lua();
        assert!(lua.contains("redis.call('DEL', KEYS[1])"));
        assert!(lua.contains("for i = 2, #KEYS do"));
        assert!(lua.contains("redis.call('SREM', KEYS[i], KEYS[1])"));
    }

    #[test]
    fn test_delete_script_compares_before_deleting() {
        let lua = AtomicScript::DeleteWithIndexes.lua();
        let compare = lua.find("~= ARGV[1]").unwrap();
        let delete = lua.find("'DEL'").unwrap();
        assert!(compare < delete);
        assert!(lua.contains(&format!("return {PAYLOAD_CHANGED}")));
    }
}
