//! TTL resolution.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-call options. Immutable; built by the caller for each read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Bypass the cache entirely for this call.
    pub skip_cache: bool,
    /// TTL override in seconds for this call.
    pub ttl_secs: Option<i64>,
}

impl QueryOptions {
    pub fn no_cache() -> Self {
        Self { skip_cache: true, ttl_secs: None }
    }

    pub fn ttl(secs: i64) -> Self {
        Self { skip_cache: false, ttl_secs: Some(secs) }
    }
}

/// Effective TTL in seconds: per-call override, then per-table default, then
/// the global default. Negative values clamp to zero.
pub fn resolve_ttl(call_override: Option<i64>, table_default: Option<i64>, global_default: i64) -> u64 {
    let ttl = call_override.or(table_default).unwrap_or(global_default);
    ttl.max(0) as u64
}

/// Expiry to hand to the store. Zero means the entry never expires.
pub fn expiry(ttl_secs: u64) -> Option<Duration> {
    (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs))
}
