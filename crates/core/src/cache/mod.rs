//! Query result cache with index-based invalidation.
//!
//! This module provides a read-through cache for query result sets on top of
//! a remote key-value store. It supports:
//!
//! - Deterministic query keys derived from statement, parameters and relations
//! - Table and row index sets mapping writes to the queries they affect
//! - Atomic delete of an entry together with its index references
//! - Cursor-based pattern scans for bulk cleanup
//! - Optional payload compression above a size threshold

pub mod descriptor;
pub mod entry;
pub mod hooks;
pub mod invalidation;
pub mod keys;
pub mod manager;
pub mod memory;
pub mod stats;
pub mod store;
pub mod ttl;

pub use crate::Error;

pub use descriptor::{PrimaryKey, QueryDescriptor, ResultSet, Row, column};
pub use entry::{CacheEntry, PayloadCodec};
pub use hooks::{AssociationSnapshot, Cascade, CascadeRegistry, EntityObserver};
pub use invalidation::{InvalidationManager, InvalidationReport};
pub use keys::{HashAlgorithm, KeyGenerator, KeyKind, ParsedKey, validate_table};
pub use manager::CacheManager;
pub use memory::MemoryStore;
pub use stats::{CacheStats, HITS, MISSES, collect_stats, reset_stats};
pub use store::{AtomicScript, CacheStore, PAYLOAD_CHANGED, ScanPage, StoreOp, StoreReply};
pub use ttl::{QueryOptions, resolve_ttl};

use crate::config::FailureMode;

/// Apply the failure mode to a store error.
///
/// Strict mode surfaces connection and command errors; everything else is
/// logged and swallowed so the caller can carry on without the cache.
pub(crate) fn absorb(mode: FailureMode, err: Error, op: &'static str, key: &str) -> Result<(), Error> {
    if mode == FailureMode::Strict && err.is_store_failure() {
        return Err(err);
    }
    tracing::warn!(op, key, error = %err, "Cache store call failed; continuing without cache");
    Ok(())
}
