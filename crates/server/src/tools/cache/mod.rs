//! Cache administration MCP tools.
//!
//! Stats, flush and targeted invalidation against the configured store.

pub mod flush;
pub mod invalidate;
pub mod stats;

pub use flush::flush_impl;
pub use invalidate::{CacheInvalidateParams, invalidate_impl};
pub use stats::{CacheStatsParams, stats_impl};
