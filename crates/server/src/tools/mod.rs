//! MCP tool implementations.
//!
//! This module contains all tools exposed by the querycache server.

pub mod cache;

pub use cache::{CacheInvalidateParams, CacheStatsParams};
