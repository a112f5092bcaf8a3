//! Core types and shared functionality for querycache.
//!
//! This crate provides:
//! - Query key generation and the cache payload format
//! - The key-value store contract and an in-memory implementation
//! - Read-through caching and index-based invalidation
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{
    CacheManager, CacheStore, InvalidationManager, InvalidationReport, KeyGenerator, MemoryStore, PrimaryKey,
    QueryDescriptor, QueryOptions, ResultSet, Row,
};
pub use config::{CacheConfig, ConfigError, FailureMode};
pub use error::Error;
