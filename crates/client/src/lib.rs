//! Store drivers for querycache.
//!
//! This crate provides the Redis implementation of the cache store contract,
//! shared by the server and CLI.

pub mod store;

pub use store::{RedisStore, parse_info};
