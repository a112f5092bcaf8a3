//! Configuration validation rules.
//!
//! This module provides validation logic for `CacheConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::CacheConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

const GLOB_METACHARACTERS: &[char] = &['*', '?', '[', ']', '\\'];

impl CacheConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `prefix` is empty or contains glob metacharacters
    /// - any TTL is negative
    /// - `scan_batch_size` is 0 or exceeds 10000
    /// - `timeout_ms` is less than 10ms or exceeds 60 seconds
    /// - `pool_size` is 0
    /// - `redis_url` has an unsupported scheme
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() {
            return Err(ConfigError::Missing {
                field: "prefix".into(),
                hint: "Set QUERYCACHE_PREFIX environment variable".into(),
            });
        }
        if self.prefix.contains(GLOB_METACHARACTERS) {
            return Err(ConfigError::Invalid {
                field: "prefix".into(),
                reason: "must not contain glob metacharacters".into(),
            });
        }

        if self.default_ttl_secs < 0 {
            return Err(ConfigError::Invalid { field: "default_ttl_secs".into(), reason: "must not be negative".into() });
        }
        if let Some((table, _)) = self.table_ttls.iter().find(|(_, ttl)| **ttl < 0) {
            return Err(ConfigError::Invalid {
                field: format!("table_ttls.{table}"),
                reason: "must not be negative".into(),
            });
        }

        if self.scan_batch_size == 0 || self.scan_batch_size > 10_000 {
            return Err(ConfigError::Invalid {
                field: "scan_batch_size".into(),
                reason: "must be between 1 and 10000".into(),
            });
        }

        if self.timeout_ms < 10 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 10ms".into() });
        }
        if self.timeout_ms > 60_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 1 minute (60000ms)".into(),
            });
        }

        if self.pool_size == 0 {
            return Err(ConfigError::Invalid { field: "pool_size".into(), reason: "must be greater than 0".into() });
        }

        if !["redis://", "rediss://", "unix://"]
            .iter()
            .any(|scheme| self.redis_url.starts_with(scheme))
        {
            return Err(ConfigError::Invalid {
                field: "redis_url".into(),
                reason: "must use redis://, rediss:// or unix://".into(),
            });
        }

        if !self.enabled {
            tracing::warn!("Query caching is disabled; every read goes to the data source");
        }

        Ok(())
    }
}
