//! Cache configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (QUERYCACHE_*)
//! 2. TOML config file (if QUERYCACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::cache::keys::HashAlgorithm;

mod validation;

pub use validation::ConfigError;

/// How store-facing failures propagate to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Log and carry on as if no cache were available.
    #[default]
    Lenient,
    /// Surface connection and command errors to the caller.
    Strict,
}

/// Cache configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (QUERYCACHE_*)
/// 2. TOML config file (if QUERYCACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Global caching switch. When false every read goes straight to the executor.
    ///
    /// Set via QUERYCACHE_ENABLED environment variable.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Namespace prefix for every key this cache writes.
    ///
    /// Set via QUERYCACHE_PREFIX environment variable.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Digest used for query keys.
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,

    /// System-wide TTL in seconds. Zero stores entries without expiry.
    ///
    /// Set via QUERYCACHE_DEFAULT_TTL_SECS environment variable.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: i64,

    /// Per-table TTL defaults in seconds, keyed by table name.
    #[serde(default)]
    pub table_ttls: HashMap<String, i64>,

    /// Serialized payloads at or above this many bytes are compressed. Zero disables.
    ///
    /// Set via QUERYCACHE_COMPRESS_THRESHOLD environment variable.
    #[serde(default)]
    pub compress_threshold: usize,

    /// Failure propagation policy.
    ///
    /// Set via QUERYCACHE_FAILURE_MODE environment variable (`lenient` or `strict`).
    #[serde(default)]
    pub failure_mode: FailureMode,

    /// Whether hit/miss counters are maintained.
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Keys per batched delete during pattern invalidation.
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,

    /// Address of the backing store.
    ///
    /// Set via QUERYCACHE_REDIS_URL environment variable.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Maximum pooled store connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Per-command store timeout in milliseconds.
    ///
    /// Set via QUERYCACHE_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_prefix() -> String {
    "qc".into()
}

fn default_ttl_secs() -> i64 {
    3600
}

fn default_scan_batch_size() -> usize {
    500
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".into()
}

fn default_pool_size() -> usize {
    16
}

fn default_timeout_ms() -> u64 {
    2_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: default_prefix(),
            hash_algorithm: HashAlgorithm::default(),
            default_ttl_secs: default_ttl_secs(),
            table_ttls: HashMap::new(),
            compress_threshold: 0,
            failure_mode: FailureMode::Lenient,
            metrics_enabled: true,
            scan_batch_size: default_scan_batch_size(),
            redis_url: default_redis_url(),
            pool_size: default_pool_size(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl CacheConfig {
    /// Store command timeout as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn is_strict(&self) -> bool {
        self.failure_mode == FailureMode::Strict
    }

    /// Per-table TTL default, if one was configured.
    pub fn table_ttl(&self, table: &str) -> Option<i64> {
        self.table_ttls.get(table).copied()
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `QUERYCACHE_`
    /// 2. TOML file from `QUERYCACHE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var_os("QUERYCACHE_CONFIG_FILE").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load with an explicit TOML file in place of `QUERYCACHE_CONFIG_FILE`.
    ///
    /// Environment variables still override the file.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_path) = config_path {
            figment = figment.merge(Toml::file(config_path));
        }

        figment = figment.merge(
            Env::prefixed("QUERYCACHE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
