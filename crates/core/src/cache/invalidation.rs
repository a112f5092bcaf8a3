//! Surgical invalidation through table and row index sets.
//!
//! Every removal of a query entry goes through the `DeleteWithIndexes`
//! script, so an entry and its index memberships disappear together. The
//! index sets an entry belongs to are rebuilt from the entry's own payload
//! with the same derivation the write path used.
//!
//! The script only deletes the payload it was built from. A concurrent write
//! that replaces the entry in between makes it back off, and the delete is
//! retried against the new payload.

use std::ops::AddAssign;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::descriptor::PrimaryKey;
use super::entry::PayloadCodec;
use super::hooks::{AssociationSnapshot, Cascade, CascadeRegistry, EntityObserver};
use super::keys::{KeyGenerator, validate_table};
use super::store::{AtomicScript, CacheStore, PAYLOAD_CHANGED};
use crate::Error;
use crate::config::CacheConfig;

/// Attempts at deleting one entry while concurrent writers keep replacing it.
const MAX_DELETE_ATTEMPTS: usize = 3;

/// What an invalidation call removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InvalidationReport {
    /// Query entries deleted.
    pub entries_removed: u64,
    /// Whole index sets deleted.
    pub index_sets_removed: u64,
    /// Entries whose payload was missing or corrupt, deleted without index rebuild.
    pub degraded: u64,
    /// Entries left in place because a store call failed and was absorbed.
    /// Their index memberships are kept so a later invalidation finds them.
    pub skipped: u64,
}

impl AddAssign for InvalidationReport {
    fn add_assign(&mut self, other: Self) {
        self.entries_removed += other.entries_removed;
        self.index_sets_removed += other.index_sets_removed;
        self.degraded += other.degraded;
        self.skipped += other.skipped;
    }
}

/// Removes cached queries affected by writes to tables and rows.
pub struct InvalidationManager<S: CacheStore> {
    store: Arc<S>,
    keys: KeyGenerator,
    codec: PayloadCodec,
    config: Arc<CacheConfig>,
    cascades: CascadeRegistry,
}

impl<S: CacheStore> InvalidationManager<S> {
    pub fn new(store: Arc<S>, config: Arc<CacheConfig>) -> Self {
        let keys = KeyGenerator::new(config.prefix.clone(), config.hash_algorithm);
        let codec = PayloadCodec::new(config.compress_threshold);
        Self { store, keys, codec, config, cascades: CascadeRegistry::default() }
    }

    /// Attach the cascades to follow on entity lifecycle events.
    pub fn with_cascades(mut self, cascades: CascadeRegistry) -> Self {
        self.cascades = cascades;
        self
    }

    pub fn keys(&self) -> &KeyGenerator {
        &self.keys
    }

    /// Remove every cached query registered under `table`, then every row
    /// index of `table`, then the table index itself.
    ///
    /// Index sets are kept when any entry could not be deleted.
    pub async fn invalidate_table(&self, table: &str) -> Result<InvalidationReport, Error> {
        validate_table(table)?;
        let table_key = self.keys.table_index_key(table);
        let mut report = InvalidationReport::default();

        let members = match self.store.set_members(&table_key).await {
            Ok(members) => members,
            Err(e) => {
                self.absorb(e, "smembers", &table_key)?;
                return Ok(report);
            }
        };

        for query_key in &members {
            report += self.delete_entry(query_key, &table_key).await?;
        }

        if report.skipped > 0 {
            tracing::warn!(table = %table, skipped = report.skipped, "Keeping index sets of entries left in place");
        } else {
            report.index_sets_removed += self.scan_and_delete(&self.keys.row_index_pattern(table)).await?;
            report.index_sets_removed += self.delete_keys(std::slice::from_ref(&table_key)).await?;
        }

        tracing::info!(
            table = %table,
            entries = report.entries_removed,
            index_sets = report.index_sets_removed,
            degraded = report.degraded,
            skipped = report.skipped,
            "Invalidated table"
        );
        Ok(report)
    }

    /// Remove every cached query that contains the row `primary_key` of `table`.
    pub async fn invalidate_row(&self, table: &str, primary_key: &PrimaryKey) -> Result<InvalidationReport, Error> {
        validate_table(table)?;
        let row_key = self.keys.row_index_key(table, primary_key);
        let mut report = InvalidationReport::default();

        let members = match self.store.set_members(&row_key).await {
            Ok(members) => members,
            Err(e) => {
                self.absorb(e, "smembers", &row_key)?;
                return Ok(report);
            }
        };

        for query_key in &members {
            report += self.delete_entry(query_key, &row_key).await?;
        }

        if report.skipped > 0 {
            tracing::warn!(key = %row_key, skipped = report.skipped, "Keeping row index of entries left in place");
        } else {
            report.index_sets_removed += self.delete_keys(std::slice::from_ref(&row_key)).await?;
        }

        tracing::debug!(
            table = %table,
            pk = %primary_key,
            entries = report.entries_removed,
            skipped = report.skipped,
            "Invalidated row"
        );
        Ok(report)
    }

    /// Delete everything under the cache prefix. Returns the number of keys removed.
    pub async fn flush_all(&self) -> Result<u64, Error> {
        let deleted = self.scan_and_delete(&self.keys.namespace_pattern()).await?;
        tracing::info!(prefix = %self.keys.prefix(), deleted, "Flushed cache namespace");
        Ok(deleted)
    }

    /// Atomically delete `query_key` and remove it from every index set it
    /// belongs to.
    ///
    /// Index sets are rebuilt from the stored payload. When the payload is
    /// gone or unreadable, only `known_indexes` are cleaned. The delete only
    /// applies to the payload that was read; if the entry was rewritten in
    /// between, it is read again, up to `MAX_DELETE_ATTEMPTS` times. Index
    /// sets seen on earlier attempts stay in the cleanup.
    pub async fn atomic_delete(&self, query_key: &str, known_indexes: &[String]) -> Result<InvalidationReport, Error> {
        let mut report = InvalidationReport::default();
        let mut index_keys = known_indexes.to_vec();

        for attempt in 1..=MAX_DELETE_ATTEMPTS {
            let observed = match self.store.get(query_key).await {
                Ok(observed) => observed,
                Err(e) => {
                    self.absorb(e, "get", query_key)?;
                    report.skipped += 1;
                    return Ok(report);
                }
            };

            let (derived, degraded) = match &observed {
                Some(bytes) => match self.codec.decode_meta(bytes) {
                    Ok(meta) => (self.keys.entry_index_keys(&meta.table, &meta.pks), false),
                    Err(e) => {
                        tracing::warn!(key = %query_key, error = %e, "Corrupt cache entry; deleting without index rebuild");
                        (Vec::new(), true)
                    }
                },
                None => {
                    tracing::debug!(key = %query_key, "Cache entry already gone; cleaning known indexes");
                    (Vec::new(), true)
                }
            };

            for index_key in derived {
                if !index_keys.contains(&index_key) {
                    index_keys.push(index_key);
                }
            }

            let mut script_keys = Vec::with_capacity(index_keys.len() + 1);
            script_keys.push(query_key.to_string());
            script_keys.extend(index_keys.iter().cloned());

            let expected = observed.unwrap_or_default();
            match self.store.run_atomic_script(AtomicScript::DeleteWithIndexes, &script_keys, &[expected]).await {
                Ok(PAYLOAD_CHANGED) => {
                    tracing::debug!(key = %query_key, attempt, "Cache entry rewritten during delete; reading again");
                }
                Ok(removed) => {
                    report.entries_removed += removed.max(0) as u64;
                    if degraded {
                        report.degraded += 1;
                    }
                    return Ok(report);
                }
                Err(e) => {
                    self.absorb(e, "atomic_delete", query_key)?;
                    report.skipped += 1;
                    return Ok(report);
                }
            }
        }

        tracing::warn!(key = %query_key, attempts = MAX_DELETE_ATTEMPTS, "Cache entry kept changing; leaving it in place");
        report.skipped += 1;
        Ok(report)
    }

    async fn delete_entry(&self, query_key: &str, origin_index: &str) -> Result<InvalidationReport, Error> {
        self.atomic_delete(query_key, &[origin_index.to_string()]).await
    }

    /// Delete every key matching `pattern`.
    ///
    /// Walks the keyspace with a cursor and deletes in batches of
    /// `scan_batch_size`, so neither memory nor a single server call grows
    /// with the keyspace.
    pub async fn scan_and_delete(&self, pattern: &str) -> Result<u64, Error> {
        let batch = self.config.scan_batch_size.max(1);
        let mut pending: Vec<String> = Vec::with_capacity(batch);
        let mut deleted = 0;
        let mut cursor = 0;

        loop {
            let page = match self.store.scan(cursor, pattern, batch).await {
                Ok(page) => page,
                Err(e) => {
                    self.absorb(e, "scan", pattern)?;
                    break;
                }
            };

            pending.extend(page.keys);
            while pending.len() >= batch {
                let chunk: Vec<String> = pending.drain(..batch).collect();
                deleted += self.delete_keys(&chunk).await?;
            }

            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }

        if !pending.is_empty() {
            deleted += self.delete_keys(&pending).await?;
        }
        Ok(deleted)
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<u64, Error> {
        match self.store.delete(keys).await {
            Ok(count) => Ok(count),
            Err(e) => {
                self.absorb(e, "del", keys.first().map(String::as_str).unwrap_or_default())?;
                Ok(0)
            }
        }
    }

    async fn run_cascades(&self, table: &str, key: &PrimaryKey) -> Result<InvalidationReport, Error> {
        let mut report = InvalidationReport::default();
        for cascade in self.cascades.for_table(table) {
            match cascade {
                Cascade::Table(related) => report += self.invalidate_table(related).await?,
                Cascade::Rows { table: related, resolve } => {
                    for related_key in resolve(key) {
                        report += self.invalidate_row(related, &related_key).await?;
                    }
                }
            }
        }
        Ok(report)
    }

    fn absorb(&self, err: Error, op: &'static str, key: &str) -> Result<(), Error> {
        super::absorb(self.config.failure_mode, err, op, key)
    }
}

#[async_trait]
impl<S: CacheStore> EntityObserver for InvalidationManager<S> {
    async fn entity_persisted(&self, table: &str, key: &PrimaryKey) -> Result<InvalidationReport, Error> {
        let mut report = self.invalidate_row(table, key).await?;
        report += self.run_cascades(table, key).await?;
        Ok(report)
    }

    async fn entity_deleted(
        &self, table: &str, key: &PrimaryKey, associations: &[AssociationSnapshot],
    ) -> Result<InvalidationReport, Error> {
        let mut report = self.invalidate_row(table, key).await?;
        for association in associations {
            report += self.invalidate_row(&association.table, &association.key).await?;
        }
        report += self.run_cascades(table, key).await?;
        Ok(report)
    }
}
