//! Entity lifecycle contract for the integration layer.
//!
//! The integration layer calls an [`EntityObserver`] when it persists or
//! deletes an entity. Related data to invalidate alongside is declared up front
//! in a [`CascadeRegistry`]; nothing is discovered at runtime.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::descriptor::PrimaryKey;
use super::invalidation::InvalidationReport;
use crate::Error;

/// An association loaded on an entity at the moment it was deleted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssociationSnapshot {
    pub table: String,
    pub key: PrimaryKey,
}

impl AssociationSnapshot {
    pub fn new(table: impl Into<String>, key: impl Into<PrimaryKey>) -> Self {
        Self { table: table.into(), key: key.into() }
    }
}

/// Resolves the related row keys for a changed row.
pub type RelatedKeys = Arc<dyn Fn(&PrimaryKey) -> Vec<PrimaryKey> + Send + Sync>;

/// Something to invalidate when a row of the source table changes.
#[derive(Clone)]
pub enum Cascade {
    /// Invalidate every cached query of the related table.
    Table(String),
    /// Invalidate only the related rows the resolver returns.
    Rows { table: String, resolve: RelatedKeys },
}

impl fmt::Debug for Cascade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cascade::Table(table) => f.debug_tuple("Table").field(table).finish(),
            Cascade::Rows { table, .. } => f.debug_struct("Rows").field("table", table).finish_non_exhaustive(),
        }
    }
}

/// Statically declared cascades, keyed by source table.
#[derive(Debug, Clone, Default)]
pub struct CascadeRegistry {
    cascades: HashMap<String, Vec<Cascade>>,
}

impl CascadeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// When `source` changes, invalidate all of `related`.
    pub fn table(mut self, source: impl Into<String>, related: impl Into<String>) -> Self {
        self.cascades.entry(source.into()).or_default().push(Cascade::Table(related.into()));
        self
    }

    /// When a `source` row changes, invalidate the `related` rows `resolve` returns.
    pub fn rows<F>(mut self, source: impl Into<String>, related: impl Into<String>, resolve: F) -> Self
    where
        F: Fn(&PrimaryKey) -> Vec<PrimaryKey> + Send + Sync + 'static,
    {
        self.cascades
            .entry(source.into())
            .or_default()
            .push(Cascade::Rows { table: related.into(), resolve: Arc::new(resolve) });
        self
    }

    pub fn for_table(&self, table: &str) -> &[Cascade] {
        self.cascades.get(table).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Lifecycle events the integration layer reports.
#[async_trait]
pub trait EntityObserver: Send + Sync {
    /// An entity was inserted or updated.
    async fn entity_persisted(&self, table: &str, key: &PrimaryKey) -> Result<InvalidationReport, Error>;

    /// An entity was deleted. `associations` are the to-one and to-many
    /// associations that were loaded on it at delete time.
    async fn entity_deleted(
        &self, table: &str, key: &PrimaryKey, associations: &[AssociationSnapshot],
    ) -> Result<InvalidationReport, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = CascadeRegistry::new()
            .table("posts", "feeds")
            .rows("posts", "users", |_| vec![PrimaryKey::Int(7)]);

        let cascades = registry.for_table("posts");
        assert_eq!(cascades.len(), 2);
        assert!(matches!(&cascades[0], Cascade::Table(t) if t == "feeds"));
        match &cascades[1] {
            Cascade::Rows { table, resolve } => {
                assert_eq!(table, "users");
                assert_eq!(resolve(&PrimaryKey::Int(1)), vec![PrimaryKey::Int(7)]);
            }
            other => panic!("unexpected cascade {other:?}"),
        }
        assert!(registry.for_table("comments").is_empty());
    }

    #[test]
    fn test_association_snapshot() {
        let snap = AssociationSnapshot::new("comments", 3i64);
        assert_eq!(snap.key, PrimaryKey::Int(3));
    }
}
