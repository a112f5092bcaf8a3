//! Deterministic cache key generation.
//!
//! Every key lives under a configurable prefix:
//!
//! | Purpose | Pattern |
//! |---|---|
//! | Query result | `{prefix}:query:{hash}` |
//! | Table index | `{prefix}:index:table:{table}` |
//! | Row index | `{prefix}:rowindex:table:{table}:pk:{pk}` |
//! | Metric counter | `{prefix}:metrics:{name}` |
//!
//! Write-time registration and delete-time reconstruction both go through
//! [`KeyGenerator::entry_index_keys`], so the two can never drift apart.
//!
//! Table names must not contain `:`. The row index pattern of table `a` would
//! otherwise also match the row indexes of a table named `a:pk:b`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};

use super::descriptor::{PrimaryKey, QueryDescriptor};
use crate::Error;

/// Fixed-length digest used for query keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    fn digest(self, framed: &[u8]) -> String {
        match self {
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(framed)),
            HashAlgorithm::Sha384 => hex::encode(Sha384::digest(framed)),
            HashAlgorithm::Sha512 => hex::encode(Sha512::digest(framed)),
        }
    }
}

/// Kind of key recovered by [`KeyGenerator::parse_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Query,
    TableIndex,
    RowIndex,
    Metrics,
}

/// Best-effort decomposition of a key, for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedKey {
    pub prefix: String,
    pub kind: KeyKind,
    /// Hash for query keys, `table` or `table:pk:{pk}` for indexes, name for metrics.
    pub hash: String,
}

const KIND_MARKERS: &[(&str, KeyKind)] = &[
    (":query:", KeyKind::Query),
    (":index:table:", KeyKind::TableIndex),
    (":rowindex:table:", KeyKind::RowIndex),
    (":metrics:", KeyKind::Metrics),
];

/// Pure key derivation. Holds only the prefix and digest choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGenerator {
    prefix: String,
    algorithm: HashAlgorithm,
}

impl KeyGenerator {
    pub fn new(prefix: impl Into<String>, algorithm: HashAlgorithm) -> Self {
        Self { prefix: prefix.into(), algorithm }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key under which the result of `descriptor` is stored.
    ///
    /// The statement, each parameter and each relation name are length-framed
    /// before hashing, so no choice of content can make two descriptors share
    /// a byte stream. Relations arrive already sorted from the descriptor.
    pub fn query_key(&self, descriptor: &QueryDescriptor) -> String {
        let mut framed = Vec::with_capacity(descriptor.statement().len() + 64);
        frame(&mut framed, b"sql", descriptor.statement().as_bytes());
        for param in descriptor.params() {
            frame(&mut framed, b"param", param.to_string().as_bytes());
        }
        for relation in descriptor.relations() {
            frame(&mut framed, b"rel", relation.as_bytes());
        }
        format!("{}:query:{}", self.prefix, self.algorithm.digest(&framed))
    }

    pub fn table_index_key(&self, table: &str) -> String {
        format!("{}:index:table:{}", self.prefix, table)
    }

    /// Row index key. Numeric and string keys with the same text share a key.
    pub fn row_index_key(&self, table: &str, primary_key: &PrimaryKey) -> String {
        format!("{}:rowindex:table:{}:pk:{}", self.prefix, table, primary_key)
    }

    pub fn metrics_key(&self, name: &str) -> String {
        format!("{}:metrics:{}", self.prefix, name)
    }

    /// Every index set a cached entry of `table` with `primary_keys` belongs to.
    ///
    /// The table index always comes first.
    pub fn entry_index_keys(&self, table: &str, primary_keys: &[PrimaryKey]) -> Vec<String> {
        let mut keys = Vec::with_capacity(primary_keys.len() + 1);
        keys.push(self.table_index_key(table));
        keys.extend(primary_keys.iter().map(|pk| self.row_index_key(table, pk)));
        keys
    }

    /// SCAN pattern matching every row index of `table`.
    pub fn row_index_pattern(&self, table: &str) -> String {
        format!("{}:rowindex:table:{}:pk:*", escape_glob(&self.prefix), escape_glob(table))
    }

    /// SCAN pattern matching everything this cache owns.
    pub fn namespace_pattern(&self) -> String {
        format!("{}:*", escape_glob(&self.prefix))
    }

    /// Split a key into prefix, kind and remainder.
    ///
    /// Returns `None` for keys that do not follow the namespace layout.
    pub fn parse_key(key: &str) -> Option<ParsedKey> {
        let (at, marker, kind) = KIND_MARKERS
            .iter()
            .filter_map(|(marker, kind)| key.find(marker).map(|at| (at, *marker, *kind)))
            .min_by_key(|(at, _, _)| *at)?;

        let prefix = &key[..at];
        let rest = &key[at + marker.len()..];
        if prefix.is_empty() || rest.is_empty() {
            return None;
        }
        Some(ParsedKey { prefix: prefix.to_string(), kind, hash: rest.to_string() })
    }
}

/// Reject table names that cannot be placed in a key unambiguously.
pub fn validate_table(table: &str) -> Result<(), Error> {
    if table.is_empty() {
        return Err(Error::InvalidInput("table name must not be empty".to_string()));
    }
    if table.contains(':') {
        return Err(Error::InvalidInput(format!("table name {table:?} must not contain ':'")));
    }
    Ok(())
}

fn frame(buf: &mut Vec<u8>, tag: &[u8], bytes: &[u8]) {
    buf.extend_from_slice(tag);
    buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// Escape Redis glob metacharacters so `text` only matches itself.
pub fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
