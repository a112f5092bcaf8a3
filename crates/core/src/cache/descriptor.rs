//! Query shape and row identity.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One result row, column name to value.
pub type Row = serde_json::Map<String, Value>;

/// Rows returned by an executor or decoded from a cache entry.
pub type ResultSet = Vec<Row>;

/// Structural description of a query used for key derivation.
///
/// Relation names are kept in a sorted set, so the order in which a call site
/// declares eager loads never changes the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    statement: String,
    params: Vec<Value>,
    relations: BTreeSet<String>,
}

impl QueryDescriptor {
    /// Descriptor for a normalized statement with no parameters or relations.
    pub fn new(statement: impl Into<String>) -> Self {
        Self { statement: statement.into(), params: Vec::new(), relations: BTreeSet::new() }
    }

    /// Append a positional parameter.
    pub fn bind(mut self, param: impl Into<Value>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn with_params<I, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.params.extend(params.into_iter().map(Into::into));
        self
    }

    /// Add eager-loaded relation names.
    pub fn with_relations<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relations.extend(relations.into_iter().map(Into::into));
        self
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Relation names in lexicographic order.
    pub fn relations(&self) -> impl Iterator<Item = &str> {
        self.relations.iter().map(String::as_str)
    }
}

/// Identity of a row within its table.
///
/// Serialized untagged, so it appears in payloads as a bare number or string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum PrimaryKey {
    Int(i64),
    Str(String),
}

impl PrimaryKey {
    /// Scalar key from a JSON value. Null and non-scalar values have no key.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(PrimaryKey::Int(i)),
                None => Some(PrimaryKey::Str(n.to_string())),
            },
            Value::String(s) => Some(PrimaryKey::Str(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryKey::Int(i) => write!(f, "{i}"),
            PrimaryKey::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for PrimaryKey {
    fn from(value: i64) -> Self {
        PrimaryKey::Int(value)
    }
}

impl From<&str> for PrimaryKey {
    fn from(value: &str) -> Self {
        PrimaryKey::Str(value.to_string())
    }
}

impl From<String> for PrimaryKey {
    fn from(value: String) -> Self {
        PrimaryKey::Str(value)
    }
}

/// Extractor reading the primary key from a single column.
pub fn column(name: &str) -> impl Fn(&Row) -> Option<PrimaryKey> + Send + Sync + '_ {
    move |row| row.get(name).and_then(PrimaryKey::from_value)
}

/// Distinct, non-null primary keys of `rows` in first-seen order.
///
/// Keys are compared by their rendered form, matching how they appear in row
/// index keys.
pub fn collect_primary_keys<F>(rows: &[Row], extractor: F) -> Vec<PrimaryKey>
where
    F: Fn(&Row) -> Option<PrimaryKey>,
{
    let mut seen = HashSet::new();
    rows.iter()
        .filter_map(extractor)
        .filter(|pk| seen.insert(pk.to_string()))
        .collect()
}
