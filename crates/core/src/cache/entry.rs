//! Stored payload and its wire framing.
//!
//! A payload is a UTF-8 JSON object. When the serialized form reaches the
//! configured threshold it is zlib-compressed and prefixed with `C::`.

use std::borrow::Cow;
use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};

use super::descriptor::{PrimaryKey, Row};
use crate::Error;

/// Marker prepended to compressed payloads.
pub const COMPRESSED_MARKER: &[u8] = b"C::";

/// The value stored at a query key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub table: String,
    /// Distinct primary keys present in `data`; joins the entry to its row indexes.
    pub pks: Vec<PrimaryKey>,
    pub relations: Vec<String>,
    /// Unix epoch seconds.
    pub created_at: i64,
    pub data: Vec<Row>,
}

impl CacheEntry {
    pub fn new(table: impl Into<String>, pks: Vec<PrimaryKey>, relations: Vec<String>, data: Vec<Row>) -> Self {
        Self { table: table.into(), pks, relations, created_at: chrono::Utc::now().timestamp(), data }
    }
}

/// Index metadata of an entry, without its rows.
///
/// Invalidation only needs these two fields to rebuild index keys.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryMeta {
    pub table: String,
    #[serde(default)]
    pub pks: Vec<PrimaryKey>,
}

/// JSON encoding with optional threshold compression.
#[derive(Debug, Clone, Copy)]
pub struct PayloadCodec {
    threshold: usize,
}

impl PayloadCodec {
    /// `threshold` of 0 disables compression.
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn encode(&self, entry: &CacheEntry) -> Result<Vec<u8>, Error> {
        let json = serde_json::to_vec(entry).map_err(|e| Error::InvalidInput(format!("unserializable entry: {e}")))?;
        if self.threshold == 0 || json.len() < self.threshold {
            return Ok(json);
        }

        let mut encoder = ZlibEncoder::new(Vec::with_capacity(json.len() / 2), Compression::default());
        encoder.write_all(&json).map_err(compression_error)?;
        let compressed = encoder.finish().map_err(compression_error)?;

        let mut framed = Vec::with_capacity(COMPRESSED_MARKER.len() + compressed.len());
        framed.extend_from_slice(COMPRESSED_MARKER);
        framed.extend_from_slice(&compressed);
        Ok(framed)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<CacheEntry, Error> {
        let json = unframe(bytes)?;
        Ok(serde_json::from_slice(&json)?)
    }

    /// Decode only the fields needed to locate the entry's index sets.
    pub fn decode_meta(&self, bytes: &[u8]) -> Result<EntryMeta, Error> {
        let json = unframe(bytes)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

fn unframe(bytes: &[u8]) -> Result<Cow<'_, [u8]>, Error> {
    if let Some(compressed) = bytes.strip_prefix(COMPRESSED_MARKER) {
        let mut decoder = ZlibDecoder::new(compressed);
        let mut inflated = Vec::new();
        decoder
            .read_to_end(&mut inflated)
            .map_err(|e| Error::Decode(format!("decompression failed: {e}")))?;
        return Ok(Cow::Owned(inflated));
    }

    match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') => Ok(Cow::Borrowed(bytes)),
        _ => Err(Error::Decode("unknown payload marker".into())),
    }
}

fn compression_error(err: std::io::Error) -> Error {
    Error::InvalidInput(format!("compression failed: {err}"))
}
