//! Unified error types for querycache.
//!
//! Store-facing failures are split into connection and command errors so the
//! failure mode can decide whether to surface or absorb them.

use rmcp::model::{ErrorCode, ErrorData as McpError};

/// Unified error types for the cache core and its drivers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backing store could not be reached (refused, pool exhausted, timed out).
    #[error("CONNECTION_ERROR: {0}")]
    Connection(String),

    /// The store was reachable but a specific command failed.
    #[error("COMMAND_ERROR: {0}")]
    Command(String),

    /// A stored payload could not be parsed or carried an unknown marker.
    #[error("DECODE_ERROR: {0}")]
    Decode(String),

    /// Invalid input parameters (e.g., empty table name).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// The caller-supplied executor failed against the underlying data source.
    #[error("QUERY_FAILED: {0}")]
    QueryFailed(String),
}

impl Error {
    /// True for errors raised while talking to the backing store.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Command(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidInput(msg) => (-32602, msg.clone()),
            Error::Connection(msg) => (-32001, msg.clone()),
            Error::Command(msg) => (-32002, msg.clone()),
            Error::Decode(msg) => (-32003, msg.clone()),
            Error::QueryFailed(msg) => (-32004, msg.clone()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
