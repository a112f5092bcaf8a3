//! Mapping from driver errors onto the cache error type.

use deadpool_redis::{CreatePoolError, PoolError};
use querycache_core::Error;
use redis::RedisError;

/// Classify a driver error.
///
/// Transport failures (refused, dropped, I/O, timeouts) become
/// [`Error::Connection`]; anything the server rejected becomes
/// [`Error::Command`].
pub fn from_redis(err: RedisError) -> Error {
    if is_transport(&err) { Error::Connection(err.to_string()) } else { Error::Command(err.to_string()) }
}

/// A connection could not be checked out of the pool.
pub fn from_pool(err: PoolError) -> Error {
    match err {
        PoolError::Backend(err) => from_redis(err),
        other => Error::Connection(format!("pool: {other}")),
    }
}

/// The pool could not be built from configuration.
pub fn from_create(err: CreatePoolError) -> Error {
    Error::Connection(format!("pool setup: {err}"))
}

/// Deadline for `op` elapsed before the store answered.
pub fn timed_out(op: &str, after_ms: u128) -> Error {
    Error::Connection(format!("{op} timed out after {after_ms}ms"))
}

fn is_transport(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout()
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::ErrorKind;

    #[test]
    fn test_server_rejection_is_command_error() {
        let err = RedisError::from((ErrorKind::TypeError, "WRONGTYPE", "set vs string".to_string()));
        let mapped = from_redis(err);
        assert!(matches!(mapped, Error::Command(_)));
        assert!(mapped.to_string().starts_with("COMMAND_ERROR"));
    }

    #[test]
    fn test_io_error_is_connection_error() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let mapped = from_redis(RedisError::from(io));
        assert!(matches!(mapped, Error::Connection(_)));
    }

    #[test]
    fn test_closed_pool_is_connection_error() {
        let mapped = from_pool(PoolError::Closed);
        assert!(matches!(mapped, Error::Connection(_)));
        assert!(mapped.to_string().contains("pool"));
    }

    #[test]
    fn test_timed_out_message() {
        let err = timed_out("GET", 2000);
        assert_eq!(err.to_string(), "CONNECTION_ERROR: GET timed out after 2000ms");
    }
}
