//! Error types for the connection pool

use std::time::Duration;
use thiserror::Error;

/// Boxed error produced by connection factories and teardown callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by [`ConnectionPool`](crate::ConnectionPool)
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool configuration cannot produce a working pool
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// No connection became available before the checkout timeout elapsed
    #[error("Timed out after {0:?} waiting for a pooled connection")]
    Timeout(Duration),

    /// The pool was shut down and no longer hands out connections
    #[error("Connection pool has been shut down")]
    Shutdown,

    /// The factory failed to create a new connection
    #[error("Failed to create connection: {0}")]
    Create(#[source] BoxError),

    /// One or more connections failed to tear down while draining
    #[error("{} connection(s) failed to disconnect during drain", .failures.len())]
    Drain { failures: Vec<BoxError> },
}

impl PoolError {
    /// Whether a later checkout might succeed where this one failed
    pub fn is_transient(&self) -> bool {
        matches!(self, PoolError::Timeout(_) | PoolError::Create(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_message_counts_failures() {
        let err = PoolError::Drain {
            failures: vec!["a".into(), "b".into()],
        };
        assert_eq!(
            err.to_string(),
            "2 connection(s) failed to disconnect during drain"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(PoolError::Timeout(Duration::from_millis(10)).is_transient());
        assert!(PoolError::Create("refused".into()).is_transient());
        assert!(!PoolError::Shutdown.is_transient());
        assert!(!PoolError::InvalidConfig("zero".into()).is_transient());
    }
}
