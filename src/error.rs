/*!
 * Error types for nodepool
 */

use nodepool_core_pool::{BoxError, PoolError};
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NodeError>;

/// Failures of a single connection to a remote node
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The node's host name could not be resolved
    #[error("Failed to resolve {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Resolution succeeded but yielded no socket addresses
    #[error("No socket addresses found for {0}")]
    NoAddress(String),

    /// Every resolved address refused or timed out
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Closing the connection failed
    #[error("Failed to disconnect from {address}: {source}")]
    Disconnect {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The connection was already disconnected
    #[error("Connection to {0} is closed")]
    Closed(String),

    /// I/O error on an established connection
    #[error("Connection I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ConnectionError {
    /// Check if this error is transient (temporary, worth retrying above this layer)
    pub fn is_transient(&self) -> bool {
        match self {
            ConnectionError::Connect { source, .. } | ConnectionError::Io(source) => {
                Self::is_io_transient(source)
            }
            ConnectionError::Resolve { .. } => true,
            ConnectionError::NoAddress(_)
            | ConnectionError::Disconnect { .. }
            | ConnectionError::Closed(_) => false,
        }
    }

    fn is_io_transient(io_err: &io::Error) -> bool {
        use io::ErrorKind::*;
        matches!(
            io_err.kind(),
            ConnectionRefused
                | ConnectionReset
                | ConnectionAborted
                | NotConnected
                | BrokenPipe
                | TimedOut
                | Interrupted
                | WouldBlock
        )
    }
}

/// Errors surfaced by nodes, their lifecycle manager and configuration
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// A connection-level failure
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Pool construction or checkout failed
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// One or more connections failed to disconnect while the pool drained
    #[error("Failed to drain connection pool for {node}: {source}")]
    Drain {
        node: String,
        #[source]
        source: PoolError,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl NodeError {
    /// Individual teardown failures carried by a drain error
    pub fn drain_failures(&self) -> &[BoxError] {
        match self {
            NodeError::Drain {
                source: PoolError::Drain { failures },
                ..
            } => failures.as_slice(),
            _ => &[],
        }
    }

    /// Check if this error is transient (temporary, worth retrying above this layer)
    pub fn is_transient(&self) -> bool {
        match self {
            NodeError::Connection(e) => e.is_transient(),
            NodeError::Pool(PoolError::Create(source)) => source
                .downcast_ref::<ConnectionError>()
                .map_or(true, ConnectionError::is_transient),
            NodeError::Pool(e) => e.is_transient(),
            NodeError::Config(_) | NodeError::Drain { .. } | NodeError::Io(_) => false,
        }
    }
}
