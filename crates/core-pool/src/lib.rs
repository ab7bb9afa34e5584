//! Nodepool Core Pool: a pure-logic blocking connection pool
//!
//! # Overview
//!
//! [`ConnectionPool`] holds up to `max_size` connections to a single remote
//! endpoint. Connections are created lazily by a [`ConnectionFactory`],
//! handed out as [`PooledConnection`] guards that return themselves on drop,
//! and torn down through a caller-supplied callback when the pool is shut
//! down.
//!
//! The crate has no knowledge of what a connection is. Anything `Send` can
//! be pooled.
//!
//! # Contract
//!
//! ```text
//!   ConnectionPool::new(config, factory)
//!          │
//!          ▼
//!   checkout() ──► PooledConnection ──drop──► idle set
//!          │                                    │
//!          │ (timeout / shutdown)               │
//!          ▼                                    ▼
//!     PoolError                 shutdown(teardown) drains idle set;
//!                               connections returned later are torn
//!                               down on return
//! ```
//!
//! # Usage Example
//!
//! ```
//! use nodepool_core_pool::{ConnectionPool, PoolConfig, PoolError};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), PoolError> {
//! let config = PoolConfig::new(3, Duration::from_millis(100));
//! let pool = ConnectionPool::new(config, || Ok::<_, std::io::Error>(vec![0u8; 4]))?;
//!
//! let len = pool.with(|buf| buf.len())?;
//! assert_eq!(len, 4);
//! assert_eq!(pool.stats().idle, 1);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod connection_pool;
pub mod error;

// Re-export main types for convenience
pub use connection_pool::{
    ConnectionFactory, ConnectionPool, PoolConfig, PoolStats, PooledConnection,
    DEFAULT_CHECKOUT_TIMEOUT, DEFAULT_MAX_SIZE,
};
pub use error::{BoxError, PoolError};
