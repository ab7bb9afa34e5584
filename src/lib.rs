/*!
 * Nodepool - per-node connection pools with instrumented execution
 *
 * - Lazily created, thread-safe connection pool per remote node
 * - One-shot, race-free pool shutdown that never blocks new pool creation
 * - Timing and structured logging around every operation, failures included
 * - TOML configuration with pool size and timeout defaults
 * - `tracing` based logging to stdout or a JSON file
 */

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod instrumentation;
pub mod lifecycle;
pub mod logging;
pub mod node;
pub mod testing;

// Re-export commonly used types
pub use config::{LogLevel, LoggingConfig, NodeConfig, NodeOptions};
pub use connection::{Connection, Connector, TcpConnection, TcpConnector};
pub use endpoint::{Address, Endpoint};
pub use error::{ConnectionError, NodeError, Result};
pub use instrumentation::{FailureInfo, Instrumenter, LogSink, OperationPayload, TracingSink};
pub use lifecycle::{LifecycleState, NodePool, PoolLifecycleManager};
pub use node::Node;
pub use nodepool_core_pool::{ConnectionPool, PoolConfig, PoolError, PoolStats, PooledConnection};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
