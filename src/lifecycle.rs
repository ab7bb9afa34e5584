/*!
 * Lazy, thread-safe lifecycle of a node's connection pool
 *
 * The pool is built on first demand, shared by every caller until shut down,
 * and rebuilt on the next demand after a shutdown. Two locks are involved:
 *
 * - the lifecycle lock guards the pool reference and serializes creation
 *   against the reference swap performed by shutdown;
 * - the shutdown lock serializes shutdown attempts so that only one of any
 *   set of concurrent calls drains the pool.
 *
 * Draining happens after both locks are released, so `pool()` never waits
 * on connections being torn down.
 */

use nodepool_core_pool::{BoxError, ConnectionFactory, ConnectionPool, PoolError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::connection::{Connection, Connector};
use crate::endpoint::Endpoint;
use crate::error::{NodeError, Result};
use crate::instrumentation::{LogSink, TracingSink};

/// Pool of connections produced by connector `C`
pub type NodePool<C> = ConnectionPool<<C as Connector>::Connection>;

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// Where a manager is in its pool lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No pool exists; the next `pool()` call creates one
    Absent,
    /// A pool exists and is handed out
    Active,
    /// A shutdown is draining the previous pool
    ShuttingDown,
}

/// Factory handed to the pool: opens connections for one endpoint
struct EndpointFactory<C> {
    endpoint: Arc<Endpoint>,
    connector: Arc<C>,
}

impl<C: Connector> ConnectionFactory<C::Connection> for EndpointFactory<C> {
    fn create(&self) -> std::result::Result<C::Connection, BoxError> {
        Ok(self.connector.connect(&self.endpoint)?)
    }

    fn is_healthy(&self, conn: &C::Connection) -> bool {
        conn.is_connected()
    }
}

/// Clears the shutdown flag on every exit path of a drain
struct ShutdownFlagReset<'a>(&'a AtomicBool);

impl Drop for ShutdownFlagReset<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the creation, sharing and teardown of one endpoint's pool
///
/// # Example
///
/// ```no_run
/// use nodepool::{Address, Endpoint, NodeOptions, PoolLifecycleManager, TcpConnector};
/// use std::sync::Arc;
///
/// # fn example() -> nodepool::Result<()> {
/// let endpoint = Arc::new(Endpoint::new(
///     Address::new("127.0.0.1", 27017),
///     NodeOptions::new().with_pool_size(3),
/// ));
/// let manager = PoolLifecycleManager::new(endpoint, TcpConnector);
///
/// let pool = manager.pool()?;
/// assert!(Arc::ptr_eq(&pool, &manager.pool()?));
///
/// manager.shutdown_pool()?;
/// assert!(!Arc::ptr_eq(&pool, &manager.pool()?));
/// # Ok(())
/// # }
/// ```
pub struct PoolLifecycleManager<C: Connector> {
    id: u64,
    endpoint: Arc<Endpoint>,
    connector: Arc<C>,
    /// Lifecycle lock: the current pool, if any
    pool: Mutex<Option<Arc<NodePool<C>>>>,
    shutdown_lock: Mutex<()>,
    shutting_down: AtomicBool,
    /// Number of pools created so far
    generation: AtomicU64,
    sink: Arc<dyn LogSink>,
}

impl<C: Connector> PoolLifecycleManager<C> {
    pub fn new(endpoint: Arc<Endpoint>, connector: C) -> Self {
        Self {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            endpoint,
            connector: Arc::new(connector),
            pool: Mutex::new(None),
            shutdown_lock: Mutex::new(()),
            shutting_down: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            sink: Arc::new(TracingSink),
        }
    }

    /// Send lifecycle debug messages to `sink` instead of `tracing`
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Get the connection pool, creating it on first use
    ///
    /// Concurrent first callers block until the single creation finishes and
    /// then all observe the same pool. Creation errors propagate untouched.
    pub fn pool(&self) -> Result<Arc<NodePool<C>>> {
        let mut current = self.pool.lock();
        if let Some(pool) = current.as_ref() {
            return Ok(Arc::clone(pool));
        }

        let pool = Arc::new(self.create_pool()?);
        *current = Some(Arc::clone(&pool));
        Ok(pool)
    }

    /// Shut the current pool down and forget it
    ///
    /// Returns immediately if another shutdown is in flight. Otherwise the
    /// pool reference is cleared under the lifecycle lock, then the old pool
    /// is drained with no lock held: idle connections are disconnected before
    /// this returns, checked-out ones as soon as they are returned.
    ///
    /// Disconnect failures are reported as [`NodeError::Drain`] once the
    /// shutdown flag has been cleared.
    pub fn shutdown_pool(&self) -> Result<()> {
        let (old_pool, _reset) = {
            let _serialized = self.shutdown_lock.lock();
            if self.shutting_down.load(Ordering::SeqCst) {
                return Ok(());
            }

            self.sink
                .debug(&format!("Shutting down connection pool for {:?}", self));
            self.shutting_down.store(true, Ordering::SeqCst);
            let reset = ShutdownFlagReset(&self.shutting_down);

            let old_pool = self.pool.lock().take();
            (old_pool, reset)
        };

        let Some(old_pool) = old_pool else {
            return Ok(());
        };

        old_pool
            .shutdown(|mut conn: C::Connection| conn.disconnect())
            .map_err(|source| {
                if let PoolError::Drain { failures } = &source {
                    for failure in failures {
                        warn!(
                            "Failed to disconnect connection to {} during shutdown: {}",
                            self.endpoint.address(),
                            failure
                        );
                    }
                }
                NodeError::Drain {
                    node: self.endpoint.address().to_string(),
                    source,
                }
            })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn has_pool(&self) -> bool {
        self.pool.lock().is_some()
    }

    /// Number of pools this manager has created
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LifecycleState {
        if self.is_shutting_down() {
            LifecycleState::ShuttingDown
        } else if self.has_pool() {
            LifecycleState::Active
        } else {
            LifecycleState::Absent
        }
    }

    /// Build a new pool; called with the lifecycle lock held
    fn create_pool(&self) -> Result<NodePool<C>> {
        self.sink
            .debug(&format!("Creating new connection pool for {:?}", self));

        let factory = EndpointFactory {
            endpoint: Arc::clone(&self.endpoint),
            connector: Arc::clone(&self.connector),
        };
        let pool = ConnectionPool::new(self.endpoint.pool_config(), factory)?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(pool)
    }
}

// Must not take the lifecycle lock: it is formatted while that lock is held.
impl<C: Connector> fmt::Debug for PoolLifecycleManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolLifecycleManager")
            .field("id", &self.id)
            .field("address", &format_args!("{}", self.endpoint.address()))
            .field("generation", &self.generation())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
