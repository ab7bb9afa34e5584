//! Generic blocking connection pool
//!
//! Connections are created lazily up to `max_size`, reused after being
//! returned, and torn down when the pool is shut down. Callers block on
//! checkout until a connection frees up or the checkout timeout elapses.

use crate::error::{BoxError, PoolError};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default maximum number of connections held by a pool
pub const DEFAULT_MAX_SIZE: usize = 5;

/// Default time a caller waits for a connection to become available
pub const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_millis(500);

/// Configuration for connection pool behavior
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool (idle + checked out)
    pub max_size: usize,
    /// Timeout for acquiring a connection from the pool
    pub checkout_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            checkout_timeout: DEFAULT_CHECKOUT_TIMEOUT,
        }
    }
}

impl PoolConfig {
    pub fn new(max_size: usize, checkout_timeout: Duration) -> Self {
        Self {
            max_size,
            checkout_timeout,
        }
    }

    /// Reject configurations that could never hand out a connection
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_size == 0 {
            return Err(PoolError::InvalidConfig(
                "max_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Factory trait for creating and validating connections
///
/// Any `Fn() -> Result<T, E>` closure is a factory whose connections are
/// always considered healthy.
pub trait ConnectionFactory<T>: Send + Sync {
    /// Create a new connection
    fn create(&self) -> Result<T, BoxError>;

    /// Check if an idle connection can still be handed out
    fn is_healthy(&self, _conn: &T) -> bool {
        true
    }
}

impl<T, E, F> ConnectionFactory<T> for F
where
    F: Fn() -> Result<T, E> + Send + Sync,
    E: Into<BoxError>,
{
    fn create(&self) -> Result<T, BoxError> {
        self().map_err(Into::into)
    }
}

type Teardown<T> = Arc<dyn Fn(T) -> Result<(), BoxError> + Send + Sync>;

/// Internal pool state
struct PoolState<T> {
    /// Available connections
    idle: Vec<T>,
    /// Number of connections currently checked out or being created
    active_count: usize,
    /// Set once the pool is shut down; applied to every connection returned afterwards
    teardown: Option<Teardown<T>>,
}

impl<T> PoolState<T> {
    fn new() -> Self {
        Self {
            idle: Vec::new(),
            active_count: 0,
            teardown: None,
        }
    }

    fn total_count(&self) -> usize {
        self.idle.len() + self.active_count
    }
}

/// A bounded, thread-safe pool of reusable connections
///
/// # Example
/// ```
/// use nodepool_core_pool::{ConnectionPool, PoolConfig, PoolError};
///
/// # fn example() -> Result<(), PoolError> {
/// let pool = ConnectionPool::new(PoolConfig::default(), || {
///     Ok::<_, std::io::Error>(String::from("conn"))
/// })?;
///
/// {
///     let conn = pool.checkout()?;
///     assert_eq!(conn.as_str(), "conn");
/// } // returned to the pool here
///
/// pool.shutdown(|conn: String| {
///     drop(conn);
///     Ok::<_, std::io::Error>(())
/// })?;
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
pub struct ConnectionPool<T> {
    config: PoolConfig,
    factory: Box<dyn ConnectionFactory<T>>,
    state: Mutex<PoolState<T>>,
    available: Condvar,
}

impl<T> ConnectionPool<T> {
    /// Create a new connection pool; no connection is opened until first checkout
    pub fn new<F>(config: PoolConfig, factory: F) -> Result<Self, PoolError>
    where
        F: ConnectionFactory<T> + 'static,
    {
        config.validate()?;
        Ok(Self {
            config,
            factory: Box::new(factory),
            state: Mutex::new(PoolState::new()),
            available: Condvar::new(),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Check out a connection using the configured checkout timeout
    pub fn checkout(&self) -> Result<PooledConnection<'_, T>, PoolError> {
        self.checkout_timeout(self.config.checkout_timeout)
    }

    /// Check out a connection, waiting at most `timeout` for one to free up
    ///
    /// Idle connections are reused first. If none is idle and the pool is
    /// below capacity a new one is created outside the pool lock.
    /// A timeout too large to form a deadline waits without one.
    pub fn checkout_timeout(&self, timeout: Duration) -> Result<PooledConnection<'_, T>, PoolError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();

        loop {
            if state.teardown.is_some() {
                return Err(PoolError::Shutdown);
            }

            while let Some(conn) = state.idle.pop() {
                if self.factory.is_healthy(&conn) {
                    state.active_count += 1;
                    return Ok(PooledConnection::new(self, conn));
                }
                debug!("Discarding unhealthy idle connection");
            }

            if state.total_count() < self.config.max_size {
                // Reserve the slot before releasing the lock
                state.active_count += 1;
                drop(state);

                return match self.factory.create() {
                    Ok(conn) => Ok(PooledConnection::new(self, conn)),
                    Err(e) => {
                        self.release_slot();
                        Err(PoolError::Create(e))
                    }
                };
            }

            match deadline {
                Some(deadline) => {
                    if self.available.wait_until(&mut state, deadline).timed_out() {
                        return Err(PoolError::Timeout(timeout));
                    }
                }
                None => self.available.wait(&mut state),
            }
        }
    }

    /// Run `f` with a checked-out connection, returning it afterwards
    pub fn with<R, F>(&self, f: F) -> Result<R, PoolError>
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut conn = self.checkout()?;
        Ok(f(&mut conn))
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            idle: state.idle.len(),
            active: state.active_count,
            total: state.total_count(),
            max_size: self.config.max_size,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().teardown.is_some()
    }

    /// Shut the pool down, tearing down every connection it holds
    ///
    /// Idle connections are torn down before this returns. Connections that
    /// are checked out are torn down when they come back. Waiting and future
    /// checkouts fail with [`PoolError::Shutdown`]. Teardown failures of the
    /// idle set are collected into [`PoolError::Drain`]. Calling this on a
    /// pool that is already shut down does nothing.
    pub fn shutdown<F, E>(&self, teardown: F) -> Result<(), PoolError>
    where
        F: Fn(T) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let teardown: Teardown<T> = Arc::new(move |conn: T| teardown(conn).map_err(Into::into));

        let idle = {
            let mut state = self.state.lock();
            if state.teardown.is_some() {
                debug!("Connection pool already shut down");
                return Ok(());
            }
            state.teardown = Some(Arc::clone(&teardown));
            std::mem::take(&mut state.idle)
        };
        self.available.notify_all();

        debug!(idle = idle.len(), "Draining connection pool");
        let failures: Vec<BoxError> = idle
            .into_iter()
            .filter_map(|conn| teardown(conn).err())
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PoolError::Drain { failures })
        }
    }

    fn checkin(&self, conn: T) {
        let mut state = self.state.lock();
        state.active_count = state.active_count.saturating_sub(1);

        match state.teardown.clone() {
            Some(teardown) => {
                drop(state);
                if let Err(e) = teardown(conn) {
                    warn!(error = %e, "Failed to disconnect connection returned after shutdown");
                }
            }
            None => {
                state.idle.push(conn);
                drop(state);
                self.available.notify_one();
            }
        }
    }

    fn release_slot(&self) {
        let mut state = self.state.lock();
        state.active_count = state.active_count.saturating_sub(1);
        drop(state);
        self.available.notify_one();
    }
}

impl<T> fmt::Debug for ConnectionPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A connection checked out of a [`ConnectionPool`]
///
/// Dereferences to the connection and returns it to the pool on drop.
pub struct PooledConnection<'a, T> {
    pool: &'a ConnectionPool<T>,
    conn: Option<T>,
}

impl<'a, T> PooledConnection<'a, T> {
    fn new(pool: &'a ConnectionPool<T>, conn: T) -> Self {
        Self {
            pool,
            conn: Some(conn),
        }
    }

    /// Take the connection out of the pool for good, freeing its slot
    pub fn detach(mut self) -> T {
        let conn = self.conn.take().expect("connection present until drop");
        self.pool.release_slot();
        conn
    }
}

impl<T> Deref for PooledConnection<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<T> DerefMut for PooledConnection<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<T> Drop for PooledConnection<'_, T> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.checkin(conn);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PooledConnection<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PooledConnection").field(&self.conn).finish()
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of idle connections
    pub idle: usize,
    /// Number of checked-out connections
    pub active: usize,
    /// Total connections (idle + active)
    pub total: usize,
    /// Maximum pool size
    pub max_size: usize,
}
