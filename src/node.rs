/*!
 * A remote node: its endpoint, its pool lifecycle and instrumented execution
 */

use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::config::{NodeConfig, NodeOptions};
use crate::connection::{Connection, Connector, TcpConnector};
use crate::endpoint::{Address, Endpoint};
use crate::error::{NodeError, Result};
use crate::instrumentation::{Instrumenter, OperationPayload};
use crate::lifecycle::{LifecycleState, NodePool, PoolLifecycleManager};

/// Label used for operations run through [`Node::execute`]
pub const OPERATIONS_EVENT: &str = "nodepool.ops";

/// One remote node and everything needed to talk to it
///
/// Each node owns its own lifecycle manager, so pools are never shared
/// between nodes.
///
/// # Example
///
/// ```no_run
/// use nodepool::{Node, NodeOptions};
/// use std::io::Write;
///
/// # fn example() -> nodepool::Result<()> {
/// let node = Node::new("db1.internal:27017".parse()?, NodeOptions::new().with_pool_size(3));
///
/// node.execute(&["ping"], |conn| {
///     conn.write_all(b"ping")?;
///     Ok(())
/// })?;
///
/// node.shutdown_pool()?;
/// # Ok(())
/// # }
/// ```
pub struct Node<C: Connector = TcpConnector> {
    endpoint: Arc<Endpoint>,
    manager: PoolLifecycleManager<C>,
    instrumenter: Instrumenter,
}

impl Node<TcpConnector> {
    /// Create a node that connects over TCP
    pub fn new(address: Address, options: NodeOptions) -> Self {
        Self::with_connector(address, options, TcpConnector)
    }

    /// Create a TCP node from a loaded configuration
    pub fn from_config(config: &NodeConfig) -> Result<Self> {
        config.options.validate()?;
        let address: Address = config.address.parse()?;
        Ok(Self::new(address, config.options.clone()))
    }
}

impl<C: Connector> Node<C> {
    pub fn with_connector(address: Address, options: NodeOptions, connector: C) -> Self {
        let endpoint = Arc::new(Endpoint::new(address, options));
        Self {
            manager: PoolLifecycleManager::new(Arc::clone(&endpoint), connector),
            endpoint,
            instrumenter: Instrumenter::default(),
        }
    }

    /// Replace the instrumenter, e.g. to log to a different sink
    ///
    /// The pool lifecycle reports to the same sink.
    pub fn with_instrumenter(self, instrumenter: Instrumenter) -> Self {
        let manager = self.manager.with_sink(Arc::clone(instrumenter.sink()));
        Self {
            endpoint: self.endpoint,
            manager,
            instrumenter,
        }
    }

    pub fn address(&self) -> &Address {
        self.endpoint.address()
    }

    pub fn options(&self) -> &NodeOptions {
        self.endpoint.options()
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    pub fn lifecycle(&self) -> &PoolLifecycleManager<C> {
        &self.manager
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.manager.state()
    }

    /// Get this node's connection pool, creating it on first use
    pub fn pool(&self) -> Result<Arc<NodePool<C>>> {
        self.manager.pool()
    }

    /// Shut this node's pool down; the next `pool()` builds a fresh one
    pub fn shutdown_pool(&self) -> Result<()> {
        self.manager.shutdown_pool()
    }

    /// Run `work` with timing and logging, handing failures back unchanged
    pub fn instrument<T, E, F>(
        &self,
        name: &str,
        payload: &mut OperationPayload,
        work: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: fmt::Display,
    {
        self.instrumenter.instrument(name, payload, work)
    }

    /// Check a connection out, run `work` on it and return it to the pool
    ///
    /// Pool creation, checkout and the call are instrumented together with
    /// `ops` as the logged operations and the node's address as prefix. A
    /// connection that fails with a connection or I/O error is taken out of
    /// the pool and closed instead of being returned.
    pub fn execute<T, F>(&self, ops: &[&str], work: F) -> Result<T>
    where
        F: FnOnce(&mut C::Connection) -> Result<T>,
    {
        let mut payload = OperationPayload::new(self.address().to_string());
        payload.ops.extend(ops.iter().map(|op| op.to_string()));

        self.instrument(OPERATIONS_EVENT, &mut payload, || {
            let pool = self.pool()?;
            let mut conn = pool.checkout()?;
            let result = work(&mut *conn);

            if let Err(e @ (NodeError::Connection(_) | NodeError::Io(_))) = &result {
                debug!("Discarding connection to {} after error: {}", self.address(), e);
                let mut broken = conn.detach();
                if let Err(e) = broken.disconnect() {
                    debug!("Failed to close discarded connection to {}: {}", self.address(), e);
                }
            }
            result
        })
    }
}

impl<C: Connector> fmt::Debug for Node<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("address", &format_args!("{}", self.address()))
            .field("manager", &self.manager)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectionError;
    use crate::testing::{CapturingSink, MockConnector, SinkCall};
    use nodepool_core_pool::PoolError;
    use std::io;
    use std::time::Duration;

    fn mock_node(options: NodeOptions) -> (Node<MockConnector>, MockConnector, CapturingSink) {
        let connector = MockConnector::new();
        let sink = CapturingSink::new();
        let node = Node::with_connector(Address::new("db.test", 27017), options, connector.clone())
            .with_instrumenter(Instrumenter::new(Arc::new(sink.clone())));
        (node, connector, sink)
    }

    #[test]
    fn test_execute_reuses_pooled_connection() {
        let (node, connector, sink) = mock_node(NodeOptions::new());

        let first = node.execute(&["find"], |conn| Ok(conn.id())).unwrap();
        let second = node.execute(&["find"], |conn| Ok(conn.id())).unwrap();

        assert_eq!(first, second);
        assert_eq!(connector.connects(), 1);
        assert!(sink.warnings().is_empty());
        match &sink.operations()[0] {
            SinkCall::Operations { prefix, ops, .. } => {
                assert_eq!(prefix, "db.test:27017");
                assert_eq!(ops, &vec!["find".to_string()]);
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[test]
    fn test_execute_failure_is_logged_and_propagated() {
        let (node, _, sink) = mock_node(NodeOptions::new());

        let err = node
            .execute(&["insert"], |_conn| -> Result<()> {
                Err(NodeError::Config("boom".to_string()))
            })
            .unwrap_err();

        assert!(matches!(err, NodeError::Config(ref message) if message == "boom"));
        assert_eq!(sink.warnings().len(), 1);
        assert_eq!(sink.operations().len(), 1);
    }

    #[test]
    fn test_connection_error_discards_connection() {
        let (node, connector, _) = mock_node(NodeOptions::new());

        let err = node
            .execute(&["find"], |conn| {
                conn.sever();
                conn.send("find")?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, NodeError::Connection(ConnectionError::Closed(_))));

        let pool = node.pool().unwrap();
        assert_eq!(pool.stats().total, 0);

        let id = node.execute(&["find"], |conn| Ok(conn.id())).unwrap();
        assert_eq!(id, 2);
        assert_eq!(connector.connects(), 2);
    }

    #[test]
    fn test_checkout_timeout_is_instrumented() {
        let (node, _, sink) = mock_node(
            NodeOptions::new()
                .with_pool_size(1)
                .with_pool_timeout(Duration::from_millis(20)),
        );

        let pool = node.pool().unwrap();
        let _held = pool.checkout().unwrap();

        let err = node.execute(&["find"], |_conn| Ok(())).unwrap_err();
        assert!(matches!(err, NodeError::Pool(PoolError::Timeout(_))));
        assert_eq!(sink.warnings().len(), 1);
    }

    #[test]
    fn test_shutdown_then_execute_builds_new_pool() {
        let (node, connector, _) = mock_node(NodeOptions::new());

        node.execute(&["ping"], |conn| Ok(conn.send("ping")?)).unwrap();
        node.shutdown_pool().unwrap();
        assert_eq!(node.lifecycle_state(), LifecycleState::Absent);
        assert_eq!(connector.disconnects(), 1);

        node.execute(&["ping"], |conn| Ok(conn.send("ping")?)).unwrap();
        assert_eq!(node.lifecycle().generation(), 2);
        assert_eq!(node.lifecycle_state(), LifecycleState::Active);
    }

    #[test]
    fn test_from_config() {
        let config = NodeConfig::from_toml_str(
            r#"
            address = "10.1.2.3:27018"
            [options]
            pool_size = 2
            "#,
        )
        .unwrap();

        let node = Node::from_config(&config).unwrap();
        assert_eq!(node.address(), &Address::new("10.1.2.3", 27018));
        assert_eq!(node.options().pool_size(), 2);
        assert_eq!(node.lifecycle_state(), LifecycleState::Absent);
    }

    #[test]
    fn test_from_config_rejects_bad_address() {
        let config = NodeConfig::new("db:notaport");
        assert!(matches!(Node::from_config(&config), Err(NodeError::Config(_))));
    }

    #[test]
    fn test_debug_output() {
        let (node, _, _) = mock_node(NodeOptions::new());
        let rendered = format!("{:?}", node);
        assert!(rendered.starts_with("Node { address: db.test:27017"));
    }

    #[test]
    fn test_io_error_discards_connection() {
        let (node, connector, _) = mock_node(NodeOptions::new());

        let err = node
            .execute(&["find"], |_conn| -> Result<()> {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer").into())
            })
            .unwrap_err();
        assert!(matches!(err, NodeError::Io(_)));
        assert_eq!(node.pool().unwrap().stats().total, 0);
        assert_eq!(connector.disconnects(), 1);
    }

    #[test]
    fn test_pool_creation_failure_is_instrumented() {
        let (node, _, sink) = mock_node(NodeOptions::new().with_pool_size(0));

        let err = node.execute(&["find"], |_conn| Ok(())).unwrap_err();
        assert!(matches!(err, NodeError::Pool(PoolError::InvalidConfig(_))));
        assert_eq!(sink.warnings().len(), 1);
        assert_eq!(sink.operations().len(), 1);
    }

    #[test]
    fn test_lifecycle_reports_to_node_sink() {
        let (node, _, sink) = mock_node(NodeOptions::new());
        node.pool().unwrap();

        assert!(sink.calls().iter().any(|call| matches!(
            call,
            SinkCall::Debug(message) if message.starts_with("Creating new connection pool")
        )));
    }

    #[test]
    fn test_slow_connect_does_not_block_pool_access() {
        let connector = MockConnector::new().with_connect_delay(Duration::from_millis(300));
        let node = Arc::new(Node::with_connector(
            Address::new("db.test", 27017),
            NodeOptions::new(),
            connector,
        ));

        let slow = {
            let node = Arc::clone(&node);
            std::thread::spawn(move || node.execute(&["find"], |conn| Ok(conn.id())))
        };
        std::thread::sleep(Duration::from_millis(50));

        let started = std::time::Instant::now();
        let stats = node.pool().unwrap().stats();
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(stats.active, 1);

        assert_eq!(slow.join().unwrap().unwrap(), 1);
    }
}
