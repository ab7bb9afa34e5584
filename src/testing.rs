//! Testing utilities for nodes and instrumentation
//!
//! [`CapturingSink`] records every call made to a [`LogSink`] for later
//! inspection. [`MockConnector`] hands out in-memory connections whose
//! connect and disconnect behavior can be scripted, and counts what happened
//! to them.
//!
//! ## Example
//!
//! ```
//! use nodepool::testing::{CapturingSink, MockConnector};
//! use nodepool::{Address, Instrumenter, Node, NodeOptions, OperationPayload};
//! use std::sync::Arc;
//!
//! let sink = CapturingSink::new();
//! let connector = MockConnector::new();
//! let node = Node::with_connector(Address::new("db.test", 27017), NodeOptions::new(), connector.clone())
//!     .with_instrumenter(Instrumenter::new(Arc::new(sink.clone())));
//!
//! node.execute(&["ping"], |conn| Ok(conn.send("ping")?)).unwrap();
//!
//! assert_eq!(connector.connects(), 1);
//! assert_eq!(sink.operations().len(), 1);
//! ```

use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::connection::{Connection, Connector};
use crate::endpoint::Endpoint;
use crate::error::ConnectionError;
use crate::instrumentation::LogSink;

/// One recorded call to a [`LogSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Debug(String),
    Warn {
        prefix: String,
        message: String,
        runtime: String,
    },
    Operations {
        prefix: String,
        ops: Vec<String>,
        runtime: String,
    },
}

/// Log sink that keeps every call in memory
#[derive(Debug, Clone, Default)]
pub struct CapturingSink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all captured calls, oldest first
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    pub fn warnings(&self) -> Vec<SinkCall> {
        self.filtered(|call| matches!(call, SinkCall::Warn { .. }))
    }

    pub fn operations(&self) -> Vec<SinkCall> {
        self.filtered(|call| matches!(call, SinkCall::Operations { .. }))
    }

    /// Clear all captured calls
    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn filtered(&self, keep: impl Fn(&SinkCall) -> bool) -> Vec<SinkCall> {
        self.calls.lock().iter().filter(|call| keep(call)).cloned().collect()
    }
}

impl LogSink for CapturingSink {
    fn debug(&self, message: &str) {
        self.calls.lock().push(SinkCall::Debug(message.to_string()));
    }

    fn warn(&self, prefix: &str, message: &str, runtime: &str) {
        self.calls.lock().push(SinkCall::Warn {
            prefix: prefix.to_string(),
            message: message.to_string(),
            runtime: runtime.to_string(),
        });
    }

    fn log_operations(&self, prefix: &str, ops: &[String], runtime: &str) {
        self.calls.lock().push(SinkCall::Operations {
            prefix: prefix.to_string(),
            ops: ops.to_vec(),
            runtime: runtime.to_string(),
        });
    }
}

#[derive(Debug, Default)]
struct MockStats {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    disconnect_attempts: AtomicUsize,
}

/// Connector producing [`MockConnection`]s
///
/// Clones share their counters, so a test can keep one clone and hand the
/// other to a node.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    stats: Arc<MockStats>,
    refuse: bool,
    fail_disconnect: bool,
    connect_delay: Option<Duration>,
    disconnect_delay: Option<Duration>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connect attempt fails with `ConnectionRefused`
    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }

    /// Every disconnect fails
    pub fn failing_disconnect(mut self) -> Self {
        self.fail_disconnect = true;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn with_disconnect_delay(mut self, delay: Duration) -> Self {
        self.disconnect_delay = Some(delay);
        self
    }

    /// Connections successfully opened
    pub fn connects(&self) -> usize {
        self.stats.connects.load(Ordering::SeqCst)
    }

    /// Connections successfully closed
    pub fn disconnects(&self) -> usize {
        self.stats.disconnects.load(Ordering::SeqCst)
    }

    /// Disconnect calls on open connections, failed or not
    pub fn disconnect_attempts(&self) -> usize {
        self.stats.disconnect_attempts.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    fn connect(&self, endpoint: &Endpoint) -> Result<MockConnection, ConnectionError> {
        if let Some(delay) = self.connect_delay {
            thread::sleep(delay);
        }

        let address = endpoint.address().to_string();
        if self.refuse {
            return Err(ConnectionError::Connect {
                address,
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
            });
        }

        let id = self.stats.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockConnection {
            id,
            address,
            connected: true,
            fail_disconnect: self.fail_disconnect,
            disconnect_delay: self.disconnect_delay,
            sent: Vec::new(),
            stats: Arc::clone(&self.stats),
        })
    }
}

/// In-memory connection that records what was sent over it
#[derive(Debug)]
pub struct MockConnection {
    id: usize,
    address: String,
    connected: bool,
    fail_disconnect: bool,
    disconnect_delay: Option<Duration>,
    sent: Vec<String>,
    stats: Arc<MockStats>,
}

impl MockConnection {
    /// Position of this connection in the connector's connect order, from 1
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn send(&mut self, message: &str) -> Result<(), ConnectionError> {
        if !self.connected {
            return Err(ConnectionError::Closed(self.address.clone()));
        }
        self.sent.push(message.to_string());
        Ok(())
    }

    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    /// Simulate the peer dropping the connection
    pub fn sever(&mut self) {
        self.connected = false;
    }
}

impl Connection for MockConnection {
    fn disconnect(&mut self) -> Result<(), ConnectionError> {
        if !self.connected {
            return Ok(());
        }

        self.stats.disconnect_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.disconnect_delay {
            thread::sleep(delay);
        }

        if self.fail_disconnect {
            return Err(ConnectionError::Disconnect {
                address: self.address.clone(),
                source: io::Error::other("simulated disconnect failure"),
            });
        }

        self.connected = false;
        self.stats.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
