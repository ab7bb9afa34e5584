/*!
 * Remote node addressing
 */

use nodepool_core_pool::PoolConfig;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use crate::config::NodeOptions;
use crate::error::{ConnectionError, NodeError, Result};

/// Port assumed when an address names only a host
pub const DEFAULT_PORT: u16 = 27017;

/// Host and port of a remote node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve to every socket address the host maps to
    pub fn resolve(&self) -> std::result::Result<Vec<SocketAddr>, ConnectionError> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|source| ConnectionError::Resolve {
                address: self.to_string(),
                source,
            })?
            .collect();

        if addrs.is_empty() {
            return Err(ConnectionError::NoAddress(self.to_string()));
        }
        Ok(addrs)
    }
}

impl FromStr for Address {
    type Err = NodeError;

    /// Accepts `host`, `host:port`, `[v6]` and `[v6]:port`; a bare IPv6
    /// literal without brackets is taken as a host on the default port.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(NodeError::Config("address is empty".to_string()));
        }

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| NodeError::Config(format!("unterminated IPv6 address: {s}")))?;
            match tail {
                "" => (host, None),
                _ => match tail.strip_prefix(':') {
                    Some(port) => (host, Some(port)),
                    None => return Err(NodeError::Config(format!("invalid address: {s}"))),
                },
            }
        } else {
            match s.rsplit_once(':') {
                Some((host, port)) if !host.contains(':') => (host, Some(port)),
                _ => (s, None),
            }
        };

        if host.is_empty() {
            return Err(NodeError::Config(format!("address has no host: {s}")));
        }

        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .map_err(|e| NodeError::Config(format!("invalid port in {s}: {e}")))?,
            None => DEFAULT_PORT,
        };

        Ok(Address::new(host, port))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A remote node's address plus its connection configuration
///
/// Immutable once built; shared between the node, its lifecycle manager and
/// every connection factory.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    address: Address,
    options: NodeOptions,
}

impl Endpoint {
    pub fn new(address: Address, options: NodeOptions) -> Self {
        Self { address, options }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    /// Pool parameters derived from the options, with defaults filled in
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(self.options.pool_size(), self.options.pool_timeout())
    }
}
