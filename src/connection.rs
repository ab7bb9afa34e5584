/*!
 * Connections to a remote node
 *
 * A [`Connector`] opens connections for an [`Endpoint`]; the lifecycle
 * manager only ever asks a [`Connection`] whether it is still usable and
 * tells it to disconnect.
 */

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::ConnectionError;

/// A live connection that can be pooled
pub trait Connection: Send + 'static {
    /// Close the connection; later calls are no-ops
    fn disconnect(&mut self) -> Result<(), ConnectionError>;

    /// Whether the connection can still carry requests
    fn is_connected(&self) -> bool;
}

/// Opens connections to an endpoint
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    fn connect(&self, endpoint: &Endpoint) -> Result<Self::Connection, ConnectionError>;
}

/// A plain TCP connection
#[derive(Debug)]
pub struct TcpConnection {
    stream: Option<TcpStream>,
    peer: SocketAddr,
    address: String,
}

impl TcpConnection {
    /// Connect to the first reachable address of `endpoint`
    ///
    /// Honors the `timeout` option for connecting, reading and writing, and
    /// the passthrough `tcp_nodelay` option (default `true`).
    pub fn open(endpoint: &Endpoint) -> Result<Self, ConnectionError> {
        let address = endpoint.address();
        let options = endpoint.options();
        let timeout = options.timeout();
        let nodelay = options
            .get("tcp_nodelay")
            .and_then(|value| value.as_bool())
            .unwrap_or(true);

        let mut last_error = None;
        for peer in address.resolve()? {
            match TcpStream::connect_timeout(&peer, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(nodelay)?;
                    stream.set_read_timeout(Some(timeout))?;
                    stream.set_write_timeout(Some(timeout))?;
                    debug!("Connected to {} ({})", address, peer);
                    return Ok(Self {
                        stream: Some(stream),
                        peer,
                        address: address.to_string(),
                    });
                }
                Err(e) => {
                    debug!("Connection attempt to {} failed: {}", peer, e);
                    last_error = Some(e);
                }
            }
        }

        Err(ConnectionError::Connect {
            address: address.to_string(),
            source: last_error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address to try")),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream.as_mut().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotConnected,
                format!("connection to {} is closed", self.address),
            )
        })
    }

    /// Run `op` on the stream, dropping the stream once it has failed
    fn io<R>(&mut self, op: impl FnOnce(&mut TcpStream) -> io::Result<R>) -> io::Result<R> {
        let result = op(self.stream()?);
        if let Err(e) = &result {
            if e.kind() != io::ErrorKind::Interrupted {
                self.close(e);
            }
        }
        result
    }

    fn close(&mut self, reason: &dyn std::fmt::Display) {
        if let Some(stream) = self.stream.take() {
            debug!("Closing connection to {} ({}): {}", self.address, self.peer, reason);
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Connection for TcpConnection {
    fn disconnect(&mut self) -> Result<(), ConnectionError> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };

        match stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Peer already closed its side
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(source) => Err(ConnectionError::Disconnect {
                address: self.address.clone(),
                source,
            }),
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

impl Read for TcpConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.io(|stream| stream.read(buf))?;
        if read == 0 && !buf.is_empty() {
            self.close(&"closed by peer");
        }
        Ok(read)
    }
}

impl Write for TcpConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.io(|stream| stream.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.io(|stream| stream.flush())
    }
}

/// Connector producing [`TcpConnection`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Connection = TcpConnection;

    fn connect(&self, endpoint: &Endpoint) -> Result<TcpConnection, ConnectionError> {
        TcpConnection::open(endpoint)
    }
}
