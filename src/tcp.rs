//! TCP endpoints and listener sharing
//!
//! Outgoing connections have Nagle disabled. Listening sockets are created
//! through socket2 with `SO_REUSEADDR`, and a [`ListenerRegistry`] lets
//! several servers in one process share the listener bound to a port.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Error, Result};
use crate::stream::Stream;

/// Endpoint over a TCP connection
pub type TcpEndpoint = Stream<TcpStream>;

/// Listen backlog for new sockets
const BACKLOG: i32 = 128;

/// Connect to `addr` and wrap the connection as an endpoint
pub fn connect(addr: impl ToSocketAddrs) -> Result<TcpEndpoint> {
    let stream = TcpStream::connect(addr).map_err(|e| {
        tracing::error!(error = %e, "connect failed");
        Error::from(e)
    })?;
    stream.set_nodelay(true)?;
    if let Ok(peer) = stream.peer_addr() {
        tracing::debug!(%peer, "connected");
    }
    Ok(Stream::new(stream))
}

/// Bind a listening socket on `addr` with address reuse enabled
pub fn listen_on(addr: SocketAddr) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;
    Ok(socket.into())
}

/// Bind a listening socket on every interface at `port`
pub fn listen(port: u16) -> Result<TcpListener> {
    listen_on(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
}

/// Accept one connection and wrap it as an endpoint
pub fn accept(listener: &TcpListener) -> Result<TcpEndpoint> {
    let (stream, peer) = listener.accept().map_err(|e| {
        tracing::error!(error = %e, "accept failed");
        Error::from(e)
    })?;
    stream.set_nodelay(true)?;
    tracing::debug!(%peer, "accepted connection");
    Ok(Stream::new(stream))
}

/// Listening sockets shared by port
///
/// The first `listen` on a port binds it; later calls get the same socket.
/// Port 0 always binds a fresh ephemeral port, registered under the port the
/// OS picked.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<u16, Arc<TcpListener>>>,
}

impl ListenerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the listener for `port`, binding it on first use
    pub fn listen(&self, port: u16) -> Result<Arc<TcpListener>> {
        let mut listeners = self.listeners.lock();
        if port != 0 {
            if let Some(listener) = listeners.get(&port) {
                return Ok(Arc::clone(listener));
            }
        }

        let listener = Arc::new(listen(port)?);
        let bound = listener.local_addr()?.port();
        tracing::debug!(port = bound, "listening");
        listeners.insert(bound, Arc::clone(&listener));
        Ok(listener)
    }

    /// Forget the listener for `port`
    ///
    /// The socket closes once every holder has dropped it.
    pub fn release(&self, port: u16) -> bool {
        self.listeners.lock().remove(&port).is_some()
    }

    /// Forget every listener
    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    /// Number of registered ports
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Whether no port is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
