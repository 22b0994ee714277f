//! WebSocket client over TCP
//!
//! # Example
//!
//! ```ignore
//! use sockudo_relay::{Config, Endpoint, WebSocketClient};
//!
//! let client = WebSocketClient::new(Config::default());
//! let mut ws = client.connect("127.0.0.1:8080", "/chat", Some("chat"))?;
//! ws.send_str("hello")?;
//! ```

use crate::Config;
use crate::error::{Error, Result};
use crate::stream::{Endpoint, WebSocketStream};
use crate::tcp::{self, TcpEndpoint};

/// WebSocket client
#[derive(Debug, Clone, Default)]
pub struct WebSocketClient {
    config: Config,
}

impl WebSocketClient {
    /// Create a new client with the given configuration
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Connect to `addr` (`host:port`) and upgrade to WebSocket at `path`
    ///
    /// The host part of `addr` is sent as the Host header.
    pub fn connect(
        &self,
        addr: &str,
        path: &str,
        protocol: Option<&str>,
    ) -> Result<WebSocketStream<TcpEndpoint>> {
        let tcp = tcp::connect(addr)?;
        let host = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
        self.upgrade(tcp, host, path, protocol)
    }

    /// Upgrade an already connected endpoint
    pub fn upgrade<E: Endpoint>(
        &self,
        inner: E,
        host: &str,
        path: &str,
        protocol: Option<&str>,
    ) -> Result<WebSocketStream<E>> {
        let mut ws = WebSocketStream::connect(inner, host, path, protocol, self.config.clone());
        if let Some(e) = ws.take_handshake_error() {
            return Err(e);
        }
        if !ws.is_valid() {
            return Err(Error::HandshakeFailed("connection lost during handshake"));
        }
        Ok(ws)
    }
}
