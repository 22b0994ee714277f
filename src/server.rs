//! WebSocket server over TCP
//!
//! # Example
//!
//! ```ignore
//! use sockudo_relay::{Config, Endpoint, ListenerRegistry, WebSocketServer};
//!
//! let registry = ListenerRegistry::new();
//! let server = WebSocketServer::bind(&registry, 8080, Config::default())?;
//!
//! server.serve(|mut ws| {
//!     while let Ok(message) = ws.receive_message(None) {
//!         if ws.send_message(message.as_bytes()).is_err() {
//!             break;
//!         }
//!     }
//! })?;
//! ```

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread;

use crate::Config;
use crate::error::Result;
use crate::stream::{Endpoint, WebSocketStream};
use crate::tcp::{self, ListenerRegistry, TcpEndpoint};

/// Body sent to clients that fail the upgrade
const REJECTION_BODY: &str = "This is a WebSocket server.";

/// WebSocket server
#[derive(Debug, Clone)]
pub struct WebSocketServer {
    listener: Arc<TcpListener>,
    config: Config,
}

impl WebSocketServer {
    /// Serve on `port`, sharing the listener through `registry`
    pub fn bind(registry: &ListenerRegistry, port: u16, config: Config) -> Result<Self> {
        Ok(Self {
            listener: registry.listen(port)?,
            config,
        })
    }

    /// Serve on an existing listener
    pub fn from_listener(listener: Arc<TcpListener>, config: Config) -> Self {
        Self { listener, config }
    }

    /// Local address of the listener
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Accept one connection and run the server handshake
    ///
    /// Only a failed TCP accept is an error; a failed handshake yields an
    /// invalid stream that can still be [rejected](WebSocketStream::reject).
    pub fn accept(&self) -> Result<WebSocketStream<TcpEndpoint>> {
        let tcp = tcp::accept(&self.listener)?;
        Ok(WebSocketStream::accept(tcp, self.config.clone()))
    }

    /// Accept connections forever, one thread per connection
    ///
    /// The handshake runs on the connection's thread, so a slow client never
    /// holds up the accept loop. Clients that fail the handshake get a 400
    /// response. Returns only when accepting fails.
    pub fn serve<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(WebSocketStream<TcpEndpoint>) + Clone + Send + 'static,
    {
        loop {
            let tcp = tcp::accept(&self.listener)?;
            let config = self.config.clone();
            let handler = handler.clone();

            thread::spawn(move || {
                let mut ws = WebSocketStream::accept(tcp, config);
                if !ws.is_valid() {
                    if let Err(e) = ws.reject(400, "Bad Request", REJECTION_BODY) {
                        tracing::debug!(error = %e, "failed to send rejection");
                    }
                    return;
                }
                handler(ws);
            });
        }
    }
}
