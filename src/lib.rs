//! # Sockudo-Relay: blocking stream endpoints with WebSocket framing
//!
//! A small toolkit for shuttling bytes between heterogeneous endpoints: TCP
//! sockets, stdio, child processes, encrypted wrappers and WebSocket
//! connections all speak the same [`Endpoint`] interface, so a single relay
//! loop can join any two of them.
//!
//! ## Features
//!
//! - **Uniform endpoints**: raw reads/writes, timed readiness checks,
//!   delimiter-driven token reads and formatted sends on every channel
//! - **Multiplexing**: [`select`] waits on many endpoints at once, honouring
//!   bytes that are already buffered in user space
//! - **Relays**: [`dump`] and [`cat`] move data one way or both ways until an
//!   end closes
//! - **WebSocket framing**: RFC 6455 handshake and text framing over any
//!   endpoint, with fragmentation on both sides
//!
//! ## Example
//!
//! ```ignore
//! use sockudo_relay::{Config, WebSocketClient, relay, stream};
//!
//! let client = WebSocketClient::new(Config::default());
//! let mut ws = client.connect("127.0.0.1:8080", "/", None)?;
//! let mut io = stream::stdio()?;
//! relay::cat_pair(&mut io, &mut ws, b"\n", None);
//! ```

pub mod client;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod multiplex;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod stream;
pub mod tcp;
pub mod transport;

use std::time::Duration;

pub use client::WebSocketClient;
pub use error::{Error, Result};
pub use frame::{Frame, OpCode};
pub use handshake::Handshake;
pub use multiplex::{select, select_first};
pub use protocol::{Message, Role};
pub use relay::{Route, cat, cat_pair, cat_raw, dump};
pub use server::WebSocketServer;
pub use stream::{
    Cipher, CipherStream, Endpoint, ProcessStream, Stream, WebSocketStream, timeout_from_secs,
};
pub use tcp::{ListenerRegistry, TcpEndpoint};
pub use transport::{Pipe, Transport};

/// Maximum WebSocket frame header size (2 + 8 + 4 = 14 bytes)
pub const MAX_FRAME_HEADER_SIZE: usize = 14;

/// Largest payload that fits the 7-bit length field
pub const SMALL_MESSAGE_THRESHOLD: usize = 125;

/// Largest payload that fits the 16-bit extended length field
pub const MEDIUM_MESSAGE_THRESHOLD: usize = 65535;

/// WebSocket GUID for handshake
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Maximum size of an HTTP handshake head (8KB)
pub const MAX_HEADER_SIZE: usize = 8192;

/// Default read size for raw relays
pub const DEFAULT_BLOCK_SIZE: usize = 8192;

/// Delimiters for line-oriented relays
pub const LINE_DELIMITERS: &[u8] = b"\n";

/// Subprotocol sent and assumed when nobody names one
pub const DEFAULT_PROTOCOL: &str = "sockudo";

/// Configuration for endpoints and WebSocket connections
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use sockudo_relay::Config;
///
/// let config = Config::builder()
///     .max_message_size(1024 * 1024)
///     .max_frame_size(64 * 1024)
///     .handshake_timeout(Some(Duration::from_secs(5)))
///     .protocol("chat")
///     .build();
/// assert_eq!(config.protocol, "chat");
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum reassembled message size accepted from a peer (default: 64MB)
    pub max_message_size: usize,
    /// Maximum frame size accepted from a peer, and the fragment size used
    /// when sending (default: 16MB)
    pub max_frame_size: usize,
    /// Time allowed for the whole handshake head (default: 10s, `None`
    /// waits forever)
    pub handshake_timeout: Option<Duration>,
    /// Fail the client handshake on a wrong `Sec-WebSocket-Accept`
    /// (default: false, a mismatch is only logged)
    pub strict_accept: bool,
    /// Subprotocol requested by clients and assumed by servers when the peer
    /// names none (default: `"sockudo"`)
    pub protocol: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024 * 1024,
            max_frame_size: 16 * 1024 * 1024,
            handshake_timeout: Some(Duration::from_secs(10)),
            strict_accept: false,
            protocol: DEFAULT_PROTOCOL.to_string(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for [`Config`]
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set both the message and the frame size limit
    pub fn max_payload_length(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self.config.max_frame_size = size;
        self
    }

    /// Set maximum message size
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the handshake timeout
    pub fn handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Reject handshakes whose accept key does not match
    pub fn strict_accept(mut self, enabled: bool) -> Self {
        self.config.strict_accept = enabled;
        self
    }

    /// Set the default subprotocol name
    pub fn protocol(mut self, name: impl Into<String>) -> Self {
        self.config.protocol = name.into();
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::Config;
    pub use crate::error::{Error, Result};
    pub use crate::protocol::{Message, Role};
    pub use crate::relay::{Route, cat, cat_pair, dump};
    pub use crate::stream::{Endpoint, Stream, WebSocketStream, timeout_from_secs};
    pub use crate::{select, select_first};
}
