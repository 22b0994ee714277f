//! Error types for endpoints and the WebSocket engine

use std::fmt;
use std::io;

/// Result type alias for endpoint and WebSocket operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
///
/// Every variant except [`Error::Timeout`] leaves the endpoint that produced it
/// invalid.
#[derive(Debug)]
pub enum Error {
    /// I/O error from the underlying handle
    Io(io::Error),
    /// Malformed WebSocket frame
    InvalidFrame(&'static str),
    /// Protocol violation
    Protocol(&'static str),
    /// Peer closed the connection, or the endpoint was already closed
    ConnectionClosed,
    /// Connection reset by peer
    ConnectionReset,
    /// Would block (non-blocking handle)
    WouldBlock,
    /// Readiness did not arrive within the requested timeout
    Timeout,
    /// Message too large
    MessageTooLarge,
    /// Frame too large
    FrameTooLarge,
    /// Invalid HTTP request or response head
    InvalidHttp(&'static str),
    /// Handshake failed
    HandshakeFailed(&'static str),
}

impl Error {
    /// Whether the operation merely ran out of time
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// Whether the error means the peer went away
    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed | Error::ConnectionReset)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::InvalidFrame(msg) => write!(f, "Invalid frame: {}", msg),
            Error::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::ConnectionReset => write!(f, "Connection reset by peer"),
            Error::WouldBlock => write!(f, "Would block"),
            Error::Timeout => write!(f, "Timed out"),
            Error::MessageTooLarge => write!(f, "Message too large"),
            Error::FrameTooLarge => write!(f, "Frame too large"),
            Error::InvalidHttp(msg) => write!(f, "Invalid HTTP: {}", msg),
            Error::HandshakeFailed(msg) => write!(f, "Handshake failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock => Error::WouldBlock,
            io::ErrorKind::TimedOut => Error::Timeout,
            io::ErrorKind::ConnectionReset => Error::ConnectionReset,
            io::ErrorKind::BrokenPipe => Error::ConnectionClosed,
            io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
            _ => Error::Io(e),
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            Error::WouldBlock => io::Error::new(io::ErrorKind::WouldBlock, "would block"),
            Error::Timeout => io::Error::new(io::ErrorKind::TimedOut, "timed out"),
            Error::ConnectionReset => {
                io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")
            }
            Error::ConnectionClosed => {
                io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed")
            }
            other => io::Error::other(other.to_string()),
        }
    }
}
