//! Blocking stream endpoints
//!
//! This module provides the [`Endpoint`] trait, the one interface every byte
//! channel in this crate speaks, and its implementations:
//!
//! - [`Stream<T>`] - owns a raw [`Transport`](crate::transport::Transport)
//!   (TCP, Unix socket, pipe pair, stdio)
//! - [`ProcessStream`] - the stdin/stdout of a child process
//! - [`CipherStream`] - encrypts on write, decrypts on read, over any endpoint
//! - [`WebSocketStream`] - WebSocket framing over any endpoint
//!
//! Wrapping endpoints hold their inner endpoint rather than extending it, so
//! any of them can be stacked.
//!
//! # Timeouts
//!
//! Every blocking readiness check takes an `Option<Duration>`: `None` waits
//! indefinitely, `Some(Duration::ZERO)` polls, anything else is a ceiling.
//! [`timeout_from_secs`] converts the classic seconds convention.
//!
//! # Failure
//!
//! Nothing here panics on peer behaviour. A transport error or EOF makes the
//! endpoint permanently invalid; afterwards every operation fails with
//! [`Error::ConnectionClosed`].

mod cipher;
mod process;
mod transport_stream;
mod websocket;

use std::borrow::Cow;
use std::fmt;
use std::io;
use std::os::fd::BorrowedFd;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::multiplex::{poll_readable, poll_writable};

pub use cipher::{Cipher, CipherStream};
pub use process::ProcessStream;
pub use transport_stream::{StdioStream, Stream, stdio};
pub use websocket::WebSocketStream;

/// The capability set shared by every byte channel
///
/// Only `is_valid`, `close`, `read_raw`, `write_raw` and the descriptor
/// accessors are required; readiness checks, token reads and formatted sends
/// are derived from them.
pub trait Endpoint {
    /// True iff the handle is open and no error or EOF has been observed
    fn is_valid(&mut self) -> bool;

    /// Flush, release the handle and become invalid. Idempotent.
    fn close(&mut self);

    /// Read at most `buf.len()` bytes
    ///
    /// `Ok(0)` for a non-empty `buf` means the peer closed; the endpoint is
    /// invalid afterwards.
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write at most `buf.len()` bytes
    fn write_raw(&mut self, buf: &[u8]) -> Result<usize>;

    /// Descriptor polled for read readiness, `None` once closed
    fn read_fd(&self) -> Option<BorrowedFd<'_>>;

    /// Descriptor polled for write readiness, `None` once closed
    fn write_fd(&self) -> Option<BorrowedFd<'_>>;

    /// Bytes already read from the handle but not yet handed to the caller
    fn buffered(&self) -> usize {
        0
    }

    /// Test whether a read would not block, waiting at most `timeout`
    ///
    /// Returns false on timeout and on error alike.
    fn can_read(&mut self, timeout: Option<Duration>) -> bool {
        if !self.is_valid() {
            return false;
        }
        if self.buffered() > 0 {
            return true;
        }
        match self.read_fd() {
            Some(fd) => poll_readable(fd, timeout),
            None => false,
        }
    }

    /// Test whether a write would not block, waiting at most `timeout`
    fn can_write(&mut self, timeout: Option<Duration>) -> bool {
        if !self.is_valid() {
            return false;
        }
        match self.write_fd() {
            Some(fd) => poll_writable(fd, timeout),
            None => false,
        }
    }

    /// Fill `buf` completely
    fn read_exact_raw(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_raw(&mut buf[filled..])? {
                0 => return Err(Error::ConnectionClosed),
                n => filled += n,
            }
        }
        Ok(())
    }

    /// Write all of `buf`
    fn write_all_raw(&mut self, buf: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < buf.len() {
            match self.write_raw(&buf[written..])? {
                0 => return Err(Error::ConnectionClosed),
                n => written += n,
            }
        }
        Ok(())
    }

    /// Read one token terminated by any byte in `delimiters`
    ///
    /// Waits up to `timeout` for the first byte, then reads byte by byte. The
    /// delimiter is kept when `inclusive` is true and dropped otherwise. At EOF
    /// an unterminated token is returned only if it is non-empty and
    /// `inclusive` is set.
    fn read_token(
        &mut self,
        delimiters: &[u8],
        timeout: Option<Duration>,
        inclusive: bool,
    ) -> Result<Vec<u8>> {
        if !self.is_valid() {
            return Err(Error::ConnectionClosed);
        }
        if !self.can_read(timeout) {
            return Err(if self.is_valid() {
                Error::Timeout
            } else {
                Error::ConnectionClosed
            });
        }

        let mut token = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if self.read_raw(&mut byte)? == 0 {
                return if inclusive && !token.is_empty() {
                    Ok(token)
                } else {
                    Err(Error::ConnectionClosed)
                };
            }
            if delimiters.contains(&byte[0]) {
                if inclusive {
                    token.push(byte[0]);
                }
                return Ok(token);
            }
            token.push(byte[0]);
        }
    }

    /// Read exactly `len` bytes, waiting up to `timeout` for the first one
    fn read_count(&mut self, len: usize, timeout: Option<Duration>) -> Result<Vec<u8>> {
        if !self.can_read(timeout) {
            return Err(if self.is_valid() {
                Error::Timeout
            } else {
                Error::ConnectionClosed
            });
        }
        let mut buf = vec![0u8; len];
        self.read_exact_raw(&mut buf)?;
        Ok(buf)
    }

    /// Render a formatted message and write it in full
    ///
    /// ```ignore
    /// endpoint.send(format_args!("{} {}\r\n", status, reason))?;
    /// ```
    fn send(&mut self, args: fmt::Arguments<'_>) -> Result<()> {
        let rendered = match args.as_str() {
            Some(s) => Cow::Borrowed(s),
            None => Cow::Owned(fmt::format(args)),
        };
        self.send_bytes(rendered.as_bytes())
    }

    /// Write a string in full
    fn send_str(&mut self, s: &str) -> Result<()> {
        self.send_bytes(s.as_bytes())
    }

    /// Write bytes in full
    fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.is_valid() {
            return Err(Error::ConnectionClosed);
        }
        self.write_all_raw(bytes)
    }
}

impl<E: Endpoint + ?Sized> Endpoint for Box<E> {
    fn is_valid(&mut self) -> bool {
        (**self).is_valid()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read_raw(buf)
    }

    fn write_raw(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write_raw(buf)
    }

    fn read_fd(&self) -> Option<BorrowedFd<'_>> {
        (**self).read_fd()
    }

    fn write_fd(&self) -> Option<BorrowedFd<'_>> {
        (**self).write_fd()
    }

    fn buffered(&self) -> usize {
        (**self).buffered()
    }

    fn can_read(&mut self, timeout: Option<Duration>) -> bool {
        (**self).can_read(timeout)
    }

    fn can_write(&mut self, timeout: Option<Duration>) -> bool {
        (**self).can_write(timeout)
    }

    fn read_token(
        &mut self,
        delimiters: &[u8],
        timeout: Option<Duration>,
        inclusive: bool,
    ) -> Result<Vec<u8>> {
        (**self).read_token(delimiters, timeout, inclusive)
    }

    fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).send_bytes(bytes)
    }
}

/// Convert a timeout in seconds to the `Option<Duration>` convention
///
/// Negative (or NaN) waits forever, zero polls, positive values may be
/// fractional. Values too large for a `Duration` also wait forever.
pub fn timeout_from_secs(secs: f64) -> Option<Duration> {
    if secs.is_nan() || secs < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

/// Blocking [`io::Read`] view of an endpoint
///
/// Lets frame decoding run straight off any endpoint.
pub struct EndpointReader<'a, E: ?Sized> {
    endpoint: &'a mut E,
}

impl<'a, E: Endpoint + ?Sized> EndpointReader<'a, E> {
    /// Wrap an endpoint
    pub fn new(endpoint: &'a mut E) -> Self {
        Self { endpoint }
    }
}

impl<E: Endpoint + ?Sized> io::Read for EndpointReader<'_, E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.endpoint.read_raw(buf).map_err(io::Error::from)
    }
}
