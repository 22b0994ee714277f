//! Endpoint over a raw transport
//!
//! `Stream<T>` is the bottom of every endpoint stack: it owns a
//! [`Transport`] and forgets it on the first EOF or error.

use std::fs::File;
use std::io;
use std::os::fd::BorrowedFd;

use super::Endpoint;
use crate::error::{Error, Result};
use crate::transport::{Pipe, Transport, stdio_pipe};

/// Endpoint over the process's own stdin and stdout
pub type StdioStream = Stream<Pipe<File, File>>;

/// Open the process's stdin/stdout as an endpoint
pub fn stdio() -> Result<StdioStream> {
    Ok(Stream::new(stdio_pipe()?))
}

/// Endpoint owning a raw transport
///
/// The transport is dropped as soon as the stream becomes invalid, so the
/// descriptor is released at the moment the failure is observed.
#[derive(Debug)]
pub struct Stream<T: Transport> {
    inner: Option<T>,
}

impl<T: Transport> Stream<T> {
    /// Wrap an open transport
    pub fn new(transport: T) -> Self {
        Self {
            inner: Some(transport),
        }
    }

    /// Get a reference to the transport, if still open
    pub fn get_ref(&self) -> Option<&T> {
        self.inner.as_ref()
    }

    /// Get a mutable reference to the transport, if still open
    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.inner.as_mut()
    }

    /// Take the transport out without shutting it down
    pub fn into_inner(mut self) -> Option<T> {
        self.inner.take()
    }
}

impl<T: Transport> From<T> for Stream<T> {
    fn from(transport: T) -> Self {
        Stream::new(transport)
    }
}

impl<T: Transport> Endpoint for Stream<T> {
    fn is_valid(&mut self) -> bool {
        self.inner.is_some()
    }

    fn close(&mut self) {
        let Some(mut transport) = self.inner.take() else {
            return;
        };
        if let Err(e) = transport.flush() {
            tracing::debug!(error = %e, "flush on close failed");
        }
        if let Err(e) = transport.shutdown() {
            tracing::debug!(error = %e, "shutdown on close failed");
        }
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(transport) = self.inner.as_mut() else {
            return Err(Error::ConnectionClosed);
        };
        if buf.is_empty() {
            return Ok(0);
        }

        let result = loop {
            match transport.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match result {
            Ok(0) => {
                tracing::debug!("peer closed the stream");
                self.close();
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                tracing::error!(error = %e, "read failed");
                self.close();
                Err(e.into())
            }
        }
    }

    fn write_raw(&mut self, buf: &[u8]) -> Result<usize> {
        let Some(transport) = self.inner.as_mut() else {
            return Err(Error::ConnectionClosed);
        };
        if buf.is_empty() {
            return Ok(0);
        }

        let result = loop {
            match transport.write(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match result {
            Ok(0) => {
                tracing::debug!("stream accepted no bytes");
                self.close();
                Err(Error::ConnectionClosed)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                tracing::error!(error = %e, "write failed");
                self.close();
                Err(e.into())
            }
        }
    }

    fn read_fd(&self) -> Option<BorrowedFd<'_>> {
        self.inner.as_ref().map(|t| t.read_fd())
    }

    fn write_fd(&self) -> Option<BorrowedFd<'_>> {
        self.inner.as_ref().map(|t| t.write_fd())
    }
}

impl<T: Transport> Drop for Stream<T> {
    fn drop(&mut self) {
        self.close();
    }
}
