//! Raw byte transports underneath every endpoint
//!
//! A [`Transport`] is a blocking `Read + Write` handle whose descriptors can be
//! polled. [`Stream`](crate::stream::Stream) owns one and turns it into an
//! [`Endpoint`](crate::stream::Endpoint).
//!
//! # Example
//!
//! ```ignore
//! use std::os::unix::net::UnixStream;
//! use sockudo_relay::{Endpoint, Stream};
//!
//! let (a, _b) = UnixStream::pair()?;
//! let mut endpoint = Stream::new(a);
//! endpoint.send_str("hello\n")?;
//! ```

use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::process::{ChildStdin, ChildStdout};

/// Blocking byte handle with pollable descriptors
pub trait Transport: Read + Write {
    /// Descriptor that becomes readable when input arrives
    fn read_fd(&self) -> BorrowedFd<'_>;

    /// Descriptor that becomes writable when output can be accepted
    ///
    /// Same as [`read_fd`](Transport::read_fd) for full-duplex handles.
    fn write_fd(&self) -> BorrowedFd<'_> {
        self.read_fd()
    }

    /// Tell the peer no more data is coming
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn ignore_not_connected(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}

impl Transport for TcpStream {
    fn read_fd(&self) -> BorrowedFd<'_> {
        self.as_fd()
    }

    fn shutdown(&mut self) -> io::Result<()> {
        ignore_not_connected(TcpStream::shutdown(self, Shutdown::Both))
    }
}

impl Transport for UnixStream {
    fn read_fd(&self) -> BorrowedFd<'_> {
        self.as_fd()
    }

    fn shutdown(&mut self) -> io::Result<()> {
        ignore_not_connected(UnixStream::shutdown(self, Shutdown::Both))
    }
}

impl Transport for File {
    fn read_fd(&self) -> BorrowedFd<'_> {
        self.as_fd()
    }
}

/// Two one-way handles joined into a duplex transport
///
/// Reads come from `reader`, writes go to `writer`. Used for stdio and for
/// the pipes of a child process.
#[derive(Debug)]
pub struct Pipe<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> Pipe<R, W> {
    /// Join a read half and a write half
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Split back into halves
    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R: Read, W> Read for Pipe<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl<R, W: Write> Write for Pipe<R, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl<R: Read + AsFd, W: Write + AsFd> Transport for Pipe<R, W> {
    fn read_fd(&self) -> BorrowedFd<'_> {
        self.reader.as_fd()
    }

    fn write_fd(&self) -> BorrowedFd<'_> {
        self.writer.as_fd()
    }
}

/// Transport over a child's stdout (read) and stdin (write)
pub type ChildPipe = Pipe<ChildStdout, ChildStdin>;

/// Duplicate the process's stdin and stdout into an owned pipe
///
/// The duplicates close independently of the real standard handles.
pub fn stdio_pipe() -> io::Result<Pipe<File, File>> {
    let reader = io::stdin().as_fd().try_clone_to_owned()?;
    let writer = io::stdout().as_fd().try_clone_to_owned()?;
    Ok(Pipe::new(File::from(reader), File::from(writer)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_routes_halves() {
        let (a_read, mut a_peer) = UnixStream::pair().unwrap();
        let (b_write, mut b_peer) = UnixStream::pair().unwrap();
        let mut pipe = Pipe::new(a_read, b_write);

        a_peer.write_all(b"in").unwrap();
        let mut buf = [0u8; 2];
        pipe.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"in");

        pipe.write_all(b"out").unwrap();
        let mut buf = [0u8; 3];
        b_peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"out");

        use std::os::fd::AsRawFd;
        let (r, w) = (pipe.read_fd().as_raw_fd(), pipe.write_fd().as_raw_fd());
        assert_ne!(r, w);
    }

    #[test]
    fn test_unix_shutdown_signals_eof() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        Transport::shutdown(&mut a).unwrap();
        // Second shutdown on an already shut socket is harmless
        let _ = Transport::shutdown(&mut a);

        let mut out = Vec::new();
        b.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
