//! WebSocket stream implementation
//!
//! This module provides the `WebSocketStream` type, an [`Endpoint`] that
//! speaks RFC 6455 text framing over another endpoint.
//!
//! Reads are served from the current message: raw and token reads drain it,
//! and only when it is empty is the next message pulled off the wire. Each
//! raw write or send goes out as exactly one message.

use std::os::fd::BorrowedFd;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};

use super::{Endpoint, EndpointReader};
use crate::Config;
use crate::error::{Error, Result};
use crate::handshake::{Handshake, build_rejection, client_handshake, server_handshake};
use crate::protocol::{Message, Protocol, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    /// Handshake done, frames flowing
    Open,
    /// Handshake failed; the transport is still open for an error response
    Rejected,
    /// Connection closed
    Closed,
}

/// A WebSocket connection over any endpoint
///
/// # Example
///
/// ```ignore
/// use sockudo_relay::{Config, Endpoint, WebSocketStream, tcp};
///
/// let tcp = tcp::connect("127.0.0.1:8080")?;
/// let mut ws = WebSocketStream::connect(tcp, "127.0.0.1", "/", None, Config::default());
/// ws.send_str("ping")?;
/// let reply = ws.receive_message(None)?;
/// ```
pub struct WebSocketStream<E: Endpoint> {
    inner: E,
    protocol: Protocol,
    state: StreamState,
    /// Unread remainder of the current message
    message: Bytes,
    write_buf: BytesMut,
    handshake: Option<Handshake>,
    handshake_error: Option<Error>,
    config: Config,
}

impl<E: Endpoint> WebSocketStream<E> {
    /// Create a new WebSocket stream from an already-upgraded connection
    pub fn from_raw(inner: E, role: Role, config: Config) -> Self {
        let protocol = Protocol::new(role, config.max_frame_size, config.max_message_size);

        Self {
            inner,
            protocol,
            state: StreamState::Open,
            message: Bytes::new(),
            write_buf: BytesMut::new(),
            handshake: None,
            handshake_error: None,
            config,
        }
    }

    /// Run the server handshake on a freshly accepted transport
    ///
    /// On failure the stream is invalid but the transport stays open, so a
    /// response can still be sent with [`reject`](Self::reject).
    pub fn accept(inner: E, config: Config) -> Self {
        let mut ws = Self::from_raw(inner, Role::Server, config);
        match server_handshake(&mut ws.inner, &ws.config) {
            Ok(handshake) => ws.handshake = Some(handshake),
            Err(e) => {
                tracing::warn!(error = %e, "server handshake failed");
                ws.state = StreamState::Rejected;
                ws.handshake_error = Some(e);
            }
        }
        ws
    }

    /// Run the client handshake over a connected transport
    ///
    /// `host` goes into the Host header; `protocol` falls back to
    /// [`Config::protocol`]. On failure the stream is invalid.
    pub fn connect(
        inner: E,
        host: &str,
        path: &str,
        protocol: Option<&str>,
        config: Config,
    ) -> Self {
        let mut ws = Self::from_raw(inner, Role::Client, config);
        match client_handshake(&mut ws.inner, host, path, protocol, &ws.config) {
            Ok(handshake) => ws.handshake = Some(handshake),
            Err(e) => {
                tracing::warn!(error = %e, "client handshake failed");
                ws.state = StreamState::Rejected;
                ws.handshake_error = Some(e);
            }
        }
        ws
    }

    /// Endpoint role
    pub fn role(&self) -> Role {
        self.protocol.role()
    }

    /// Handshake outcome, if the handshake succeeded
    pub fn handshake(&self) -> Option<&Handshake> {
        self.handshake.as_ref()
    }

    /// Take the error that failed the handshake
    pub fn take_handshake_error(&mut self) -> Option<Error> {
        self.handshake_error.take()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a reference to the inner endpoint
    pub fn get_ref(&self) -> &E {
        &self.inner
    }

    /// Get a mutable reference to the inner endpoint
    pub fn get_mut(&mut self) -> &mut E {
        &mut self.inner
    }

    /// Unwrap the inner endpoint, dropping any unread message bytes
    pub fn into_inner(self) -> E {
        self.inner
    }

    /// Answer a failed upgrade with a plain HTTP error and close
    pub fn reject(&mut self, status: u16, reason: &str, body: &str) -> Result<()> {
        let response = build_rejection(status, reason, body);
        let result = self.inner.send_bytes(&response);
        self.close();
        result
    }

    /// Receive the next complete message
    ///
    /// Unread bytes of the current message are returned first. Waits up to
    /// `timeout` for the first frame; once it starts arriving, the rest of the
    /// message is read without a deadline.
    pub fn receive_message(&mut self, timeout: Option<Duration>) -> Result<Message> {
        if !self.is_valid() {
            return Err(Error::ConnectionClosed);
        }
        if !self.message.is_empty() {
            return Ok(Message::new(std::mem::take(&mut self.message)));
        }
        if !self.inner.can_read(timeout) {
            return Err(if self.is_valid() {
                Error::Timeout
            } else {
                Error::ConnectionClosed
            });
        }
        self.next_message()
    }

    /// Send `payload` as one text message, fragmented past the frame size
    pub fn send_message(&mut self, payload: &[u8]) -> Result<()> {
        if !self.is_valid() {
            return Err(Error::ConnectionClosed);
        }

        self.write_buf.clear();
        self.protocol.encode_message(&mut self.write_buf, payload);
        let result = self.inner.write_all_raw(&self.write_buf);
        self.write_buf.clear();

        if let Err(e) = result {
            tracing::error!(error = %e, len = payload.len(), "failed to send message");
            self.state = StreamState::Closed;
            return Err(e);
        }
        Ok(())
    }

    fn next_message(&mut self) -> Result<Message> {
        let mut reader = EndpointReader::new(&mut self.inner);
        match self.protocol.read_message(&mut reader) {
            Ok(message) => Ok(message),
            Err(e) => {
                if !e.is_closed() {
                    tracing::error!(error = %e, "failed to read message");
                }
                // No resynchronisation after a bad frame
                self.state = StreamState::Closed;
                self.message.clear();
                self.inner.close();
                Err(e)
            }
        }
    }
}

impl<E: Endpoint> Endpoint for WebSocketStream<E> {
    fn is_valid(&mut self) -> bool {
        if self.state == StreamState::Open && !self.inner.is_valid() {
            self.state = StreamState::Closed;
            self.message.clear();
        }
        self.state == StreamState::Open
    }

    fn close(&mut self) {
        self.state = StreamState::Closed;
        self.message.clear();
        self.inner.close();
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.is_valid() {
            return Err(Error::ConnectionClosed);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        while self.message.is_empty() {
            match self.next_message() {
                Ok(message) => self.message = message.into_bytes(),
                Err(e) if e.is_closed() => return Ok(0),
                Err(e) => return Err(e),
            }
        }

        let n = buf.len().min(self.message.len());
        buf[..n].copy_from_slice(&self.message[..n]);
        self.message.advance(n);
        Ok(n)
    }

    fn write_raw(&mut self, buf: &[u8]) -> Result<usize> {
        self.send_message(buf)?;
        Ok(buf.len())
    }

    fn read_fd(&self) -> Option<BorrowedFd<'_>> {
        self.inner.read_fd()
    }

    fn write_fd(&self) -> Option<BorrowedFd<'_>> {
        self.inner.write_fd()
    }

    fn buffered(&self) -> usize {
        self.message.len() + self.inner.buffered()
    }

    fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.send_message(bytes)
    }
}

impl<E: Endpoint> std::fmt::Debug for WebSocketStream<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketStream")
            .field("role", &self.protocol.role())
            .field("state", &self.state)
            .field("buffered", &self.message.len())
            .field("handshake", &self.handshake)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{OpCode, encode_frame, read_frame};
    use crate::handshake::{build_response, client_handshake_with_key};
    use crate::stream::Stream;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::thread;

    const RFC_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
    const RFC_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

    fn open_pair() -> (WebSocketStream<Stream<UnixStream>>, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        (
            WebSocketStream::from_raw(Stream::new(a), Role::Server, Config::default()),
            b,
        )
    }

    fn read_head(peer: &mut UnixStream) -> String {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            peer.read_exact(&mut byte).unwrap();
            head.push(byte[0]);
        }
        String::from_utf8(head).unwrap()
    }

    #[test]
    fn test_echo_server() {
        let (server_side, client_side) = UnixStream::pair().unwrap();

        let server = thread::spawn(move || {
            let mut ws = WebSocketStream::accept(Stream::new(server_side), Config::default());
            assert!(ws.is_valid());
            let message = ws.receive_message(None).unwrap();
            ws.send_message(message.as_bytes()).unwrap();
        });

        let mut client = Stream::new(client_side);
        let handshake = client_handshake_with_key(
            &mut client,
            RFC_KEY,
            "localhost",
            "/",
            None,
            &Config::default(),
        )
        .unwrap();
        assert_eq!(handshake.accept, RFC_ACCEPT);

        let mut ws = WebSocketStream::from_raw(client, Role::Client, Config::default());
        ws.send_str("ping").unwrap();
        let reply = ws.receive_message(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(reply.as_text(), Some("ping"));

        server.join().unwrap();
    }

    #[test]
    fn test_connect_and_accept() {
        let (server_side, client_side) = UnixStream::pair().unwrap();

        let server = thread::spawn(move || {
            let config = Config::builder().protocol("chat").build();
            let mut ws = WebSocketStream::accept(Stream::new(server_side), config);
            let handshake = ws.handshake().cloned().unwrap();
            ws.send_str("hello\n").unwrap();
            handshake
        });

        let mut ws = WebSocketStream::connect(
            Stream::new(client_side),
            "localhost",
            "/chat",
            Some("chat"),
            Config::default(),
        );
        assert!(ws.is_valid());
        assert_eq!(ws.role(), Role::Client);
        assert_eq!(ws.handshake().unwrap().protocol, "chat");
        assert_eq!(ws.read_token(b"\n", None, false).unwrap(), b"hello");

        let server_handshake = server.join().unwrap();
        assert_eq!(server_handshake.path, "/chat");
        assert_eq!(server_handshake.accept, ws.handshake().unwrap().accept);
    }

    #[test]
    fn test_fragmented_receive() {
        let (mut ws, mut peer) = open_pair();

        let mut wire = BytesMut::new();
        encode_frame(&mut wire, OpCode::Text, b"ab", false, Some([1, 2, 3, 4]));
        encode_frame(&mut wire, OpCode::Continuation, b"cd", true, Some([5, 6, 7, 8]));
        peer.write_all(&wire).unwrap();

        let message = ws.receive_message(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(message.as_text(), Some("abcd"));
    }

    #[test]
    fn test_large_message_round_trip() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut sender = WebSocketStream::from_raw(Stream::new(a), Role::Client, Config::default());
        let mut receiver =
            WebSocketStream::from_raw(Stream::new(b), Role::Server, Config::default());

        let payload: Vec<u8> = (0..70_000u32).map(|i| b'a' + (i % 26) as u8).collect();
        let expected = payload.clone();
        let writer = thread::spawn(move || {
            sender.send_message(&payload).unwrap();
            sender
        });

        let message = receiver.receive_message(None).unwrap();
        let _sender = writer.join().unwrap();
        assert_eq!(message.len(), 70_000);
        assert_eq!(message.as_bytes(), &expected[..]);
    }

    #[test]
    fn test_token_reads_span_messages() {
        let (mut ws, mut peer) = open_pair();

        let mut wire = BytesMut::new();
        encode_frame(&mut wire, OpCode::Text, b"one two ", true, Some([9, 9, 9, 9]));
        encode_frame(&mut wire, OpCode::Text, b"th", true, Some([1, 1, 1, 1]));
        encode_frame(&mut wire, OpCode::Text, b"ree\n", true, Some([2, 2, 2, 2]));
        peer.write_all(&wire).unwrap();

        assert_eq!(ws.read_token(b" \n", None, false).unwrap(), b"one");
        assert_eq!(ws.buffered(), 4);
        assert_eq!(ws.read_token(b" \n", Some(Duration::ZERO), false).unwrap(), b"two");
        assert_eq!(ws.buffered(), 0);
        // "th" and "ree\n" arrive as separate messages but form one token
        assert_eq!(ws.read_token(b" \n", None, true).unwrap(), b"three\n");
    }

    #[test]
    fn test_buffered_remainder_returned_first() {
        let (mut ws, mut peer) = open_pair();

        let mut wire = BytesMut::new();
        encode_frame(&mut wire, OpCode::Text, b"key=value", true, Some([3, 1, 4, 1]));
        peer.write_all(&wire).unwrap();

        assert_eq!(ws.read_token(b"=", None, false).unwrap(), b"key");
        assert_eq!(ws.receive_message(Some(Duration::ZERO)).unwrap().as_bytes(), b"value");
    }

    #[test]
    fn test_server_sends_unmasked_text_frames() {
        let (mut ws, mut peer) = open_pair();
        ws.write_raw(b"pong").unwrap();

        let frame = read_frame(&mut peer, 1024).unwrap();
        assert_eq!(frame.header.opcode, OpCode::Text);
        assert!(frame.header.fin);
        assert!(!frame.header.masked);
        assert_eq!(&frame.payload[..], b"pong");
    }

    #[test]
    fn test_send_empty_message() {
        let (mut ws, mut peer) = open_pair();
        ws.send_str("").unwrap();

        let mut frame = [0u8; 2];
        peer.read_exact(&mut frame).unwrap();
        assert_eq!(frame, [0x81, 0x00]);
    }

    #[test]
    fn test_receive_timeout() {
        let (mut ws, _peer) = open_pair();
        let err = ws
            .receive_message(Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(ws.is_valid());
    }

    #[test]
    fn test_eof_is_idempotent() {
        let (mut ws, peer) = open_pair();
        drop(peer);

        let mut buf = [0u8; 4];
        assert_eq!(ws.read_raw(&mut buf).unwrap(), 0);
        assert!(!ws.is_valid());
        for _ in 0..3 {
            assert!(matches!(ws.read_raw(&mut buf), Err(Error::ConnectionClosed)));
            assert!(matches!(ws.write_raw(b"x"), Err(Error::ConnectionClosed)));
            assert!(ws.receive_message(Some(Duration::ZERO)).is_err());
            ws.close();
        }
    }

    #[test]
    fn test_malformed_frame_invalidates() {
        let (mut ws, mut peer) = open_pair();
        // Binary opcode is not spoken here
        peer.write_all(&[0x82, 0x00]).unwrap();

        assert!(matches!(
            ws.receive_message(None),
            Err(Error::Protocol(_))
        ));
        assert!(!ws.is_valid());
    }

    #[test]
    fn test_failed_accept_can_reject() {
        let (server_side, mut client_side) = UnixStream::pair().unwrap();
        client_side
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap();

        let mut ws = WebSocketStream::accept(Stream::new(server_side), Config::default());
        assert!(!ws.is_valid());
        assert!(ws.take_handshake_error().is_some());
        assert!(ws.handshake().is_none());

        ws.reject(400, "Bad Request", "This is a WebSocket server.")
            .unwrap();
        let mut response = String::new();
        client_side.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.ends_with("This is a WebSocket server."));
    }

    #[test]
    fn test_connect_fails_on_bad_status() {
        let (server_side, client_side) = UnixStream::pair().unwrap();

        let server = thread::spawn(move || {
            let mut peer = server_side;
            read_head(&mut peer);
            peer.write_all(b"HTTP/1.1 404 Not Found\r\n\r\n").unwrap();
            peer
        });

        let mut ws = WebSocketStream::connect(
            Stream::new(client_side),
            "localhost",
            "/",
            None,
            Config::default(),
        );
        let _peer = server.join().unwrap();
        assert!(!ws.is_valid());
        assert!(matches!(
            ws.take_handshake_error(),
            Some(Error::HandshakeFailed(_))
        ));
    }

    #[test]
    fn test_wrong_accept_still_connects() {
        let (server_side, client_side) = UnixStream::pair().unwrap();

        let server = thread::spawn(move || {
            let mut peer = server_side;
            read_head(&mut peer);
            peer.write_all(&build_response("d3Jvbmc=", "sockudo")).unwrap();
            peer
        });

        let mut ws = WebSocketStream::connect(
            Stream::new(client_side),
            "localhost",
            "/",
            None,
            Config::default(),
        );
        let _peer = server.join().unwrap();
        assert!(ws.is_valid());
    }
}
