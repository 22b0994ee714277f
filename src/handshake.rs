//! WebSocket handshake implementation
//!
//! This module handles the HTTP upgrade handshake for WebSocket connections:
//! - Accept key derivation (SHA-1 + base64)
//! - Request/response building and parsing
//! - Blocking client and server exchanges over any [`Endpoint`]
//!
//! The head is read one byte at a time up to the blank line, so no byte that
//! belongs to the first frame is ever consumed by the handshake.

use std::time::Instant;

use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::mask::fill_random;
use crate::stream::Endpoint;
use crate::{Config, MAX_HEADER_SIZE, WS_GUID};

/// WebSocket handshake request (server-side)
#[derive(Debug)]
pub struct HandshakeRequest<'a> {
    /// The request path
    pub path: &'a str,
    /// The Host header
    pub host: Option<&'a str>,
    /// The Sec-WebSocket-Key header
    pub key: &'a str,
    /// The Sec-WebSocket-Version header
    pub version: Option<&'a str>,
    /// The Sec-WebSocket-Protocol header (optional)
    pub protocol: Option<&'a str>,
}

/// Parse a WebSocket upgrade request
///
/// Returns the parsed request and the number of bytes consumed, or `None` if
/// the head is not complete yet. Header names match case-insensitively. The
/// version header is recorded but not required.
pub fn parse_request(buf: &[u8]) -> Result<Option<(HandshakeRequest<'_>, usize)>> {
    if buf.len() > MAX_HEADER_SIZE {
        return Err(Error::InvalidHttp("request too large"));
    }

    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut headers);

    let len = match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(_) => return Err(Error::InvalidHttp("failed to parse HTTP request")),
    };

    if req.method != Some("GET") {
        return Err(Error::InvalidHttp("method must be GET"));
    }

    let mut key = None;
    let mut version = None;
    let mut host = None;
    let mut protocol = None;
    let mut upgrade = false;

    for header in req.headers.iter() {
        let value = std::str::from_utf8(header.value)
            .map_err(|_| Error::InvalidHttp("invalid header value"))?;

        match header.name.to_ascii_lowercase().as_str() {
            "sec-websocket-key" => key = Some(value.trim()),
            "sec-websocket-version" => version = Some(value.trim()),
            "sec-websocket-protocol" => protocol = Some(value.trim()),
            "host" => host = Some(value),
            "upgrade" => upgrade = value.to_ascii_lowercase().contains("websocket"),
            _ => {}
        }
    }

    if !upgrade {
        return Err(Error::HandshakeFailed("missing Upgrade: websocket"));
    }
    let key = key.ok_or(Error::HandshakeFailed("missing Sec-WebSocket-Key"))?;

    Ok(Some((
        HandshakeRequest {
            path: req.path.unwrap_or("/"),
            host,
            key,
            version,
            protocol,
        },
        len,
    )))
}

/// Generate the Sec-WebSocket-Accept key
///
/// This computes: Base64(SHA-1(key + GUID))
#[inline]
pub fn generate_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(hash)
}

fn put_header(buf: &mut BytesMut, name: &str, value: &str) {
    buf.put_slice(name.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value.as_bytes());
    buf.put_slice(b"\r\n");
}

/// Build a WebSocket upgrade response
pub fn build_response(accept_key: &str, protocol: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(256);

    buf.put_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    put_header(&mut buf, "Upgrade", "websocket");
    put_header(&mut buf, "Connection", "Upgrade");
    put_header(&mut buf, "Sec-WebSocket-Accept", accept_key);
    put_header(&mut buf, "Sec-WebSocket-Protocol", protocol);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Build a plain HTTP error response, used to turn away non-WebSocket clients
pub fn build_rejection(status: u16, reason: &str, body: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(128 + body.len());

    buf.put_slice(format!("HTTP/1.1 {} {}\r\n", status, reason).as_bytes());
    put_header(&mut buf, "Content-Type", "text/plain");
    put_header(&mut buf, "Content-Length", &body.len().to_string());
    put_header(&mut buf, "Connection", "close");
    buf.put_slice(b"\r\n");
    buf.put_slice(body.as_bytes());
    buf.freeze()
}

/// Build a WebSocket upgrade request (client-side)
pub fn build_request(host: &str, path: &str, key: &str, protocol: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(512);

    buf.put_slice(b"GET ");
    buf.put_slice(path.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");
    put_header(&mut buf, "Host", host);
    put_header(&mut buf, "Upgrade", "websocket");
    put_header(&mut buf, "Connection", "Upgrade");
    put_header(&mut buf, "Sec-WebSocket-Key", key);
    put_header(&mut buf, "Sec-WebSocket-Protocol", protocol);
    put_header(&mut buf, "Sec-WebSocket-Version", "13");
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Generate a random WebSocket key (client-side)
pub fn generate_key() -> String {
    let mut bytes = [0u8; 16];
    fill_random(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// WebSocket handshake response (client-side parsing)
#[derive(Debug)]
pub struct HandshakeResponse<'a> {
    /// HTTP status code
    pub status: u16,
    /// The Sec-WebSocket-Accept header
    pub accept: Option<&'a str>,
    /// The Sec-WebSocket-Protocol header
    pub protocol: Option<&'a str>,
}

/// Parse a WebSocket upgrade response (client-side)
pub fn parse_response(buf: &[u8]) -> Result<Option<(HandshakeResponse<'_>, usize)>> {
    if buf.len() > MAX_HEADER_SIZE {
        return Err(Error::InvalidHttp("response too large"));
    }

    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut res = httparse::Response::new(&mut headers);

    let len = match res.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(_) => return Err(Error::InvalidHttp("failed to parse HTTP response")),
    };

    let status = res.code.unwrap_or(0);
    if status != 101 {
        return Err(Error::HandshakeFailed("expected 101 Switching Protocols"));
    }

    let mut accept = None;
    let mut protocol = None;

    for header in res.headers.iter() {
        let value = std::str::from_utf8(header.value)
            .map_err(|_| Error::InvalidHttp("invalid header value"))?;

        match header.name.to_ascii_lowercase().as_str() {
            "sec-websocket-accept" => accept = Some(value.trim()),
            "sec-websocket-protocol" => protocol = Some(value.trim()),
            _ => {}
        }
    }

    Ok(Some((
        HandshakeResponse {
            status,
            accept,
            protocol,
        },
        len,
    )))
}

/// Validate the server's accept key (client-side)
pub fn validate_accept_key(sent_key: &str, received_accept: &str) -> bool {
    let expected = generate_accept_key(sent_key);
    expected == received_accept
}

/// Outcome of a completed handshake
///
/// Computed once per connection, before any frame is exchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// The request path
    pub path: String,
    /// Client key
    pub key: String,
    /// Accept value derived from the key
    pub accept: String,
    /// Negotiated subprotocol
    pub protocol: String,
}

/// Read an HTTP head through the terminating blank line
///
/// `handshake_timeout` bounds the whole head, not each byte or line.
pub fn read_head<E: Endpoint + ?Sized>(endpoint: &mut E, config: &Config) -> Result<Vec<u8>> {
    let deadline = config
        .handshake_timeout
        .map(|timeout| Instant::now().checked_add(timeout));
    let mut head = Vec::with_capacity(512);
    let mut line_start = 0;
    loop {
        let remaining = match deadline {
            Some(Some(at)) => Some(at.saturating_duration_since(Instant::now())),
            // Too far out to represent
            Some(None) | None => None,
        };
        let byte = endpoint.read_count(1, remaining)?;
        head.push(byte[0]);
        if head.len() > MAX_HEADER_SIZE {
            return Err(Error::InvalidHttp("head too large"));
        }
        if byte[0] == b'\n' {
            let line = &head[line_start..];
            if line == b"\r\n" || line == b"\n" {
                return Ok(head);
            }
            line_start = head.len();
        }
    }
}

/// Perform server-side handshake
///
/// Reads the upgrade request and answers with 101. On failure nothing is
/// written, so the caller may still send an error response.
pub fn server_handshake<E: Endpoint + ?Sized>(
    endpoint: &mut E,
    config: &Config,
) -> Result<Handshake> {
    let head = read_head(endpoint, config)?;
    let (req, _) = parse_request(&head)?.ok_or(Error::InvalidHttp("incomplete request head"))?;

    let accept = generate_accept_key(req.key);
    let protocol = req.protocol.unwrap_or(config.protocol.as_str()).to_string();

    tracing::debug!(path = req.path, protocol = %protocol, "accepting websocket upgrade");

    let handshake = Handshake {
        path: req.path.to_string(),
        key: req.key.to_string(),
        accept,
        protocol,
    };

    let response = build_response(&handshake.accept, &handshake.protocol);
    endpoint.send_bytes(&response)?;

    Ok(handshake)
}

/// Perform client-side handshake with a fresh random key
///
/// `protocol` falls back to the configured default.
pub fn client_handshake<E: Endpoint + ?Sized>(
    endpoint: &mut E,
    host: &str,
    path: &str,
    protocol: Option<&str>,
    config: &Config,
) -> Result<Handshake> {
    client_handshake_with_key(endpoint, &generate_key(), host, path, protocol, config)
}

/// Perform client-side handshake with a caller-chosen key
///
/// A wrong accept value is logged and tolerated unless
/// [`Config::strict_accept`] is set; a missing one always fails.
pub fn client_handshake_with_key<E: Endpoint + ?Sized>(
    endpoint: &mut E,
    key: &str,
    host: &str,
    path: &str,
    protocol: Option<&str>,
    config: &Config,
) -> Result<Handshake> {
    let requested = protocol.unwrap_or(config.protocol.as_str());
    let request = build_request(host, path, key, requested);
    endpoint.send_bytes(&request)?;

    let head = read_head(endpoint, config)?;
    let (res, _) =
        parse_response(&head)?.ok_or(Error::InvalidHttp("incomplete response head"))?;

    let accept = res
        .accept
        .ok_or(Error::HandshakeFailed("missing Sec-WebSocket-Accept"))?;
    if !validate_accept_key(key, accept) {
        if config.strict_accept {
            return Err(Error::HandshakeFailed("invalid Sec-WebSocket-Accept"));
        }
        tracing::warn!(
            expected = %generate_accept_key(key),
            received = accept,
            "Sec-WebSocket-Accept mismatch"
        );
    }

    Ok(Handshake {
        path: path.to_string(),
        key: key.to_string(),
        accept: accept.to_string(),
        protocol: res.protocol.unwrap_or(requested).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Stream;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::thread;
    use std::time::Duration;
    use tracing_test::traced_test;

    const RFC_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
    const RFC_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

    fn read_until_blank(peer: &mut UnixStream) -> String {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            peer.read_exact(&mut byte).unwrap();
            head.push(byte[0]);
        }
        String::from_utf8(head).unwrap()
    }

    #[test]
    fn test_generate_accept_key() {
        // Test vector from RFC 6455
        assert_eq!(generate_accept_key(RFC_KEY), RFC_ACCEPT);
    }

    #[test]
    fn test_generate_key_is_random_base64() {
        let a = generate_key();
        let b = generate_key();
        assert_eq!(a.len(), 24);
        assert_ne!(a, b);
        let decoded = base64::engine::general_purpose::STANDARD.decode(&a).unwrap();
        assert_eq!(decoded.len(), 16);
    }

    #[test]
    fn test_parse_request() {
        let request = b"GET /chat HTTP/1.1\r\n\
            Host: server.example.com\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Protocol: chat\r\n\
            Sec-WebSocket-Version: 13\r\n\
            \r\n";

        let (req, len) = parse_request(request).unwrap().unwrap();
        assert_eq!(req.path, "/chat");
        assert_eq!(req.host, Some("server.example.com"));
        assert_eq!(req.key, RFC_KEY);
        assert_eq!(req.version, Some("13"));
        assert_eq!(req.protocol, Some("chat"));
        assert_eq!(len, request.len());
    }

    #[test]
    fn test_parse_request_partial() {
        let request = b"GET /chat HTTP/1.1\r\n\
            Host: server.example.com\r\n";

        assert!(parse_request(request).unwrap().is_none());
    }

    #[test]
    fn test_parse_request_missing_key() {
        let request = b"GET / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n";
        assert!(matches!(
            parse_request(request),
            Err(Error::HandshakeFailed(_))
        ));
    }

    #[test]
    fn test_parse_request_requires_upgrade() {
        let request = b"GET / HTTP/1.1\r\nSec-WebSocket-Key: abc\r\n\r\n";
        assert!(matches!(
            parse_request(request),
            Err(Error::HandshakeFailed(_))
        ));
    }

    #[test]
    fn test_parse_response_requires_101() {
        let response = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
        assert!(matches!(
            parse_response(response),
            Err(Error::HandshakeFailed(_))
        ));
    }

    #[test]
    fn test_build_response() {
        let response = build_response(RFC_ACCEPT, "chat");

        let response_str = std::str::from_utf8(&response).unwrap();
        assert!(response_str.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response_str.contains("Upgrade: websocket\r\n"));
        assert!(response_str.contains("Connection: Upgrade\r\n"));
        assert!(response_str.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response_str.contains("Sec-WebSocket-Protocol: chat\r\n"));
        assert!(response_str.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_build_request() {
        let request = build_request("example.com", "/ws", RFC_KEY, "chat");
        let (req, _) = parse_request(&request).unwrap().unwrap();
        assert_eq!(req.path, "/ws");
        assert_eq!(req.host, Some("example.com"));
        assert_eq!(req.key, RFC_KEY);
        assert_eq!(req.protocol, Some("chat"));
        assert_eq!(req.version, Some("13"));
    }

    #[test]
    fn test_build_rejection() {
        let response = build_rejection(400, "Bad Request", "This is a WebSocket server.");
        let text = std::str::from_utf8(&response).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains("Content-Length: 27\r\n"));
        assert!(text.ends_with("\r\n\r\nThis is a WebSocket server."));
    }

    #[test]
    fn test_validate_accept_key() {
        assert!(validate_accept_key(RFC_KEY, RFC_ACCEPT));
        assert!(!validate_accept_key(RFC_KEY, "invalid"));
    }

    #[test]
    fn test_server_handshake() {
        let (a, mut peer) = UnixStream::pair().unwrap();
        let mut endpoint = Stream::new(a);

        peer.write_all(
            b"GET /echo HTTP/1.1\r\n\
              Host: localhost\r\n\
              upgrade: WebSocket\r\n\
              Connection: Upgrade\r\n\
              sec-websocket-key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              \r\n\x81\x00",
        )
        .unwrap();

        let handshake = server_handshake(&mut endpoint, &Config::default()).unwrap();
        assert_eq!(handshake.path, "/echo");
        assert_eq!(handshake.accept, RFC_ACCEPT);
        assert_eq!(handshake.protocol, crate::DEFAULT_PROTOCOL);

        let response = read_until_blank(&mut peer);
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));

        // The frame after the head is still unread
        let mut frame = [0u8; 2];
        endpoint.read_exact_raw(&mut frame).unwrap();
        assert_eq!(frame, [0x81, 0x00]);
    }

    #[test]
    fn test_server_handshake_missing_key_writes_nothing() {
        let (a, mut peer) = UnixStream::pair().unwrap();
        let mut endpoint = Stream::new(a);
        peer.write_all(b"GET / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n")
            .unwrap();

        assert!(server_handshake(&mut endpoint, &Config::default()).is_err());
        assert!(endpoint.is_valid());

        peer.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let mut buf = [0u8; 1];
        assert!(peer.read(&mut buf).is_err());
    }

    #[test]
    fn test_server_handshake_times_out() {
        let (a, _peer) = UnixStream::pair().unwrap();
        let mut endpoint = Stream::new(a);
        let config = Config::builder()
            .handshake_timeout(Some(Duration::from_millis(20)))
            .build();

        assert!(server_handshake(&mut endpoint, &config).unwrap_err().is_timeout());
    }

    #[test]
    fn test_read_head_deadline_covers_whole_head() {
        let (a, mut peer) = UnixStream::pair().unwrap();
        let mut endpoint = Stream::new(a);
        let config = Config::builder()
            .handshake_timeout(Some(Duration::from_millis(300)))
            .build();

        // A client trickling one byte every 100ms never finishes the head
        let writer = thread::spawn(move || {
            let _ = peer.write_all(b"GET / HTTP/1.1\r\n");
            for _ in 0..15 {
                thread::sleep(Duration::from_millis(100));
                if peer.write_all(b"X").is_err() {
                    break;
                }
            }
        });

        let start = Instant::now();
        assert!(read_head(&mut endpoint, &config).unwrap_err().is_timeout());
        assert!(start.elapsed() < Duration::from_millis(900));
        drop(endpoint);
        writer.join().unwrap();
    }

    #[test]
    fn test_read_head_stops_at_blank_line() {
        let (a, mut peer) = UnixStream::pair().unwrap();
        let mut endpoint = Stream::new(a);
        peer.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\nframe").unwrap();

        let head = read_head(&mut endpoint, &Config::default()).unwrap();
        assert_eq!(head, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(endpoint.read_count(5, None).unwrap(), b"frame");
    }

    #[test]
    fn test_client_handshake() {
        let (a, mut peer) = UnixStream::pair().unwrap();
        let mut endpoint = Stream::new(a);

        let server = thread::spawn(move || {
            let request = read_until_blank(&mut peer);
            assert!(request.starts_with("GET /chat HTTP/1.1\r\n"));
            assert!(request.contains("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n"));
            assert!(request.contains("Sec-WebSocket-Protocol: chat\r\n"));
            assert!(request.contains("Sec-WebSocket-Version: 13\r\n"));
            peer.write_all(&build_response(RFC_ACCEPT, "chat")).unwrap();
            peer
        });

        let handshake = client_handshake_with_key(
            &mut endpoint,
            RFC_KEY,
            "localhost",
            "/chat",
            Some("chat"),
            &Config::default(),
        )
        .unwrap();
        let _peer = server.join().unwrap();

        assert_eq!(handshake.accept, RFC_ACCEPT);
        assert_eq!(handshake.protocol, "chat");
    }

    #[test]
    #[traced_test]
    fn test_client_handshake_tolerates_wrong_accept() {
        let (a, mut peer) = UnixStream::pair().unwrap();
        let mut endpoint = Stream::new(a);

        let server = thread::spawn(move || {
            read_until_blank(&mut peer);
            peer.write_all(&build_response("bm90IHRoZSByaWdodCBrZXk=", "x"))
                .unwrap();
            peer
        });

        let handshake = client_handshake_with_key(
            &mut endpoint,
            RFC_KEY,
            "localhost",
            "/",
            None,
            &Config::default(),
        )
        .unwrap();
        let _peer = server.join().unwrap();

        assert_eq!(handshake.protocol, "x");
        assert!(logs_contain("Sec-WebSocket-Accept mismatch"));
    }

    #[test]
    fn test_client_handshake_strict_accept() {
        let (a, mut peer) = UnixStream::pair().unwrap();
        let mut endpoint = Stream::new(a);

        let server = thread::spawn(move || {
            read_until_blank(&mut peer);
            peer.write_all(&build_response("bm90IHRoZSByaWdodCBrZXk=", "x"))
                .unwrap();
            peer
        });

        let config = Config::builder().strict_accept(true).build();
        let result =
            client_handshake_with_key(&mut endpoint, RFC_KEY, "localhost", "/", None, &config);
        let _peer = server.join().unwrap();

        assert!(matches!(result, Err(Error::HandshakeFailed(_))));
    }

    #[test]
    fn test_client_handshake_missing_accept_fails() {
        let (a, mut peer) = UnixStream::pair().unwrap();
        let mut endpoint = Stream::new(a);

        let server = thread::spawn(move || {
            read_until_blank(&mut peer);
            peer.write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n")
                .unwrap();
            peer
        });

        let result = client_handshake(&mut endpoint, "localhost", "/", None, &Config::default());
        let _peer = server.join().unwrap();

        assert!(matches!(result, Err(Error::HandshakeFailed(_))));
    }
}
