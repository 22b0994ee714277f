//! WebSocket protocol implementation
//!
//! This module handles message-level framing:
//! - Splitting outgoing text payloads into one or more frames
//! - Reassembly of fragmented incoming messages
//! - Rejection of frame types this engine does not speak

use std::io::Read;

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::frame::{OpCode, encode_frame, read_frame};
use crate::mask::generate_mask;

/// WebSocket endpoint role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Client (must mask frames)
    Client,
    /// Server (must not mask frames)
    Server,
}

impl Role {
    /// Whether frames sent in this role carry a masking key
    #[inline]
    pub fn masks_outgoing(&self) -> bool {
        *self == Role::Client
    }
}

/// A complete WebSocket message, possibly assembled from fragments
///
/// Only ever handed out once its final fragment has been consumed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    payload: Bytes,
}

impl Message {
    /// Create a message from raw payload bytes
    #[inline]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Get message as bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Get message as text, if the payload is valid UTF-8
    #[inline]
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Payload length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Convert into the underlying bytes
    #[inline]
    pub fn into_bytes(self) -> Bytes {
        self.payload
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::new(Bytes::from(s))
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::new(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Message {
    fn from(v: Vec<u8>) -> Self {
        Message::new(Bytes::from(v))
    }
}

impl From<Bytes> for Message {
    fn from(b: Bytes) -> Self {
        Message::new(b)
    }
}

/// WebSocket protocol handler
///
/// Owns the single in-flight reassembly buffer of one connection.
#[derive(Debug)]
pub struct Protocol {
    /// Endpoint role
    role: Role,
    /// Largest frame accepted from the peer; also the fragment size for sends
    max_frame_size: usize,
    /// Largest reassembled message accepted from the peer
    max_message_size: usize,
    /// Fragment buffer for message reassembly
    fragment_buf: BytesMut,
}

impl Protocol {
    /// Create a new protocol handler
    pub fn new(role: Role, max_frame_size: usize, max_message_size: usize) -> Self {
        Self {
            role,
            max_frame_size: max_frame_size.max(1),
            max_message_size,
            fragment_buf: BytesMut::new(),
        }
    }

    /// Endpoint role
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Read frames until a final fragment completes a message
    ///
    /// Text and continuation frames are accepted in any position. A close frame
    /// ends the connection; every other opcode is a protocol violation. On
    /// failure the partial message is discarded.
    pub fn read_message<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<Message> {
        self.fragment_buf.clear();
        let result = self.read_fragments(reader);
        if result.is_err() {
            self.fragment_buf.clear();
        }
        result
    }

    fn read_fragments<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<Message> {
        loop {
            let frame = read_frame(reader, self.max_frame_size)?;

            match frame.header.opcode {
                OpCode::Text | OpCode::Continuation => {}
                OpCode::Close => {
                    tracing::debug!("peer sent a close frame");
                    return Err(Error::ConnectionClosed);
                }
                _ => return Err(Error::Protocol("only text framing is supported")),
            }

            let new_size = self.fragment_buf.len() + frame.payload.len();
            if new_size > self.max_message_size {
                return Err(Error::MessageTooLarge);
            }
            self.fragment_buf.extend_from_slice(&frame.payload);

            tracing::trace!(
                len = frame.payload.len(),
                fin = frame.header.fin,
                "received frame"
            );

            if frame.header.fin {
                return Ok(Message::new(self.fragment_buf.split().freeze()));
            }
        }
    }

    /// Encode a text message as one or more frames
    ///
    /// Payloads larger than the configured frame size are split into a text
    /// frame followed by continuation frames. Each frame gets a fresh mask in
    /// the client role.
    pub fn encode_message(&self, buf: &mut BytesMut, payload: &[u8]) {
        if payload.len() <= self.max_frame_size {
            encode_frame(buf, OpCode::Text, payload, true, self.next_mask());
            return;
        }

        let mut chunks = payload.chunks(self.max_frame_size).peekable();
        let mut opcode = OpCode::Text;
        while let Some(chunk) = chunks.next() {
            let fin = chunks.peek().is_none();
            encode_frame(buf, opcode, chunk, fin, self.next_mask());
            opcode = OpCode::Continuation;
        }
    }

    #[inline]
    fn next_mask(&self) -> Option<[u8; 4]> {
        self.role.masks_outgoing().then(generate_mask)
    }
}
