//! WebSocket frame parsing and serialization
//!
//! This module implements RFC 6455 frame handling:
//! - Length tiers: 7-bit, 7+16-bit and 7+64-bit, big-endian on the wire
//! - Optional 32-bit masking key
//! - Blocking decode from any [`std::io::Read`]

use std::io::Read;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::mask::apply_mask;
use crate::{MEDIUM_MESSAGE_THRESHOLD, SMALL_MESSAGE_THRESHOLD};

/// Length sentinel announcing a 16-bit extended length
const LEN_16_SENTINEL: u8 = 126;
/// Length sentinel announcing a 64-bit extended length
const LEN_64_SENTINEL: u8 = 127;

/// WebSocket opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation frame
    Continuation = 0x0,
    /// Text frame
    Text = 0x1,
    /// Binary frame
    Binary = 0x2,
    /// Connection close
    Close = 0x8,
    /// Ping
    Ping = 0x9,
    /// Pong
    Pong = 0xA,
}

impl OpCode {
    /// Parse opcode from the low nibble of the first header byte
    #[inline]
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    /// Check if this is a control frame
    #[inline]
    pub fn is_control(&self) -> bool {
        (*self as u8) >= 0x8
    }
}

/// A parsed WebSocket frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag
    pub fin: bool,
    /// Frame opcode
    pub opcode: OpCode,
    /// Mask flag (set by clients only)
    pub masked: bool,
    /// Payload length
    pub payload_len: u64,
    /// Masking key (if masked)
    pub mask: Option<[u8; 4]>,
}

impl FrameHeader {
    /// Get the total header size in bytes
    #[inline]
    pub fn header_size(&self) -> usize {
        let mut size = 2;

        if self.payload_len > MEDIUM_MESSAGE_THRESHOLD as u64 {
            size += 8;
        } else if self.payload_len > SMALL_MESSAGE_THRESHOLD as u64 {
            size += 2;
        }

        if self.masked {
            size += 4;
        }

        size
    }

    /// Encode the frame header into a buffer
    #[inline]
    pub fn encode(&self, buf: &mut BytesMut) {
        // First byte: FIN, RSV1-3 (always zero), opcode
        let mut b0 = self.opcode as u8;
        if self.fin {
            b0 |= 0x80;
        }
        buf.put_u8(b0);

        // Second byte: mask flag, payload length
        let mask_bit = if self.masked { 0x80 } else { 0x00 };

        if self.payload_len <= SMALL_MESSAGE_THRESHOLD as u64 {
            buf.put_u8(mask_bit | self.payload_len as u8);
        } else if self.payload_len <= MEDIUM_MESSAGE_THRESHOLD as u64 {
            buf.put_u8(mask_bit | LEN_16_SENTINEL);
            buf.put_u16(self.payload_len as u16);
        } else {
            buf.put_u8(mask_bit | LEN_64_SENTINEL);
            buf.put_u64(self.payload_len);
        }

        if let Some(mask) = self.mask {
            buf.put_slice(&mask);
        }
    }

    /// Read a header from a blocking reader
    ///
    /// Length sentinels 126 and 127 always trigger an extended-length read.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut head = [0u8; 2];
        reader.read_exact(&mut head)?;
        let [b0, b1] = head;

        if b0 & 0x70 != 0 {
            return Err(Error::Protocol("RSV bits must be 0"));
        }

        let fin = b0 & 0x80 != 0;
        let opcode = OpCode::from_u8(b0 & 0x0F).ok_or(Error::InvalidFrame("invalid opcode"))?;

        if opcode.is_control() && !fin {
            return Err(Error::Protocol("control frame must not be fragmented"));
        }

        let masked = b1 & 0x80 != 0;
        let payload_len = match b1 & 0x7F {
            LEN_16_SENTINEL => {
                let mut ext = [0u8; 2];
                reader.read_exact(&mut ext)?;
                u16::from_be_bytes(ext) as u64
            }
            LEN_64_SENTINEL => {
                let mut ext = [0u8; 8];
                reader.read_exact(&mut ext)?;
                let len = u64::from_be_bytes(ext);
                if len >> 63 != 0 {
                    return Err(Error::InvalidFrame("payload length MSB must be 0"));
                }
                len
            }
            len => len as u64,
        };

        if opcode.is_control() && payload_len > SMALL_MESSAGE_THRESHOLD as u64 {
            return Err(Error::Protocol("control frame too large"));
        }

        let mask = if masked {
            let mut key = [0u8; 4];
            reader.read_exact(&mut key)?;
            Some(key)
        } else {
            None
        };

        Ok(Self {
            fin,
            opcode,
            masked,
            payload_len,
            mask,
        })
    }
}

/// A complete WebSocket frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame header
    pub header: FrameHeader,
    /// Frame payload (already unmasked)
    pub payload: Bytes,
}

/// Encode a frame into a buffer
///
/// For masked frames (client role) the payload is copied and masked in the
/// output buffer; `payload` itself is left untouched.
pub fn encode_frame(
    buf: &mut BytesMut,
    opcode: OpCode,
    payload: &[u8],
    fin: bool,
    mask: Option<[u8; 4]>,
) {
    let header = FrameHeader {
        fin,
        opcode,
        masked: mask.is_some(),
        payload_len: payload.len() as u64,
        mask,
    };

    buf.reserve(header.header_size() + payload.len());
    header.encode(buf);

    let start = buf.len();
    buf.put_slice(payload);
    if let Some(m) = mask {
        apply_mask(&mut buf[start..], m);
    }
}

/// Read one complete frame from a blocking reader
///
/// Payloads longer than `max_frame_size` are rejected before any payload byte
/// is read.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R, max_frame_size: usize) -> Result<Frame> {
    let header = FrameHeader::read_from(reader)?;

    let payload_len =
        usize::try_from(header.payload_len).map_err(|_| Error::FrameTooLarge)?;
    if payload_len > max_frame_size {
        return Err(Error::FrameTooLarge);
    }

    let mut payload = BytesMut::zeroed(payload_len);
    reader.read_exact(&mut payload)?;

    if let Some(mask) = header.mask {
        apply_mask(&mut payload, mask);
    }

    Ok(Frame {
        header,
        payload: payload.freeze(),
    })
}
