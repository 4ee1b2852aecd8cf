//! RFC 6455 frame codec, without fragmentation or extensions.
//!
//! ```text
//!  0               1               2               3
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |     Masking key (if MASK set)     |          Payload          |
//! +-----------------------------------+---------------------------+
//! ```

use std::io;

use bytes::{BufMut, Bytes, BytesMut};

use super::WebSocketError;
use crate::http::ByteRead;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = WebSocketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => return Err(WebSocketError::UnknownOpcode(other)),
        })
    }
}

/// Where the payload length is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadLength {
    /// Carried in the 7-bit field.
    Inline(u8),
    /// A 16-bit big-endian length follows.
    Extended16,
    /// A 64-bit big-endian length follows.
    Extended64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub opcode: Opcode,
    pub masked: bool,
    pub length: PayloadLength,
}

/// Decodes the two fixed header bytes.
///
/// # Errors
///
/// [`WebSocketError::Fragmented`] if FIN is unset or the opcode is
/// `Continuation`.
pub fn parse_frame_header(header: [u8; 2]) -> Result<FrameHeader, WebSocketError> {
    let fin = header[0] & 0x80 != 0;
    let opcode = Opcode::try_from(header[0] & 0x0F)?;
    if !fin || opcode == Opcode::Continuation {
        return Err(WebSocketError::Fragmented);
    }
    let length = match header[1] & 0x7F {
        126 => PayloadLength::Extended16,
        127 => PayloadLength::Extended64,
        n => PayloadLength::Inline(n),
    };
    Ok(FrameHeader {
        opcode,
        masked: header[1] & 0x80 != 0,
        length,
    })
}

/// Encodes a single unmasked frame with FIN set.
///
/// # Examples
///
/// ```
/// use picodot::realtime::frame::{Opcode, encode_frame};
///
/// let frame = encode_frame(Opcode::Text, b"hi");
/// assert_eq!(&frame[..], &[0x81, 0x02, b'h', b'i']);
/// ```
pub fn encode_frame(opcode: Opcode, payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(payload.len() + 10);
    frame.put_u8(0x80 | opcode.as_u8());
    match payload.len() {
        len @ 0..=125 => frame.put_u8(len as u8),
        len if len <= usize::from(u16::MAX) => {
            frame.put_u8(126);
            frame.put_u16(len as u16);
        }
        len => {
            frame.put_u8(127);
            frame.put_u64(len as u64);
        }
    }
    frame.put_slice(payload);
    frame.freeze()
}

/// XORs `payload` with the 4-byte masking key, cyclically. Applying it twice
/// restores the input.
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Reads one complete frame, unmasking the payload if needed.
///
/// # Errors
///
/// - [`WebSocketError::ConnectionClosed`] if the stream ends before a header.
/// - [`WebSocketError::MessageTooLarge`] if the payload exceeds `max_len`.
/// - [`WebSocketError::Fragmented`] for fragmented frames.
pub async fn read_frame(
    stream: &mut dyn ByteRead,
    max_len: usize,
) -> Result<(Opcode, Bytes), WebSocketError> {
    let raw = match stream.read_exact(2).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(WebSocketError::ConnectionClosed);
        }
        Err(err) => return Err(err.into()),
    };
    let header = parse_frame_header([raw[0], raw[1]])?;

    let length = match header.length {
        PayloadLength::Inline(n) => u64::from(n),
        PayloadLength::Extended16 => {
            let raw = stream.read_exact(2).await?;
            u64::from(u16::from_be_bytes([raw[0], raw[1]]))
        }
        PayloadLength::Extended64 => {
            let raw = stream.read_exact(8).await?;
            let mut be = [0u8; 8];
            be.copy_from_slice(&raw);
            u64::from_be_bytes(be)
        }
    };
    let length = match usize::try_from(length) {
        Ok(length) if length <= max_len => length,
        _ => {
            return Err(WebSocketError::MessageTooLarge {
                length,
                limit: max_len,
            });
        }
    };

    let mask = if header.masked {
        let raw = stream.read_exact(4).await?;
        Some([raw[0], raw[1], raw[2], raw[3]])
    } else {
        None
    };

    let payload = stream.read_exact(length).await?;
    let payload = match mask {
        Some(mask) => {
            let mut unmasked = BytesMut::from(&payload[..]);
            apply_mask(&mut unmasked, mask);
            unmasked.freeze()
        }
        None => payload,
    };
    Ok((header.opcode, payload))
}
