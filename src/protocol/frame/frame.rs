use bytes::Bytes;

use super::{coding::OpCode, mask::generate_mask, utf8};
use crate::error::FrameError;

/// A struct representing a WebSocket frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Indicates that the frame is the last one of a possibly fragmented message.
    pub is_final: bool,
    /// Reserved for protocol extensions.
    pub rsv1: bool,
    /// Reserved for protocol extensions.
    pub rsv2: bool,
    /// Reserved for protocol extensions.
    pub rsv3: bool,
    /// WebSocket protocol opcode.
    pub opcode: OpCode,
    /// A frame mask, if any.
    pub mask: Option<[u8; 4]>,
}

impl Default for FrameHeader {
    fn default() -> Self {
        FrameHeader {
            is_final: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode: OpCode::Text,
            mask: None,
        }
    }
}

/// A header parsed off the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeader {
    /// The header fields.
    pub header: FrameHeader,
    /// The declared payload length.
    pub payload_length: u64,
    /// Bytes taken by the header, extended length and mask key together.
    pub header_length: usize,
}

impl FrameHeader {
    /// Parses a header off the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` is too short to hold the base header, the extended
    /// length or the mask key it declares.
    pub fn parse(buf: &[u8]) -> Result<Option<ParsedHeader>, FrameError> {
        let (first, second) = match buf {
            [first, second, ..] => (*first, *second),
            _ => return Ok(None),
        };

        let is_final = first & 0x80 != 0;
        let rsv1 = first & 0x40 != 0;
        let rsv2 = first & 0x20 != 0;
        let rsv3 = first & 0x10 != 0;
        let opcode = OpCode::from(first);

        let masked = second & 0x80 != 0;
        let length_format = LengthFormat::for_byte(second & 0x7f);

        let mut offset = 2;
        let extra = length_format.extra_bytes();
        let Some(extended) = buf.get(offset..offset + extra) else {
            return Ok(None);
        };
        let payload_length = match length_format {
            LengthFormat::U8(len) => u64::from(len),
            LengthFormat::U16 => u64::from(u16::from_be_bytes([extended[0], extended[1]])),
            LengthFormat::U64 => {
                let mut raw = [0; 8];
                raw.copy_from_slice(extended);
                let len = u64::from_be_bytes(raw);
                // the most significant bit MUST be 0 (RFC 6455)
                if len >> 63 != 0 {
                    return Err(FrameError::InvalidLength(len));
                }
                len
            }
        };
        offset += extra;

        let mask = if masked {
            let Some(key) = buf.get(offset..offset + 4) else {
                return Ok(None);
            };
            offset += 4;
            Some([key[0], key[1], key[2], key[3]])
        } else {
            None
        };

        Ok(Some(ParsedHeader {
            header: FrameHeader {
                is_final,
                rsv1,
                rsv2,
                rsv3,
                opcode,
                mask,
            },
            payload_length,
            header_length: offset,
        }))
    }

    /// Size of the encoded header for a payload of `length` bytes.
    pub fn len(&self, length: u64) -> usize {
        2 + LengthFormat::for_length(length).extra_bytes() + if self.mask.is_some() { 4 } else { 0 }
    }
}

/// A struct representing a WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub(crate) header: FrameHeader,
    pub(crate) payload: Bytes,
}

impl Frame {
    /// Creates a frame from a header and an already unmasked payload.
    pub fn from_payload(header: FrameHeader, payload: Bytes) -> Self {
        Frame { header, payload }
    }

    /// Creates a final text frame.
    pub fn text(text: impl Into<Bytes>) -> Self {
        Frame::message(text, OpCode::Text)
    }

    /// Creates a final data frame with the given opcode.
    pub fn message(payload: impl Into<Bytes>, opcode: OpCode) -> Self {
        Frame {
            header: FrameHeader {
                opcode,
                ..FrameHeader::default()
            },
            payload: payload.into(),
        }
    }

    /// Creates a pong frame.
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Frame::message(payload, OpCode::Pong)
    }

    /// Creates a close frame carrying the raw close body (status code and reason).
    pub fn close(body: impl Into<Bytes>) -> Self {
        Frame::message(body, OpCode::Close)
    }

    /// Returns the total encoded length of the frame.
    pub fn len(&self) -> usize {
        let length = self.payload.len();
        self.header.len(length as u64) + length
    }

    /// Checks if the frame has no payload.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Returns a reference to the frame header.
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Returns a reference to the (unmasked) payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Checks if the frame carries a mask key.
    pub fn is_masked(&self) -> bool {
        self.header.mask.is_some()
    }

    /// Sets the given mask. The encoder applies it to the payload.
    pub fn set_mask(&mut self, mask: [u8; 4]) {
        self.header.mask = Some(mask);
    }

    /// Sets a random mask, as every client frame must be masked.
    pub fn set_random_mask(&mut self) {
        self.set_mask(generate_mask());
    }

    /// Consumes the frame and returns its payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Consumes the frame and returns its payload as text, dropping invalid UTF-8.
    pub fn into_text(self) -> String {
        utf8::decode_lossy(&self.payload)
    }
}

/// Handles the length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LengthFormat {
    U8(u8),
    U16,
    U64,
}

impl LengthFormat {
    /// Gets the length format for the given data size.
    #[inline]
    pub(crate) fn for_length(length: u64) -> Self {
        if length < 126 {
            LengthFormat::U8(length as u8)
        } else if length < 65536 {
            LengthFormat::U16
        } else {
            LengthFormat::U64
        }
    }

    /// Gets the number of bytes that follow the length byte.
    #[inline]
    pub(crate) fn extra_bytes(&self) -> usize {
        match *self {
            LengthFormat::U8(_) => 0,
            LengthFormat::U16 => 2,
            LengthFormat::U64 => 8,
        }
    }

    /// Gets the value of the 7-bit length field.
    #[inline]
    pub(crate) fn length_byte(&self) -> u8 {
        match *self {
            LengthFormat::U8(b) => b,
            LengthFormat::U16 => 126,
            LengthFormat::U64 => 127,
        }
    }

    /// Gets the length format for the given 7-bit length field.
    #[inline]
    pub(crate) fn for_byte(byte: u8) -> Self {
        match byte & 0x7f {
            126 => LengthFormat::U16,
            127 => LengthFormat::U64,
            b => LengthFormat::U8(b),
        }
    }
}
