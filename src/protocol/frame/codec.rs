//! WebSocket frame codec implementation.
//!
//! [`decode`] and [`encode`] are pure functions over complete buffers. The
//! [`FrameDecoder`] and [`FrameEncoder`] pair plugs the same wire format into
//! `monoio-codec` framing for live sockets, where a frame may span several reads.

use bytes::{Bytes, BytesMut};

use crate::{
    error::{FrameError, Result},
    protocol::frame::{
        Frame, FrameHeader,
        frame::{LengthFormat, ParsedHeader},
        mask::apply_mask,
        utf8,
    },
};

mod decode;
pub use decode::FrameDecoder;

mod encode;
pub use encode::FrameEncoder;

/// Decodes one masked client frame held entirely in `raw` into text.
///
/// The 7-bit length field selects where the mask key starts: offset 2 for lengths up
/// to 125, offset 4 after a 16-bit length, offset 10 after a 64-bit length. Exactly the
/// declared number of payload bytes is unmasked; trailing bytes are ignored. Invalid
/// UTF-8 is dropped from the result.
pub fn decode(raw: &[u8]) -> Result<String> {
    let ParsedHeader {
        header,
        payload_length,
        header_length,
    } = FrameHeader::parse(raw)?.ok_or(FrameError::Truncated {
        needed: declared_header_length(raw),
        available: raw.len(),
    })?;

    let mask = header.mask.ok_or(FrameError::Unmasked)?;

    let needed = usize::try_from(payload_length)
        .ok()
        .and_then(|len| len.checked_add(header_length))
        .ok_or(FrameError::InvalidLength(payload_length))?;
    let Some(payload) = raw.get(header_length..needed) else {
        return Err(FrameError::Truncated {
            needed,
            available: raw.len(),
        }
        .into());
    };

    let mut payload = payload.to_vec();
    apply_mask(&mut payload, mask);
    Ok(utf8::decode_lossy(&payload))
}

/// Encodes `text` as a single unmasked server-to-client text frame.
pub fn encode(text: &str) -> Bytes {
    let frame = Frame::text(Bytes::copy_from_slice(text.as_bytes()));
    let mut dst = BytesMut::with_capacity(frame.len());
    FrameEncoder::write_frame(frame, &mut dst);
    dst.freeze()
}

/// Header bytes a buffer announces through its second byte, mask key included.
fn declared_header_length(raw: &[u8]) -> usize {
    match raw.get(1) {
        Some(&second) => {
            let mask = if second & 0x80 != 0 { 4 } else { 0 };
            2 + LengthFormat::for_byte(second).extra_bytes() + mask
        }
        None => 2,
    }
}
