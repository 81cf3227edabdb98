use bytes::{Buf, BytesMut};
use monoio_codec::{Decoded, Decoder};

use crate::{
    error::{Error, FrameError},
    protocol::frame::{
        Frame, FrameHeader,
        frame::ParsedHeader,
        mask::apply_mask,
    },
};

/// Decoder for WebSocket frames read off a live socket.
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    /// Maximum payload size of a single frame. `None` means no limit.
    max_frame_size: Option<usize>,
    /// Reject frames without a mask key, as a server must.
    require_mask: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        FrameDecoder::new(Some(16 << 20), true)
    }
}

impl FrameDecoder {
    /// Creates a new `FrameDecoder`.
    pub fn new(max_frame_size: Option<usize>, require_mask: bool) -> Self {
        Self {
            max_frame_size,
            require_mask,
        }
    }

    /// Sets the maximum payload size of a single frame.
    pub fn set_max_frame_size(&mut self, max_frame_size: Option<usize>) {
        self.max_frame_size = max_frame_size;
    }

    /// Sets whether unmasked frames are rejected.
    pub fn set_require_mask(&mut self, require_mask: bool) {
        self.require_mask = require_mask;
    }
}

impl Decoder for FrameDecoder {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Decoded<Self::Item>, Self::Error> {
        let Some(ParsedHeader {
            header,
            payload_length,
            header_length,
        }) = FrameHeader::parse(&src[..])?
        else {
            return Ok(Decoded::Insufficient);
        };

        // MUST be 0 unless an extension is negotiated that defines meanings
        // for non-zero values. (RFC 6455)
        if header.rsv1 || header.rsv2 || header.rsv3 {
            return Err(FrameError::NonZeroReservedBits.into());
        }

        if self.require_mask && header.mask.is_none() {
            return Err(FrameError::Unmasked.into());
        }

        let size = usize::try_from(payload_length)
            .map_err(|_| FrameError::InvalidLength(payload_length))?;
        if let Some(max_size) = self.max_frame_size
            && size > max_size
        {
            return Err(Error::MessageTooLarge { size, max_size });
        }

        let total = header_length + size;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(Decoded::Insufficient);
        }

        src.advance(header_length);
        let mut payload = src.split_to(size);
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }

        Ok(Decoded::Some(Frame::from_payload(header, payload.freeze())))
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;

    use super::*;
    use crate::protocol::frame::coding::OpCode;

    fn decode_all(decoder: &mut FrameDecoder, buf: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Decoded::Some(frame) = decoder.decode(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn decodes_coalesced_frames() {
        let mut buf = BytesMut::from(
            &[
                0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58, // "Hello"
                0x89, 0x80, 0x00, 0x00, 0x00, 0x00, // empty ping
            ][..],
        );

        let frames = decode_all(&mut FrameDecoder::default(), &mut buf);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload().as_ref(), b"Hello");
        assert_eq!(frames[1].header().opcode, OpCode::Ping);
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_split_frame() {
        let mut decoder = FrameDecoder::default();
        let mut buf = BytesMut::from(&[0x81, 0x85, 0x37, 0xfa][..]);
        assert!(matches!(decoder.decode(&mut buf), Ok(Decoded::Insufficient)));

        buf.put_slice(&[0x21, 0x3d, 0x7f, 0x9f]);
        assert!(matches!(decoder.decode(&mut buf), Ok(Decoded::Insufficient)));

        buf.put_slice(&[0x4d, 0x51, 0x58]);
        let frames = decode_all(&mut decoder, &mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].clone().into_text(), "Hello");
    }

    #[test]
    fn rejects_unmasked_frames() {
        let mut buf = BytesMut::from(&b"\x81\x02hi"[..]);
        assert!(matches!(
            FrameDecoder::default().decode(&mut buf),
            Err(Error::MalformedFrame(FrameError::Unmasked))
        ));

        let mut buf = BytesMut::from(&b"\x81\x02hi"[..]);
        let frames = decode_all(&mut FrameDecoder::new(None, false), &mut buf);
        assert_eq!(frames[0].payload().as_ref(), b"hi");
    }

    #[test]
    fn rejects_reserved_bits() {
        let mut buf = BytesMut::from(&[0xc1, 0x80, 0, 0, 0, 0][..]);
        assert!(matches!(
            FrameDecoder::default().decode(&mut buf),
            Err(Error::MalformedFrame(FrameError::NonZeroReservedBits))
        ));
    }

    #[test]
    fn size_limiting() {
        let mut buf = BytesMut::from(&[0x82, 0x83, 0, 0, 0, 0, 1, 2, 3][..]);
        assert!(matches!(
            FrameDecoder::new(Some(2), true).decode(&mut buf),
            Err(Error::MessageTooLarge {
                size: 3,
                max_size: 2
            })
        ));
    }
}
