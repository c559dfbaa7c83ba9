use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{DecodeError, FrameError, Result};

/// Frame header: channel (4) + length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// A framed message with channel routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The logical channel this message belongs to.
    pub channel_id: u32,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(channel_id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            channel_id,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────┬──────────────────┐
/// │ Channel      │ Length       │ Payload          │
/// │ (4B LE)      │ (4B LE)      │ (Length bytes)   │
/// └──────────────┴──────────────┴──────────────────┘
/// ```
///
/// No transport limit is applied here; the active transport rejects frames
/// that exceed its negotiated maximum.
pub fn encode_frame<B: BufMut>(channel_id: u32, payload: &[u8], dst: &mut B) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    dst.put_u32_le(channel_id);
    dst.put_u32_le(len);
    dst.put_slice(payload);
    Ok(())
}

/// Encode a frame into a freshly allocated buffer.
pub fn encode(channel_id: u32, payload: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    encode_frame(channel_id, payload, &mut buf)?;
    Ok(buf.freeze())
}

/// Decode one complete frame from a transport write.
///
/// The whole buffer must be exactly one frame. The payload is a zero-copy
/// slice of `src`.
pub fn decode_frame(src: Bytes) -> std::result::Result<Frame, DecodeError> {
    if src.len() < HEADER_SIZE {
        return Err(DecodeError::TooShort {
            len: src.len(),
            header: HEADER_SIZE,
        });
    }

    let mut header = &src[..HEADER_SIZE];
    let channel_id = header.get_u32_le();
    let declared = header.get_u32_le() as usize;

    let actual = src.len() - HEADER_SIZE;
    if declared != actual {
        return Err(DecodeError::LengthMismatch { declared, actual });
    }

    if declared == 0 {
        return Err(DecodeError::EmptyPayload);
    }

    Ok(Frame {
        channel_id,
        payload: src.slice(HEADER_SIZE..),
    })
}

/// Largest payload that fits in a single transport write of `max_transport_payload` bytes.
pub fn payload_capacity(max_transport_payload: usize) -> usize {
    max_transport_payload.saturating_sub(HEADER_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let payload = b"hello, splitlink!";
        let wire = encode(7, payload).unwrap();

        assert_eq!(wire.len(), HEADER_SIZE + payload.len());

        let frame = decode_frame(wire).unwrap();
        assert_eq!(frame.channel_id, 7);
        assert_eq!(frame.payload.as_ref(), payload);
    }

    #[test]
    fn test_roundtrip_preserves_full_id_range() {
        for channel_id in [0, 1, 255, 65_536, u32::MAX] {
            let frame = decode_frame(encode(channel_id, b"x").unwrap()).unwrap();
            assert_eq!(frame.channel_id, channel_id);
        }
    }

    #[test]
    fn test_wire_layout_is_little_endian() {
        let wire = encode(0x0102_0304, b"ab").unwrap();
        assert_eq!(
            wire.as_ref(),
            &[0x04, 0x03, 0x02, 0x01, 0x02, 0x00, 0x00, 0x00, b'a', b'b']
        );
    }

    #[test]
    fn test_decode_too_short_for_every_prefix() {
        let wire = encode(1, b"hi").unwrap();
        for len in 0..HEADER_SIZE {
            let result = decode_frame(wire.slice(..len));
            assert_eq!(
                result,
                Err(DecodeError::TooShort {
                    len,
                    header: HEADER_SIZE
                })
            );
        }
    }

    #[test]
    fn test_decode_truncated_payload() {
        let wire = encode(1, b"hello").unwrap();
        let result = decode_frame(wire.slice(..HEADER_SIZE + 2));
        assert_eq!(
            result,
            Err(DecodeError::LengthMismatch {
                declared: 5,
                actual: 2
            })
        );
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let mut buf = BytesMut::new();
        encode_frame(1, b"hello", &mut buf).unwrap();
        buf.put_slice(b"junk");

        let result = decode_frame(buf.freeze());
        assert!(matches!(result, Err(DecodeError::LengthMismatch { .. })));
    }

    #[test]
    fn test_decode_huge_declared_length() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(1);
        buf.put_u32_le(u32::MAX);
        buf.put_slice(b"abc");

        let result = decode_frame(buf.freeze());
        assert!(matches!(result, Err(DecodeError::LengthMismatch { .. })));
    }

    #[test]
    fn test_decode_empty_payload() {
        let wire = encode(3, b"").unwrap();
        assert_eq!(wire.len(), HEADER_SIZE);
        assert_eq!(decode_frame(wire), Err(DecodeError::EmptyPayload));
    }

    #[test]
    fn test_encode_appends_to_existing_buffer() {
        let mut buf = BytesMut::new();
        encode_frame(1, b"first", &mut buf).unwrap();
        let first_len = buf.len();
        encode_frame(2, b"second", &mut buf).unwrap();

        let second = decode_frame(buf.freeze().slice(first_len..)).unwrap();
        assert_eq!(second.channel_id, 2);
        assert_eq!(second.payload.as_ref(), b"second");
    }

    #[test]
    fn test_encode_into_vec() {
        let mut buf = Vec::new();
        encode_frame(9, b"vec", &mut buf).unwrap();
        let frame = decode_frame(Bytes::from(buf)).unwrap();
        assert_eq!(frame, Frame::new(9, Bytes::from_static(b"vec")));
    }

    #[test]
    fn test_frame_wire_size() {
        let frame = Frame::new(1, Bytes::from_static(b"test"));
        assert_eq!(frame.wire_size(), HEADER_SIZE + 4);
    }

    #[test]
    fn test_payload_capacity() {
        assert_eq!(payload_capacity(244), 236);
        assert_eq!(payload_capacity(4), 0);
    }
}
