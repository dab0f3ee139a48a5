use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::message::Message;

/// Frame header: flags (1) + length (4) = 5 bytes.
pub const HEADER_SIZE: usize = 5;

/// Flags bit 0: payload is compressed with the negotiated encoding.
pub const COMPRESSED_FLAG: u8 = 0x01;

/// Flags bit 7: the frame carries trailers (web variant only).
pub const TRAILER_FLAG: u8 = 0x80;

/// Default maximum message size: 4 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Largest payload the 4-byte length prefix can describe.
pub const MAX_FRAME_PAYLOAD: usize = u32::MAX as usize;

/// A single frame as it appears on the wire.
///
/// The length prefix is not stored; it is always `payload.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw flags byte.
    pub flags: u8,
    /// The frame payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame from its flag bits and payload.
    pub fn new(compressed: bool, trailer: bool, payload: impl Into<Bytes>) -> Self {
        let mut flags = 0;
        if compressed {
            flags |= COMPRESSED_FLAG;
        }
        if trailer {
            flags |= TRAILER_FLAG;
        }
        Self {
            flags,
            payload: payload.into(),
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & COMPRESSED_FLAG != 0
    }

    pub fn is_trailer(&self) -> bool {
        self.flags & TRAILER_FLAG != 0
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────┬──────────────────┐
/// │ Flags (1B)   │ Length       │ Payload          │
/// │ b0: compr.   │ (4B BE)      │ (Length bytes)   │
/// │ b7: trailer  │              │                  │
/// └──────────────┴──────────────┴──────────────────┘
/// ```
///
/// The payload is written verbatim; compression happens before encoding.
/// Payloads longer than [`MAX_FRAME_PAYLOAD`] cannot be represented and must
/// be rejected by the caller's size limit first.
pub fn encode_frame(payload: &[u8], compressed: bool, trailer: bool, dst: &mut BytesMut) {
    debug_assert!(payload.len() <= MAX_FRAME_PAYLOAD, "frame payload overflows length prefix");
    let mut flags = 0u8;
    if compressed {
        flags |= COMPRESSED_FLAG;
    }
    if trailer {
        flags |= TRAILER_FLAG;
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u8(flags);
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
}

/// Encode a message as a data frame.
///
/// The compressed flag is derived from the message's encoding.
pub fn encode_message(message: &Message) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + message.payload().len());
    encode_frame(message.payload(), !message.is_identity(), false, &mut buf);
    buf.freeze()
}

/// Decode one frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. An oversized frame
/// is an error here; use [`Deframer`](crate::Deframer) to skip past it.
pub fn decode_frame(src: &mut BytesMut, max_message_size: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let flags = src[0];
    let length = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;

    if length > max_message_size {
        return Err(FrameError::MessageTooLarge {
            size: length,
            max: max_message_size,
        });
    }

    if src.len() < HEADER_SIZE + length {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(length).freeze();

    Ok(Some(Frame { flags, payload }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::WireFormat;

    #[test]
    fn encode_decode_roundtrip() {
        for compressed in [false, true] {
            let mut buf = BytesMut::new();
            let payload = b"hello, grpc!";

            encode_frame(payload, compressed, false, &mut buf);
            assert_eq!(buf.len(), HEADER_SIZE + payload.len());

            let frame = decode_frame(&mut buf, DEFAULT_MAX_MESSAGE_SIZE)
                .unwrap()
                .unwrap();
            assert_eq!(frame.is_compressed(), compressed);
            assert!(!frame.is_trailer());
            assert_eq!(frame.payload.as_ref(), payload);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn header_layout() {
        let mut buf = BytesMut::new();
        encode_frame(b"Bob", true, false, &mut buf);
        assert_eq!(&buf[..], &[0x01, 0x00, 0x00, 0x00, 0x03, b'B', b'o', b'b']);
    }

    #[test]
    fn trailer_flag() {
        let mut buf = BytesMut::new();
        encode_frame(b"grpc-status: 0\r\n", false, true, &mut buf);
        assert_eq!(buf[0], TRAILER_FLAG);

        let frame = decode_frame(&mut buf, DEFAULT_MAX_MESSAGE_SIZE)
            .unwrap()
            .unwrap();
        assert!(frame.is_trailer());
        assert!(!frame.is_compressed());
    }

    #[test]
    fn empty_payload() {
        let mut buf = BytesMut::new();
        encode_frame(b"", false, false, &mut buf);
        assert_eq!(&buf[..], &[0, 0, 0, 0, 0]);

        let frame = decode_frame(&mut buf, DEFAULT_MAX_MESSAGE_SIZE)
            .unwrap()
            .unwrap();
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x00, 0x00, 0x00][..]);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_MESSAGE_SIZE)
            .unwrap()
            .is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_frame(b"hello", false, false, &mut buf);
        buf.truncate(HEADER_SIZE + 2);

        assert!(decode_frame(&mut buf, DEFAULT_MAX_MESSAGE_SIZE)
            .unwrap()
            .is_none());
    }

    #[test]
    fn decode_message_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u8(0);
        buf.put_u32(1024);

        let result = decode_frame(&mut buf, 16);
        assert!(matches!(
            result,
            Err(FrameError::MessageTooLarge { size: 1024, max: 16 })
        ));
    }

    #[test]
    fn multiple_frames() {
        let mut buf = BytesMut::new();
        encode_frame(b"first", false, false, &mut buf);
        encode_frame(b"second", true, false, &mut buf);

        let f1 = decode_frame(&mut buf, DEFAULT_MAX_MESSAGE_SIZE)
            .unwrap()
            .unwrap();
        let f2 = decode_frame(&mut buf, DEFAULT_MAX_MESSAGE_SIZE)
            .unwrap()
            .unwrap();

        assert_eq!(f1.payload.as_ref(), b"first");
        assert!(f2.is_compressed());
        assert_eq!(f2.payload.as_ref(), b"second");
        assert!(buf.is_empty());
    }

    #[test]
    fn encode_message_sets_compressed_flag() {
        let plain = Message::identity(WireFormat::Protobuf, Bytes::from_static(b"x"));
        assert_eq!(encode_message(&plain)[0], 0);

        let gz = Message::new("gzip", WireFormat::Protobuf, Bytes::from_static(b"x"));
        assert_eq!(encode_message(&gz)[0], COMPRESSED_FLAG);
    }

    #[test]
    fn frame_accessors() {
        let frame = Frame::new(true, true, Bytes::from_static(b"test"));
        assert_eq!(frame.flags, COMPRESSED_FLAG | TRAILER_FLAG);
        assert_eq!(frame.wire_size(), HEADER_SIZE + 4);
    }
}
