//! Trailer blocks of the web variant.
//!
//! Over HTTP/1.1 there are no native trailers; the server sends them as the
//! last data frame, flagged with bit 7, holding `name: value\r\n` lines.

use bytes::{BufMut, Bytes, BytesMut};
use grpcwire_frame::encode_frame;
use grpcwire_transport::Metadata;

use crate::error::{CallError, Result};

/// Serialize a trailer block as a complete trailer frame.
pub fn encode_trailer_frame(trailers: &Metadata) -> Bytes {
    let mut block = BytesMut::new();
    for (name, value) in trailers.iter() {
        block.put_slice(name.as_bytes());
        block.put_slice(b": ");
        block.put_slice(value.as_bytes());
        block.put_slice(b"\r\n");
    }

    let mut frame = BytesMut::with_capacity(block.len() + grpcwire_frame::HEADER_SIZE);
    encode_frame(&block, false, true, &mut frame);
    frame.freeze()
}

/// Parse the payload of a trailer frame.
pub fn parse_trailer_block(block: &[u8]) -> Result<Metadata> {
    let text = std::str::from_utf8(block)
        .map_err(|_| CallError::Protocol("trailer frame is not valid UTF-8".into()))?;

    let mut trailers = Metadata::new();
    for line in text.split("\r\n").filter(|line| !line.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| CallError::Protocol(format!("malformed trailer line '{line}'")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(CallError::Protocol(format!("malformed trailer line '{line}'")));
        }
        trailers.insert(name, value.trim());
    }
    Ok(trailers)
}
