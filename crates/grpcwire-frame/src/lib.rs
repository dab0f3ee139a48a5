//! gRPC length-prefixed message framing.
//!
//! Every message on the wire is framed with:
//! - A 1-byte flags field (bit 0: compressed, bit 7: web trailer frame)
//! - A 4-byte big-endian payload length
//! - The payload itself
//!
//! The [`Deframer`] reassembles messages from arbitrarily chunked input and
//! skips oversized frames without buffering them. Compression is applied
//! before framing through an immutable [`CompressionRegistry`].

pub mod codec;
pub mod compression;
pub mod deframer;
pub mod error;
pub mod message;

pub use codec::{
    decode_frame, encode_frame, encode_message, Frame, COMPRESSED_FLAG, DEFAULT_MAX_MESSAGE_SIZE,
    HEADER_SIZE, MAX_FRAME_PAYLOAD, TRAILER_FLAG,
};
pub use compression::{
    CompressionRegistry, CompressionRegistryBuilder, Compressor, Deflate, Gzip, Identity,
};
pub use deframer::{Deframer, DeframerConfig, Drain};
pub use error::{FrameError, Result};
pub use message::{Message, WireFormat, IDENTITY};
