use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::codec::{COMPRESSED_FLAG, DEFAULT_MAX_MESSAGE_SIZE, HEADER_SIZE, TRAILER_FLAG};
use crate::error::{FrameError, Result};
use crate::message::{Message, WireFormat, IDENTITY};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Configuration for the deframer.
#[derive(Debug, Clone)]
pub struct DeframerConfig {
    /// Maximum declared payload length. Default: 4 MiB.
    pub max_message_size: usize,
    /// Encoding negotiated for compressed frames, if any.
    pub encoding: Option<String>,
    /// Wire format stamped on every produced message.
    pub wire_format: WireFormat,
}

impl Default for DeframerConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            encoding: None,
            wire_format: WireFormat::Protobuf,
        }
    }
}

/// Incremental frame reassembler.
///
/// Accepts byte chunks of any size and yields complete messages as soon as
/// they are available. A frame declaring more than `max_message_size` bytes
/// is reported once and then discarded without being buffered, even when its
/// payload spans many later chunks.
///
/// Invariant: while `bytes_to_skip > 0` the accumulator is empty.
#[derive(Debug)]
pub struct Deframer {
    buf: BytesMut,
    bytes_to_skip: u64,
    trailer: Option<Bytes>,
    config: DeframerConfig,
}

impl Deframer {
    /// Create a deframer with default configuration.
    pub fn new() -> Self {
        Self::with_config(DeframerConfig::default())
    }

    /// Create a deframer with explicit configuration.
    pub fn with_config(mut config: DeframerConfig) -> Self {
        config.encoding = normalize_encoding(config.encoding);
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            bytes_to_skip: 0,
            trailer: None,
            config,
        }
    }

    /// Append a chunk and return the messages it completes.
    ///
    /// The returned iterator is lazy: messages not pulled from it stay
    /// buffered and are returned by the next `update` or [`drain`](Self::drain).
    pub fn update(&mut self, chunk: &[u8]) -> Drain<'_> {
        self.push(chunk);
        self.drain()
    }

    /// Append a chunk without parsing.
    pub fn push(&mut self, chunk: &[u8]) {
        let mut chunk = chunk;
        if self.bytes_to_skip > 0 {
            let skip = self.bytes_to_skip.min(chunk.len() as u64) as usize;
            chunk = &chunk[skip..];
            self.bytes_to_skip -= skip as u64;
            trace!(
                skipped = skip,
                remaining = self.bytes_to_skip,
                "discarding oversized frame bytes"
            );
        }
        if !chunk.is_empty() {
            self.buf.extend_from_slice(chunk);
        }
    }

    /// Iterate over the messages already buffered.
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { deframer: self }
    }

    /// Parse the next complete frame from the accumulator.
    ///
    /// Returns `None` when more input is needed.
    pub fn next_message(&mut self) -> Option<Result<Message>> {
        loop {
            if self.buf.len() < HEADER_SIZE {
                return None;
            }

            let flags = self.buf[0];
            let length =
                u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;

            if length > self.config.max_message_size {
                self.skip_oversized(length);
                return Some(Err(FrameError::MessageTooLarge {
                    size: length,
                    max: self.config.max_message_size,
                }));
            }

            if self.buf.len() < HEADER_SIZE + length {
                return None;
            }

            self.buf.advance(HEADER_SIZE);
            let payload = self.buf.split_to(length).freeze();

            if flags & TRAILER_FLAG != 0 {
                trace!(len = length, "trailer frame");
                self.trailer = Some(payload);
                continue;
            }

            if flags & COMPRESSED_FLAG == 0 {
                return Some(Ok(Message::identity(self.config.wire_format, payload)));
            }

            return Some(match &self.config.encoding {
                Some(encoding) => Ok(Message::new(
                    encoding.clone(),
                    self.config.wire_format,
                    payload,
                )),
                None => Err(FrameError::CompressedWithoutEncoding),
            });
        }
    }

    fn skip_oversized(&mut self, length: usize) {
        let total = HEADER_SIZE as u64 + length as u64;
        let buffered = self.buf.len() as u64;
        if buffered < total {
            self.bytes_to_skip = total - buffered;
            self.buf.clear();
        } else {
            self.buf.advance(total as usize);
        }
        debug!(
            size = length,
            max = self.config.max_message_size,
            pending_skip = self.bytes_to_skip,
            "skipping oversized frame"
        );
    }

    /// Take the payload of the last trailer frame (web variant), if one arrived.
    pub fn take_trailer_frame(&mut self) -> Option<Bytes> {
        self.trailer.take()
    }

    /// Set the negotiated encoding. `identity` counts as no encoding.
    pub fn set_encoding(&mut self, encoding: Option<String>) {
        self.config.encoding = normalize_encoding(encoding);
    }

    /// Update maximum message size for subsequent frames.
    pub fn set_max_message_size(&mut self, max_message_size: usize) {
        self.config.max_message_size = max_message_size;
    }

    /// Bytes currently held in the accumulator.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Bytes of an oversized frame still to be discarded.
    pub fn bytes_to_skip(&self) -> u64 {
        self.bytes_to_skip
    }

    /// Whether a frame has started but not completed.
    pub fn has_partial_frame(&self) -> bool {
        !self.buf.is_empty() || self.bytes_to_skip > 0
    }

    /// Current deframer configuration.
    pub fn config(&self) -> &DeframerConfig {
        &self.config
    }
}

impl Default for Deframer {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_encoding(encoding: Option<String>) -> Option<String> {
    encoding.filter(|name| !name.eq_ignore_ascii_case(IDENTITY))
}

/// Messages parsed from a [`Deframer`]'s accumulator.
#[derive(Debug)]
pub struct Drain<'a> {
    deframer: &'a mut Deframer,
}

impl Iterator for Drain<'_> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        self.deframer.next_message()
    }
}
