//! Message compression.
//!
//! Compressors are looked up by their `grpc-encoding` name. The registry is
//! assembled once through [`CompressionRegistryBuilder`] and is read-only
//! afterwards, so it can be shared between streams behind an `Arc`.

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use tracing::trace;

use crate::error::{FrameError, Result};
use crate::message::{Message, IDENTITY};

/// A named compression algorithm.
pub trait Compressor: Send + Sync {
    /// The `grpc-encoding` token for this algorithm.
    fn name(&self) -> &str;

    /// Compress a whole payload.
    fn compress(&self, data: &[u8]) -> Result<Bytes>;

    /// Decompress a whole payload, failing if the output would exceed `max_len`.
    fn decompress(&self, data: &[u8], max_len: usize) -> Result<Bytes>;
}

/// The no-op encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Compressor for Identity {
    fn name(&self) -> &str {
        IDENTITY
    }

    fn compress(&self, data: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(data))
    }

    fn decompress(&self, data: &[u8], max_len: usize) -> Result<Bytes> {
        if data.len() > max_len {
            return Err(FrameError::DecompressedTooLarge { max: max_len });
        }
        Ok(Bytes::copy_from_slice(data))
    }
}

/// gzip (RFC 1952).
#[derive(Debug, Clone, Copy)]
pub struct Gzip {
    level: flate2::Compression,
}

impl Gzip {
    /// gzip at an explicit compression level (0-9).
    pub fn with_level(level: u32) -> Self {
        Self {
            level: flate2::Compression::new(level.min(9)),
        }
    }
}

impl Default for Gzip {
    fn default() -> Self {
        Self {
            level: flate2::Compression::default(),
        }
    }
}

impl Compressor for Gzip {
    fn name(&self) -> &str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> Result<Bytes> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), self.level);
        encoder
            .write_all(data)
            .map_err(|err| codec_error(self.name(), err))?;
        let out = encoder.finish().map_err(|err| codec_error(self.name(), err))?;
        Ok(Bytes::from(out))
    }

    fn decompress(&self, data: &[u8], max_len: usize) -> Result<Bytes> {
        read_bounded(self.name(), GzDecoder::new(data), max_len)
    }
}

/// Raw deflate (RFC 1951).
#[derive(Debug, Clone, Copy)]
pub struct Deflate {
    level: flate2::Compression,
}

impl Deflate {
    /// deflate at an explicit compression level (0-9).
    pub fn with_level(level: u32) -> Self {
        Self {
            level: flate2::Compression::new(level.min(9)),
        }
    }
}

impl Default for Deflate {
    fn default() -> Self {
        Self {
            level: flate2::Compression::default(),
        }
    }
}

impl Compressor for Deflate {
    fn name(&self) -> &str {
        "deflate"
    }

    fn compress(&self, data: &[u8]) -> Result<Bytes> {
        let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2 + 16), self.level);
        encoder
            .write_all(data)
            .map_err(|err| codec_error(self.name(), err))?;
        let out = encoder.finish().map_err(|err| codec_error(self.name(), err))?;
        Ok(Bytes::from(out))
    }

    fn decompress(&self, data: &[u8], max_len: usize) -> Result<Bytes> {
        read_bounded(self.name(), DeflateDecoder::new(data), max_len)
    }
}

fn codec_error(encoding: &str, source: std::io::Error) -> FrameError {
    FrameError::Compression {
        encoding: encoding.to_string(),
        source,
    }
}

/// Read a decoder to the end, reading at most one byte past `max_len`.
fn read_bounded(encoding: &str, decoder: impl Read, max_len: usize) -> Result<Bytes> {
    let limit = (max_len as u64).saturating_add(1);
    let mut out = Vec::new();
    decoder
        .take(limit)
        .read_to_end(&mut out)
        .map_err(|err| codec_error(encoding, err))?;
    if out.len() > max_len {
        return Err(FrameError::DecompressedTooLarge { max: max_len });
    }
    Ok(Bytes::from(out))
}

/// Immutable set of compressors keyed by encoding name.
#[derive(Clone)]
pub struct CompressionRegistry {
    compressors: Vec<Arc<dyn Compressor>>,
}

impl CompressionRegistry {
    /// Start an empty registry. `identity` is always present after `build()`.
    pub fn builder() -> CompressionRegistryBuilder {
        CompressionRegistryBuilder {
            compressors: Vec::new(),
        }
    }

    /// A registry holding only `identity`.
    pub fn identity_only() -> Self {
        Self::builder().build()
    }

    /// Look up a compressor by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Compressor>> {
        self.compressors
            .iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
    }

    pub fn supports(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.compressors.iter().map(|c| c.name())
    }

    /// Value for the `grpc-accept-encoding` header.
    pub fn accept_encoding(&self) -> String {
        self.names().collect::<Vec<_>>().join(",")
    }

    /// Compress a payload with the named encoding.
    pub fn compress(&self, encoding: &str, data: &[u8]) -> Result<Bytes> {
        let compressor = self.lookup(encoding)?;
        compressor.compress(data)
    }

    /// Decompress a payload from the named encoding.
    pub fn decompress(&self, encoding: &str, data: &[u8], max_len: usize) -> Result<Bytes> {
        let compressor = self.lookup(encoding)?;
        compressor.decompress(data, max_len)
    }

    /// Decompress a message to `identity`. Identity messages are returned as is.
    pub fn decode(&self, message: &Message, max_len: usize) -> Result<Message> {
        self.transcode(message, IDENTITY, max_len)
    }

    /// Re-encode a message into `target`.
    ///
    /// Fails with [`FrameError::UnsupportedTranscode`] when either side is not
    /// registered; the payload is never passed through under the wrong label.
    pub fn transcode(&self, message: &Message, target: &str, max_len: usize) -> Result<Message> {
        let source = message.encoding();
        if source.eq_ignore_ascii_case(target) {
            return Ok(message.clone());
        }

        let (Some(from), Some(to)) = (self.get(source), self.get(target)) else {
            return Err(FrameError::UnsupportedTranscode {
                from: source.to_string(),
                to: target.to_string(),
            });
        };

        trace!(from = source, to = target, "transcoding message");

        let plain = if message.is_identity() {
            message.payload().clone()
        } else {
            from.decompress(message.payload(), max_len)?
        };

        if to.name() == IDENTITY {
            return Ok(message.with_payload(IDENTITY, plain));
        }
        let packed = to.compress(&plain)?;
        Ok(message.with_payload(to.name(), packed))
    }

    fn lookup(&self, encoding: &str) -> Result<&Arc<dyn Compressor>> {
        self.get(encoding)
            .ok_or_else(|| FrameError::UnsupportedEncoding(encoding.to_string()))
    }
}

impl Default for CompressionRegistry {
    /// `identity`, `gzip` and `deflate`.
    fn default() -> Self {
        Self::builder()
            .register(Gzip::default())
            .register(Deflate::default())
            .build()
    }
}

impl fmt::Debug for CompressionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Collects compressors before the registry is frozen.
pub struct CompressionRegistryBuilder {
    compressors: Vec<Arc<dyn Compressor>>,
}

impl CompressionRegistryBuilder {
    /// Add a compressor. A later registration replaces an earlier one with
    /// the same name.
    pub fn register(mut self, compressor: impl Compressor + 'static) -> Self {
        self.compressors
            .retain(|c| !c.name().eq_ignore_ascii_case(compressor.name()));
        self.compressors.push(Arc::new(compressor));
        self
    }

    /// Freeze the registry. `identity` is inserted first if missing.
    pub fn build(mut self) -> CompressionRegistry {
        if !self.compressors.iter().any(|c| c.name() == IDENTITY) {
            self.compressors.insert(0, Arc::new(Identity));
        }
        CompressionRegistry {
            compressors: self.compressors,
        }
    }
}
