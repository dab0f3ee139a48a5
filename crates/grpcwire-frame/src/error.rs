/// Errors that can occur during framing, deframing and compression.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A frame declared a payload larger than the configured maximum.
    ///
    /// Reported once per oversized frame; the stream itself stays usable.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// A frame had the compressed flag set but no encoding was negotiated.
    #[error("compressed frame received without a negotiated grpc-encoding")]
    CompressedWithoutEncoding,

    /// The named encoding is not in the registry.
    #[error("unsupported encoding '{0}'")]
    UnsupportedEncoding(String),

    /// A message cannot be converted between the two encodings.
    #[error("cannot transcode message from '{from}' to '{to}'")]
    UnsupportedTranscode { from: String, to: String },

    /// The compressor or decompressor failed.
    #[error("{encoding} codec failed: {source}")]
    Compression {
        encoding: String,
        source: std::io::Error,
    },

    /// A decompressed payload exceeded the configured maximum.
    #[error("decompressed message exceeds {max} bytes")]
    DecompressedTooLarge { max: usize },
}

impl FrameError {
    /// Whether this error leaves the stream unusable.
    ///
    /// Only an oversized frame is recoverable: the deframer skips it and
    /// resumes with the next frame.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FrameError::MessageTooLarge { .. })
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
