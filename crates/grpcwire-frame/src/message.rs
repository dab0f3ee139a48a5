use std::fmt;

use bytes::Bytes;

/// Name of the no-op encoding. Always available.
pub const IDENTITY: &str = "identity";

/// Serialization format of message payloads, from the content-type suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WireFormat {
    #[default]
    Protobuf,
    Json,
}

impl WireFormat {
    /// Content-type suffix (`proto` or `json`).
    pub fn as_str(self) -> &'static str {
        match self {
            WireFormat::Protobuf => "proto",
            WireFormat::Json => "json",
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One gRPC message: a payload plus the encoding it is currently in.
///
/// Messages are immutable; transcoding produces a new message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    encoding: String,
    wire_format: WireFormat,
    payload: Bytes,
}

impl Message {
    /// Create a message in an explicit encoding.
    pub fn new(
        encoding: impl Into<String>,
        wire_format: WireFormat,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            encoding: encoding.into(),
            wire_format,
            payload: payload.into(),
        }
    }

    /// Create an uncompressed message.
    pub fn identity(wire_format: WireFormat, payload: impl Into<Bytes>) -> Self {
        Self::new(IDENTITY, wire_format, payload)
    }

    /// Encoding the payload is currently in.
    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// Whether the payload is uncompressed.
    pub fn is_identity(&self) -> bool {
        self.encoding == IDENTITY
    }

    pub fn wire_format(&self) -> WireFormat {
        self.wire_format
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the message and return its payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// The same payload relabelled with another encoding.
    pub(crate) fn with_payload(&self, encoding: &str, payload: Bytes) -> Self {
        Self {
            encoding: encoding.to_string(),
            wire_format: self.wire_format,
            payload,
        }
    }
}
