use std::fmt;

use grpcwire_frame::WireFormat;

/// The `content-type` header name.
pub const CONTENT_TYPE: &str = "content-type";

const GRPC: &str = "application/grpc";
const GRPC_WEB: &str = "application/grpc-web";

/// A parsed gRPC content type: `application/grpc[-web][+proto|+json]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ContentType {
    pub wire_format: WireFormat,
    /// Whether this is the HTTP/1.1-compatible web variant.
    pub web: bool,
}

impl ContentType {
    pub fn new(wire_format: WireFormat, web: bool) -> Self {
        Self { wire_format, web }
    }

    /// Parse a `content-type` value. Parameters after `;` are ignored.
    ///
    /// Returns `None` for anything that is not a gRPC content type.
    pub fn parse(value: &str) -> Option<Self> {
        let essence = value.split(';').next().unwrap_or_default().trim();
        let essence = essence.to_ascii_lowercase();

        let (web, rest) = if let Some(rest) = essence.strip_prefix(GRPC_WEB) {
            (true, rest)
        } else if let Some(rest) = essence.strip_prefix(GRPC) {
            (false, rest)
        } else {
            return None;
        };

        let wire_format = match rest {
            "" | "+proto" => WireFormat::Protobuf,
            "+json" => WireFormat::Json,
            _ => return None,
        };
        Some(Self { wire_format, web })
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = if self.web { GRPC_WEB } else { GRPC };
        match self.wire_format {
            WireFormat::Protobuf => f.write_str(base),
            WireFormat::Json => write!(f, "{base}+json"),
        }
    }
}
