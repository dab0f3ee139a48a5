//! Stream reset codes.
//!
//! Reset codes live in the transport's native error-code space (HTTP/2
//! `RST_STREAM` codes). Consumers never see them directly: every reset is
//! translated through [`StreamError::from`] into a small closed set.

use std::fmt;

/// Transport-native reset code (HTTP/2 error code space).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ResetCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ResetCode {
    /// Decode a wire value. Unknown codes are treated as internal errors.
    pub fn from_u32(value: u32) -> Self {
        match value {
            0x0 => ResetCode::NoError,
            0x1 => ResetCode::ProtocolError,
            0x2 => ResetCode::InternalError,
            0x3 => ResetCode::FlowControlError,
            0x4 => ResetCode::SettingsTimeout,
            0x5 => ResetCode::StreamClosed,
            0x6 => ResetCode::FrameSizeError,
            0x7 => ResetCode::RefusedStream,
            0x8 => ResetCode::Cancel,
            0x9 => ResetCode::CompressionError,
            0xa => ResetCode::ConnectError,
            0xb => ResetCode::EnhanceYourCalm,
            0xc => ResetCode::InadequateSecurity,
            0xd => ResetCode::Http11Required,
            _ => ResetCode::InternalError,
        }
    }

    /// Wire value of this code.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ResetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResetCode::NoError => "NO_ERROR",
            ResetCode::ProtocolError => "PROTOCOL_ERROR",
            ResetCode::InternalError => "INTERNAL_ERROR",
            ResetCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ResetCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ResetCode::StreamClosed => "STREAM_CLOSED",
            ResetCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ResetCode::RefusedStream => "REFUSED_STREAM",
            ResetCode::Cancel => "CANCEL",
            ResetCode::CompressionError => "COMPRESSION_ERROR",
            ResetCode::ConnectError => "CONNECT_ERROR",
            ResetCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ResetCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ResetCode::Http11Required => "HTTP_1_1_REQUIRED",
        };
        f.write_str(name)
    }
}

/// Domain error surfaced when a stream is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum StreamError {
    /// The stream was cancelled by the peer.
    #[error("stream cancelled")]
    Cancelled,
    /// The peer refused the stream before processing it.
    #[error("stream refused")]
    Refused,
    /// The peer is shedding load.
    #[error("resource exhausted")]
    ResourceExhausted,
    /// The connection's security does not satisfy the peer.
    #[error("permission denied")]
    PermissionDenied,
    /// Any other reset.
    #[error("internal stream error")]
    Internal,
}

impl From<ResetCode> for StreamError {
    fn from(code: ResetCode) -> Self {
        match code {
            ResetCode::Cancel => StreamError::Cancelled,
            ResetCode::RefusedStream => StreamError::Refused,
            ResetCode::EnhanceYourCalm => StreamError::ResourceExhausted,
            ResetCode::InadequateSecurity => StreamError::PermissionDenied,
            _ => StreamError::Internal,
        }
    }
}
