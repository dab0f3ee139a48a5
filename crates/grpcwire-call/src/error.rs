use std::time::Duration;

use grpcwire_transport::StreamError;

use crate::status::{Code, Status};

/// Errors produced while encoding or parsing `grpc-timeout`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutError {
    /// The header value does not match `^[0-9]{1,8}[HMSmun]$`.
    #[error("malformed grpc-timeout '{0}'")]
    Malformed(String),

    /// The duration needs more than 8 digits even in hours.
    #[error("timeout {0:?} cannot be expressed in grpc-timeout")]
    Unrepresentable(Duration),
}

/// Errors that can occur during a call.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] grpcwire_transport::TransportError),

    /// Frame-level error. `MessageTooLarge` is per-message and non-fatal.
    #[error("frame error: {0}")]
    Frame(#[from] grpcwire_frame::FrameError),

    /// The operation is not allowed in the stream's current state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The peer reset the stream.
    #[error("stream reset by peer: {0}")]
    Stream(#[from] StreamError),

    /// The call completed with a non-OK status.
    #[error("call failed: {0}")]
    Status(Status),

    /// The peer violated the gRPC protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A message could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A value could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// Timeout header error.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// The propagated deadline had already passed when the call was created.
    #[error("deadline already expired")]
    DeadlineExpired,

    /// The call was cancelled locally.
    #[error("call cancelled")]
    Cancelled,

    /// The call's deadline fired before it completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The inbound stream ended without any message.
    #[error("stream ended without a message")]
    NoMessage,
}

impl CallError {
    /// The gRPC status that best describes this error.
    pub fn to_status(&self) -> Status {
        match self {
            CallError::Status(status) => status.clone(),
            CallError::Stream(err) => Status::from(*err),
            CallError::Cancelled => Status::new(Code::Cancelled, self.to_string()),
            CallError::DeadlineExceeded | CallError::DeadlineExpired => {
                Status::new(Code::DeadlineExceeded, self.to_string())
            }
            CallError::Frame(grpcwire_frame::FrameError::MessageTooLarge { .. }) => {
                Status::new(Code::ResourceExhausted, self.to_string())
            }
            CallError::Frame(grpcwire_frame::FrameError::UnsupportedEncoding(_)) => {
                Status::new(Code::Unimplemented, self.to_string())
            }
            CallError::Decode(_) | CallError::Encode(_) | CallError::Protocol(_) => {
                Status::new(Code::Internal, self.to_string())
            }
            _ => Status::new(Code::Unknown, self.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_error_maps_to_status() {
        let err = CallError::from(StreamError::Cancelled);
        assert_eq!(err.to_status().code(), Code::Cancelled);
    }

    #[test]
    fn oversized_is_resource_exhausted() {
        let err = CallError::from(grpcwire_frame::FrameError::MessageTooLarge { size: 10, max: 5 });
        assert_eq!(err.to_status().code(), Code::ResourceExhausted);
    }

    #[test]
    fn deadline_errors_are_deadline_exceeded() {
        assert_eq!(
            CallError::DeadlineExceeded.to_status().code(),
            Code::DeadlineExceeded
        );
        assert_eq!(
            CallError::DeadlineExpired.to_status().code(),
            Code::DeadlineExceeded
        );
    }
}
