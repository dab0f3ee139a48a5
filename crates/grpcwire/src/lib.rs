//! gRPC wire protocol core.
//!
//! grpcwire implements the parts of gRPC that sit between an HTTP/2-style
//! multiplexed stream and application messages: length-prefixed framing,
//! per-message compression, flow-controlled read and write streams, and the
//! request/response lifecycle with deadlines and status.
//!
//! # Crate Structure
//!
//! - [`transport`]: stream collaborator traits, reset codes, header metadata
//! - [`frame`]: 5-byte message framing, deframer, compression registry
//! - [`call`]: read/write streams and the client/server call engine (behind `call` feature)

/// Re-export transport types.
pub mod transport {
    pub use grpcwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use grpcwire_frame::*;
}

/// Re-export call types (requires `call` feature).
#[cfg(feature = "call")]
pub mod call {
    pub use grpcwire_call::*;
}
