//! Multiplexed byte-stream abstraction underneath gRPC framing.
//!
//! This is the lowest layer of grpcwire. It does not implement HTTP/2; it
//! describes the narrow surface the framing and call layers need from one
//! already-open stream of a multiplexed connection:
//! - header and trailer blocks ([`Metadata`])
//! - outbound writes and resets ([`StreamSink`])
//! - inbound events ([`StreamSource`], [`InboundEvent`])
//! - the static mapping from transport reset codes to [`StreamError`]
//!
//! [`MemoryStream`] connects two endpoints in-process.

pub mod error;
pub mod memory;
pub mod metadata;
pub mod reset;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::{MemorySink, MemorySource, MemoryStream};
pub use metadata::Metadata;
pub use reset::{ResetCode, StreamError};
pub use traits::{InboundEvent, StreamSink, StreamSource};
