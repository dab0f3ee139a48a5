//! gRPC call lifecycle on top of grpcwire framing.
//!
//! A [`Call`] drives one RPC over an already-open multiplexed stream:
//! - request and response headers (`:path`, `content-type`, `grpc-timeout`,
//!   `grpc-encoding`, `grpc-accept-encoding`)
//! - flow-controlled inbound messages ([`ReadStream`], [`Incoming`])
//! - outbound messages and half-close or trailers ([`WriteStream`])
//! - deadlines, cancellation and the final [`Status`]
//!
//! Both sides of a call share one engine; [`Role`] selects client or server
//! behavior.

pub mod call;
pub mod codec;
pub mod content_type;
pub mod deadline;
pub mod error;
pub mod path;
pub mod read_stream;
pub mod status;
pub mod timeout;
pub mod web;
pub mod write_stream;

pub use call::{Call, CallOptions, Incoming, Role, ServerOptions};
pub use codec::{BytesCodec, Codec, JsonCodec};
pub use content_type::{ContentType, CONTENT_TYPE};
pub use deadline::{CallContext, Deadline};
pub use error::{CallError, Result, TimeoutError};
pub use path::MethodPath;
pub use read_stream::{BoxSource, ReadStream, ReadStreamConfig};
pub use status::{Code, Status, GRPC_MESSAGE, GRPC_STATUS};
pub use timeout::{encode_duration, encode_timeout, parse_timeout, TimeUnit, GRPC_TIMEOUT};
pub use web::{encode_trailer_frame, parse_trailer_block};
pub use write_stream::{
    BoxSink, CloseMode, WriteState, WriteStream, GRPC_ACCEPT_ENCODING, GRPC_ENCODING,
};
