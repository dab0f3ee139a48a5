use bytes::Bytes;
use futures_core::Stream;

use crate::error::Result;
use crate::metadata::Metadata;
use crate::reset::ResetCode;

/// Outbound half of one multiplexed stream.
///
/// Calls never block: implementations queue frames for the connection
/// writer. Once `end_stream` has been signalled (or trailers sent), further
/// sends fail.
pub trait StreamSink: Send {
    /// Send a header block.
    fn send_headers(&mut self, headers: Metadata, end_stream: bool) -> Result<()>;

    /// Send a chunk of body bytes.
    fn send_data(&mut self, data: Bytes, end_stream: bool) -> Result<()>;

    /// Send trailing metadata. Closes the outbound side.
    fn send_trailers(&mut self, trailers: Metadata) -> Result<()>;

    /// Abort the stream in both directions.
    fn reset(&mut self, code: ResetCode);
}

/// An event read from the inbound half of a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// A header block. `end_stream` marks a headers-only (trailers-only) block.
    Headers { metadata: Metadata, end_stream: bool },
    /// A chunk of body bytes, arbitrarily split.
    Data(Bytes),
    /// Trailing metadata. No more events follow.
    Trailers(Metadata),
    /// The peer closed its side without trailers.
    End,
    /// The peer reset the stream.
    Reset(ResetCode),
}

/// Inbound half of one multiplexed stream.
///
/// Sources are pulled: not polling a source is how back-pressure reaches the
/// connection. A source yielding `None` is equivalent to [`InboundEvent::End`].
pub trait StreamSource: Stream<Item = InboundEvent> + Unpin + Send {}

impl<T> StreamSource for T where T: Stream<Item = InboundEvent> + Unpin + Send {}

impl<T: StreamSink + ?Sized> StreamSink for Box<T> {
    fn send_headers(&mut self, headers: Metadata, end_stream: bool) -> Result<()> {
        (**self).send_headers(headers, end_stream)
    }

    fn send_data(&mut self, data: Bytes, end_stream: bool) -> Result<()> {
        (**self).send_data(data, end_stream)
    }

    fn send_trailers(&mut self, trailers: Metadata) -> Result<()> {
        (**self).send_trailers(trailers)
    }

    fn reset(&mut self, code: ResetCode) {
        (**self).reset(code)
    }
}
