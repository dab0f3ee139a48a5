//! In-process stream pair.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Result, TransportError};
use crate::metadata::Metadata;
use crate::reset::ResetCode;
use crate::traits::{InboundEvent, StreamSink};

/// One endpoint of an in-process stream.
///
/// Everything sent through this endpoint's sink arrives, in order, on the
/// peer endpoint's source. There is no flow-control window: the sink never
/// blocks and the source holds whatever the peer sent until it is polled.
#[derive(Debug)]
pub struct MemoryStream {
    sink: MemorySink,
    source: MemorySource,
}

impl MemoryStream {
    /// Create two connected endpoints.
    pub fn pair() -> (MemoryStream, MemoryStream) {
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();

        let left = MemoryStream {
            sink: MemorySink::new(right_tx),
            source: MemorySource { rx: left_rx },
        };
        let right = MemoryStream {
            sink: MemorySink::new(left_tx),
            source: MemorySource { rx: right_rx },
        };
        (left, right)
    }

    /// Split into outbound and inbound halves.
    pub fn into_split(self) -> (MemorySink, MemorySource) {
        (self.sink, self.source)
    }
}

/// Outbound half of a [`MemoryStream`].
#[derive(Debug)]
pub struct MemorySink {
    tx: mpsc::UnboundedSender<InboundEvent>,
    closed: bool,
    reset: bool,
}

impl MemorySink {
    fn new(tx: mpsc::UnboundedSender<InboundEvent>) -> Self {
        Self {
            tx,
            closed: false,
            reset: false,
        }
    }

    /// Whether the outbound side has been closed or reset.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check_open(&self) -> Result<()> {
        if self.reset {
            return Err(TransportError::Reset);
        }
        if self.closed {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn deliver(&mut self, event: InboundEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| TransportError::Closed)
    }
}

impl StreamSink for MemorySink {
    fn send_headers(&mut self, headers: Metadata, end_stream: bool) -> Result<()> {
        self.check_open()?;
        trace!(entries = headers.len(), end_stream, "memory: headers");
        self.deliver(InboundEvent::Headers {
            metadata: headers,
            end_stream,
        })?;
        if end_stream {
            self.closed = true;
        }
        Ok(())
    }

    fn send_data(&mut self, data: Bytes, end_stream: bool) -> Result<()> {
        self.check_open()?;
        trace!(len = data.len(), end_stream, "memory: data");
        if !data.is_empty() {
            self.deliver(InboundEvent::Data(data))?;
        }
        if end_stream {
            self.deliver(InboundEvent::End)?;
            self.closed = true;
        }
        Ok(())
    }

    fn send_trailers(&mut self, trailers: Metadata) -> Result<()> {
        self.check_open()?;
        trace!(entries = trailers.len(), "memory: trailers");
        self.deliver(InboundEvent::Trailers(trailers))?;
        self.closed = true;
        Ok(())
    }

    fn reset(&mut self, code: ResetCode) {
        if self.reset {
            return;
        }
        trace!(%code, "memory: reset");
        self.reset = true;
        self.closed = true;
        // The peer may already be gone; a reset has nobody to notify then.
        let _ = self.tx.send(InboundEvent::Reset(code));
    }
}

/// Inbound half of a [`MemoryStream`].
#[derive(Debug)]
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<InboundEvent>,
}

impl Stream for MemorySource {
    type Item = InboundEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
