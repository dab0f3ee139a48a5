//! Outbound stream state machine.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use grpcwire_frame::{
    encode_message, CompressionRegistry, FrameError, Message, DEFAULT_MAX_MESSAGE_SIZE, IDENTITY,
    MAX_FRAME_PAYLOAD,
};
use grpcwire_transport::{Metadata, ResetCode, StreamError, StreamSink};
use tracing::{debug, trace};

use crate::error::{CallError, Result};
use crate::web::encode_trailer_frame;

/// Header announcing the outbound message encoding.
pub const GRPC_ENCODING: &str = "grpc-encoding";

/// Header advertising the encodings a peer can decode.
pub const GRPC_ACCEPT_ENCODING: &str = "grpc-accept-encoding";

/// Boxed outbound half of a transport stream.
pub type BoxSink = Box<dyn StreamSink>;

/// Progress of the outbound side. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WriteState {
    Idle,
    HeadersSent,
    TrailersSent,
}

/// How [`WriteStream::end`] closes the outbound side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseMode {
    /// Request side: signal end-of-stream on the last header or data block.
    HalfClose,
    /// Response side: send trailers, or a trailers-only header block when
    /// nothing was written.
    Trailers,
    /// Response side of the web variant: trailers travel in a flagged data frame.
    TrailerFrame,
}

type ErrorHandler = Box<dyn FnOnce(StreamError) + Send>;

/// Outbound half of a call.
///
/// Headers are sent exactly once, before the first message, either by the
/// first write or by `end`. Trailers close the stream. A recorded error is
/// terminal and rejects every later write.
pub struct WriteStream {
    sink: BoxSink,
    state: WriteState,
    error: Option<StreamError>,
    on_error: Option<ErrorHandler>,
    headers: Metadata,
    trailers: Metadata,
    encoding: String,
    mode: CloseMode,
    registry: Arc<CompressionRegistry>,
    max_message_size: usize,
}

impl WriteStream {
    pub fn new(sink: BoxSink, mode: CloseMode, registry: Arc<CompressionRegistry>) -> Self {
        Self {
            sink,
            state: WriteState::Idle,
            error: None,
            on_error: None,
            headers: Metadata::new(),
            trailers: Metadata::new(),
            encoding: IDENTITY.to_string(),
            mode,
            registry,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Limit the size of outbound message payloads.
    ///
    /// Limits above [`MAX_FRAME_PAYLOAD`] are clamped to it.
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size.min(MAX_FRAME_PAYLOAD);
        self
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    pub fn state(&self) -> WriteState {
        self.state
    }

    /// The terminal error, if one was recorded.
    pub fn error(&self) -> Option<StreamError> {
        self.error
    }

    /// Encoding applied to outbound messages.
    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn mode(&self) -> CloseMode {
        self.mode
    }

    /// The header block, as built or as sent.
    pub fn headers(&self) -> &Metadata {
        &self.headers
    }

    /// Mutable headers. Only available before they are sent.
    pub fn headers_mut(&mut self) -> Result<&mut Metadata> {
        if self.state != WriteState::Idle {
            return Err(CallError::InvalidState("headers already sent"));
        }
        Ok(&mut self.headers)
    }

    /// Mutable trailers. Only available before they are sent.
    pub fn trailers_mut(&mut self) -> Result<&mut Metadata> {
        if self.state == WriteState::TrailersSent {
            return Err(CallError::InvalidState("trailers already sent"));
        }
        Ok(&mut self.trailers)
    }

    /// Choose the outbound encoding. Only allowed before headers are sent.
    pub fn set_encoding(&mut self, encoding: &str) -> Result<()> {
        if self.state != WriteState::Idle {
            return Err(CallError::InvalidState(
                "encoding must be set before headers are sent",
            ));
        }
        let compressor = self
            .registry
            .get(encoding)
            .ok_or_else(|| FrameError::UnsupportedEncoding(encoding.to_string()))?;
        self.encoding = compressor.name().to_string();
        Ok(())
    }

    /// Register the handler notified of the terminal error.
    pub fn on_error(&mut self, handler: impl FnOnce(StreamError) + Send + 'static) {
        self.on_error = Some(Box::new(handler));
    }

    /// Record a terminal error. Only the first call has any effect.
    ///
    /// Returns whether this call recorded the error.
    pub fn handle_error(&mut self, err: StreamError) -> bool {
        if self.error.is_some() {
            return false;
        }
        debug!(error = %err, "outbound stream failed");
        self.error = Some(err);
        if let Some(handler) = self.on_error.take() {
            handler(err);
        }
        true
    }

    /// Reset the stream and record the matching terminal error.
    pub fn reset(&mut self, code: ResetCode) {
        if self.error.is_some() {
            return;
        }
        debug!(%code, "resetting outbound stream");
        self.sink.reset(code);
        self.handle_error(code.into());
    }

    /// Send the headers now if they have not been sent yet.
    pub fn flush_headers(&mut self) -> Result<()> {
        self.check_writable()?;
        self.ensure_headers()
    }

    /// Send one message, sending headers first if needed.
    pub fn write(&mut self, message: Message) -> Result<()> {
        self.check_writable()?;
        let frame = self.prepare(message)?;
        self.ensure_headers()?;
        trace!(len = frame.len(), "sending message");
        self.sink.send_data(frame, false)?;
        Ok(())
    }

    /// Send an optional last message, then close the outbound side.
    pub fn end(&mut self, message: Option<Message>) -> Result<()> {
        self.check_writable()?;
        let frame = message.map(|m| self.prepare(m)).transpose()?;

        match self.mode {
            CloseMode::HalfClose => match frame {
                None if self.state == WriteState::Idle => self.send_headers(true)?,
                frame => {
                    self.ensure_headers()?;
                    self.sink.send_data(frame.unwrap_or_default(), true)?;
                }
            },
            CloseMode::Trailers => {
                if let Some(frame) = frame {
                    self.ensure_headers()?;
                    self.sink.send_data(frame, false)?;
                }
                let trailers = std::mem::take(&mut self.trailers);
                if self.state == WriteState::Idle {
                    debug!("sending trailers-only response");
                    self.headers.extend(trailers.clone());
                    self.send_headers(true)?;
                } else {
                    debug!(entries = trailers.len(), "sending trailers");
                    self.sink.send_trailers(trailers.clone())?;
                }
                self.trailers = trailers;
            }
            CloseMode::TrailerFrame => {
                self.ensure_headers()?;
                if let Some(frame) = frame {
                    self.sink.send_data(frame, false)?;
                }
                debug!(entries = self.trailers.len(), "sending trailer frame");
                self.sink
                    .send_data(encode_trailer_frame(&self.trailers), true)?;
            }
        }

        self.state = WriteState::TrailersSent;
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if let Some(err) = self.error {
            return Err(CallError::Stream(err));
        }
        if self.state == WriteState::TrailersSent {
            return Err(CallError::InvalidState("stream already ended"));
        }
        Ok(())
    }

    /// Transcode to the stream encoding and frame the message.
    fn prepare(&self, message: Message) -> Result<Bytes> {
        let message = if message.encoding().eq_ignore_ascii_case(&self.encoding) {
            message
        } else {
            self.registry
                .transcode(&message, &self.encoding, self.max_message_size)?
        };
        let size = message.payload().len();
        if size > self.max_message_size {
            return Err(FrameError::MessageTooLarge {
                size,
                max: self.max_message_size,
            }
            .into());
        }
        Ok(encode_message(&message))
    }

    fn ensure_headers(&mut self) -> Result<()> {
        if self.state == WriteState::Idle {
            self.send_headers(false)?;
        }
        Ok(())
    }

    fn send_headers(&mut self, end_stream: bool) -> Result<()> {
        if self.encoding != IDENTITY {
            self.headers.set(GRPC_ENCODING, self.encoding.clone());
        }
        debug!(entries = self.headers.len(), end_stream, "sending headers");
        self.sink.send_headers(self.headers.clone(), end_stream)?;
        self.state = WriteState::HeadersSent;
        Ok(())
    }
}

impl fmt::Debug for WriteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteStream")
            .field("state", &self.state)
            .field("error", &self.error)
            .field("encoding", &self.encoding)
            .field("mode", &self.mode)
            .finish()
    }
}
