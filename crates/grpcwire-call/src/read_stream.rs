//! Flow-controlled inbound message stream.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::StreamExt;
use grpcwire_frame::{
    CompressionRegistry, Deframer, DeframerConfig, FrameError, Message, WireFormat,
    DEFAULT_MAX_MESSAGE_SIZE,
};
use grpcwire_transport::{InboundEvent, Metadata, StreamError, StreamSource};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::Codec;
use crate::error::{CallError, Result};
use crate::web::parse_trailer_block;

/// Boxed inbound half of a transport stream.
pub type BoxSource = Box<dyn StreamSource>;

/// Read stream configuration.
#[derive(Debug, Clone)]
pub struct ReadStreamConfig {
    /// Maximum size of one message, before and after decompression.
    pub max_message_size: usize,
    /// Maximum number of decoded messages held ahead of the consumer.
    pub high_watermark: usize,
}

impl Default for ReadStreamConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            high_watermark: 16,
        }
    }
}

#[derive(Debug)]
enum Queued {
    Message(Message),
    Oversized(FrameError),
}

/// How the inbound side ended.
#[derive(Debug, Clone)]
enum Terminal {
    Trailers(Metadata),
    End,
    Reset(StreamError),
    Protocol(String),
}

/// Credit-based producer of inbound messages.
///
/// The transport is only polled while the consumer holds credit and no
/// message is ready, so an idle or paused consumer pushes back on the peer.
/// Messages are handed out in arrival order and the end of the stream is
/// observed only after every buffered message was delivered.
pub struct ReadStream {
    source: Option<BoxSource>,
    deframer: Deframer,
    queue: VecDeque<Queued>,
    terminal: Option<Terminal>,
    demand: u64,
    config: ReadStreamConfig,
    registry: Arc<CompressionRegistry>,
    cancel: CancellationToken,
}

impl ReadStream {
    /// Wrap a transport source.
    ///
    /// `encoding` is the peer's negotiated `grpc-encoding`, if any.
    pub fn new(
        source: BoxSource,
        encoding: Option<String>,
        wire_format: WireFormat,
        registry: Arc<CompressionRegistry>,
        mut config: ReadStreamConfig,
    ) -> Self {
        config.high_watermark = config.high_watermark.max(1);
        let deframer = Deframer::with_config(DeframerConfig {
            max_message_size: config.max_message_size,
            encoding,
            wire_format,
        });
        Self {
            source: Some(source),
            deframer,
            queue: VecDeque::new(),
            terminal: None,
            demand: u64::MAX,
            config,
            registry,
            cancel: CancellationToken::new(),
        }
    }

    /// A stream that has already ended, optionally with trailers.
    pub fn finished(trailers: Option<Metadata>, registry: Arc<CompressionRegistry>) -> Self {
        Self {
            source: None,
            deframer: Deframer::new(),
            queue: VecDeque::new(),
            terminal: Some(trailers.map_or(Terminal::End, Terminal::Trailers)),
            demand: u64::MAX,
            config: ReadStreamConfig::default(),
            registry,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort pending and future reads when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Stop delivering messages.
    pub fn pause(&mut self) {
        self.demand = 0;
    }

    /// Deliver messages without limit.
    pub fn resume(&mut self) {
        self.demand = u64::MAX;
    }

    /// Grant credit for `n` more messages.
    pub fn fetch(&mut self, n: u64) {
        self.demand = self.demand.saturating_add(n);
    }

    pub fn is_paused(&self) -> bool {
        self.demand == 0
    }

    /// Outstanding credit. `u64::MAX` means unbounded.
    pub fn demand(&self) -> u64 {
        self.demand
    }

    /// Decoded messages waiting for the consumer.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Whether the end of the stream has been delivered to the consumer.
    pub fn is_finished(&self) -> bool {
        self.terminal.is_some() && self.queue.is_empty()
    }

    /// Trailers received at the end of the stream.
    pub fn trailers(&self) -> Option<&Metadata> {
        match &self.terminal {
            Some(Terminal::Trailers(trailers)) if self.queue.is_empty() => Some(trailers),
            _ => None,
        }
    }

    /// Next message, or `None` once the stream has ended.
    ///
    /// An oversized frame yields [`FrameError::MessageTooLarge`]; the stream
    /// stays usable and the next call continues with the following message.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        if self.demand == 0 {
            return Err(CallError::InvalidState("read stream is paused"));
        }

        loop {
            self.fill_queue();

            if let Some(item) = self.queue.pop_front() {
                return match item {
                    Queued::Message(message) => {
                        if self.demand != u64::MAX {
                            self.demand -= 1;
                        }
                        Ok(Some(message))
                    }
                    Queued::Oversized(err) => Err(err.into()),
                };
            }

            match &self.terminal {
                Some(Terminal::Trailers(_)) | Some(Terminal::End) => return Ok(None),
                Some(Terminal::Reset(err)) => return Err(CallError::Stream(*err)),
                Some(Terminal::Protocol(reason)) => {
                    return Err(CallError::Protocol(reason.clone()));
                }
                None => {}
            }

            self.pull().await?;
        }
    }

    /// Read to the end of the stream and return the final message.
    ///
    /// Oversized messages are skipped. Fails with [`CallError::NoMessage`]
    /// when the stream carried no message within the size limit.
    pub async fn last(&mut self) -> Result<Message> {
        self.resume();
        let mut last = None;
        while let Some(message) = self.recv_within_limit().await? {
            last = Some(message);
        }
        last.ok_or(CallError::NoMessage)
    }

    /// Like [`recv`](Self::recv), but skips oversized messages.
    pub async fn recv_within_limit(&mut self) -> Result<Option<Message>> {
        loop {
            match self.recv().await {
                Err(CallError::Frame(err)) if !err.is_fatal() => {
                    warn!(error = %err, "dropping oversized message while draining");
                }
                other => return other,
            }
        }
    }

    /// Decompress a message and decode it with `codec`.
    pub fn decode<C: Codec>(&self, codec: &C, message: &Message) -> Result<C::Decode> {
        let plain = self
            .registry
            .decode(message, self.config.max_message_size)
            .map_err(|err| CallError::Decode(err.to_string()))?;
        codec.decode(plain.payload(), plain.wire_format())
    }

    fn fill_queue(&mut self) {
        if matches!(self.terminal, Some(Terminal::Protocol(_)) | Some(Terminal::Reset(_))) {
            return;
        }

        while self.queue.len() < self.config.high_watermark {
            match self.deframer.next_message() {
                Some(Ok(message)) => self.queue.push_back(Queued::Message(message)),
                Some(Err(err)) if !err.is_fatal() => {
                    debug!(error = %err, "skipping oversized inbound message");
                    self.queue.push_back(Queued::Oversized(err));
                }
                Some(Err(err)) => {
                    warn!(error = %err, "inbound framing error");
                    self.finish(Terminal::Protocol(err.to_string()));
                    return;
                }
                None => break,
            }
        }

        if let Some(block) = self.deframer.take_trailer_frame() {
            let terminal = match parse_trailer_block(&block) {
                Ok(trailers) => Terminal::Trailers(trailers),
                Err(err) => Terminal::Protocol(err.to_string()),
            };
            self.finish(terminal);
        }
    }

    async fn pull(&mut self) -> Result<()> {
        let Some(source) = self.source.as_mut() else {
            self.finish(Terminal::End);
            return Ok(());
        };

        let event = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(CallError::Cancelled),
            event = source.next() => event,
        };

        match event {
            Some(InboundEvent::Data(chunk)) => {
                trace!(len = chunk.len(), "inbound data");
                self.deframer.push(&chunk);
            }
            Some(InboundEvent::Trailers(trailers)) => self.finish(Terminal::Trailers(trailers)),
            Some(InboundEvent::Headers {
                metadata,
                end_stream: true,
            }) => self.finish(Terminal::Trailers(metadata)),
            Some(InboundEvent::Headers { .. }) => {
                self.finish(Terminal::Protocol("unexpected header block mid-stream".into()));
            }
            Some(InboundEvent::End) | None => self.finish(Terminal::End),
            Some(InboundEvent::Reset(code)) => {
                debug!(%code, "inbound stream reset");
                self.finish(Terminal::Reset(code.into()));
            }
        }
        Ok(())
    }

    fn finish(&mut self, terminal: Terminal) {
        if self.terminal.is_some() {
            return;
        }
        let terminal = match terminal {
            Terminal::Reset(err) => {
                self.queue.clear();
                Terminal::Reset(err)
            }
            Terminal::Trailers(_) | Terminal::End if self.deframer.has_partial_frame() => {
                Terminal::Protocol("stream ended inside a message frame".into())
            }
            other => other,
        };
        trace!(?terminal, "inbound stream finished");
        self.terminal = Some(terminal);
        self.source = None;
    }
}

impl std::fmt::Debug for ReadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadStream")
            .field("queued", &self.queue.len())
            .field("demand", &self.demand)
            .field("terminal", &self.terminal)
            .finish()
    }
}
