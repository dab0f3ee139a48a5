//! Duplex call engine shared by the client and server sides.
//!
//! A [`Call`] owns the outbound [`WriteStream`] and hands out the inbound
//! side as an [`Incoming`] once the peer's headers are known. The side of
//! the call ([`Role`]) decides who sends headers first, how the outbound
//! side is closed and in which direction the status travels.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use grpcwire_frame::{CompressionRegistry, Message, DEFAULT_MAX_MESSAGE_SIZE, IDENTITY};
use grpcwire_transport::{InboundEvent, Metadata, ResetCode, StreamError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::Codec;
use crate::content_type::{ContentType, CONTENT_TYPE};
use crate::deadline::{CallContext, Deadline};
use crate::error::{CallError, Result, TimeoutError};
use crate::path::MethodPath;
use crate::read_stream::{BoxSource, ReadStream, ReadStreamConfig};
use crate::status::{Code, Status};
use crate::timeout::{encode_duration, parse_timeout, GRPC_TIMEOUT};
use crate::write_stream::{
    BoxSink, CloseMode, WriteState, WriteStream, GRPC_ACCEPT_ENCODING, GRPC_ENCODING,
};

/// Which end of the call this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Issues the request and reads the status from the response.
    Client,
    /// Handles the request and sends the status in its trailers.
    Server,
}

/// Options for an outgoing call.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub path: MethodPath,
    pub authority: Option<String>,
    /// Value of `:scheme`. Default: `http`.
    pub scheme: String,
    /// Requested timeout. Overridden by a deadline in `context`.
    pub timeout: Option<Duration>,
    /// Context of the enclosing call, if any.
    pub context: CallContext,
    /// Request message encoding. `None` sends uncompressed messages.
    pub encoding: Option<String>,
    /// Cancel the call locally when its timeout elapses. Default: true.
    pub schedule_deadline: bool,
    /// Maximum inbound and outbound message size. Default: 4 MiB.
    pub max_message_size: usize,
    /// Use the `application/grpc-web` content type.
    pub web: bool,
    /// Custom request metadata.
    pub metadata: Metadata,
}

impl CallOptions {
    pub fn new(path: MethodPath) -> Self {
        Self {
            path,
            authority: None,
            scheme: "http".to_string(),
            timeout: None,
            context: CallContext::default(),
            encoding: None,
            schedule_deadline: true,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            web: false,
            metadata: Metadata::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Propagate the deadline of an enclosing call.
    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key, value);
        self
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn with_web(mut self, web: bool) -> Self {
        self.web = web;
        self
    }

    /// Send `grpc-timeout` without arming a local timer.
    pub fn without_deadline_scheduling(mut self) -> Self {
        self.schedule_deadline = false;
        self
    }
}

/// Options for accepting an incoming call.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Maximum inbound and outbound message size. Default: 4 MiB.
    pub max_message_size: usize,
    /// Preferred response encoding, used only if the client accepts it.
    pub encoding: Option<String>,
    /// Cancel the call when the client's timeout elapses. Default: true.
    pub schedule_deadline: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            encoding: None,
            schedule_deadline: true,
        }
    }
}

/// State shared between a call, its inbound half and its deadline timer.
struct Shared {
    write: Mutex<WriteStream>,
    deadline: Mutex<Deadline>,
    token: CancellationToken,
    cancelled: AtomicBool,
    expired: AtomicBool,
    /// The response ended cleanly; a late cancel must not reset the stream.
    completed: AtomicBool,
    /// The peer reset the stream; nothing more goes out on it.
    peer_reset: AtomicBool,
}

impl Shared {
    fn new(write: WriteStream) -> Arc<Self> {
        Arc::new(Self {
            write: Mutex::new(write),
            deadline: Mutex::new(Deadline::unscheduled(None)),
            token: CancellationToken::new(),
            cancelled: AtomicBool::new(false),
            expired: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            peer_reset: AtomicBool::new(false),
        })
    }

    fn write(&self) -> MutexGuard<'_, WriteStream> {
        self.write.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deadline(&self) -> MutexGuard<'_, Deadline> {
        self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arm the deadline timer, replacing any previous one.
    fn arm(shared: &Arc<Self>, timeout: Duration) -> Result<()> {
        let weak = Arc::downgrade(shared);
        let deadline = Deadline::schedule(timeout, move || {
            if let Some(shared) = weak.upgrade() {
                shared.expire();
            }
        })?;
        *shared.deadline() = deadline;
        Ok(())
    }

    fn disarm(&self) {
        self.deadline().cancel();
    }

    fn is_terminal(&self) -> bool {
        self.completed.load(Ordering::Acquire) || self.peer_reset.load(Ordering::Acquire)
    }

    fn expire(&self) {
        if self.cancelled.load(Ordering::Acquire) || self.is_terminal() {
            trace!("deadline fired after the call completed");
            return;
        }
        debug!("call deadline exceeded");
        self.expired.store(true, Ordering::Release);
        self.cancel();
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.disarm();
        if !self.is_terminal() {
            debug!("cancelling call");
            self.write().reset(ResetCode::Cancel);
        }
        self.token.cancel();
    }

    /// Abort the call after a protocol violation by the peer.
    fn fail(&self, code: ResetCode) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.disarm();
        if !self.peer_reset.load(Ordering::Acquire) {
            self.write().reset(code);
        }
        self.token.cancel();
    }

    /// Record a reset received from the peer.
    fn reset_by_peer(&self, err: StreamError) {
        if self.peer_reset.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(error = %err, "stream reset by peer");
        self.write().handle_error(err);
        self.disarm();
    }

    fn complete(&self) {
        self.completed.store(true, Ordering::Release);
        self.disarm();
    }

    /// Report local cancellation as such rather than as a stream error.
    fn map_error(&self, err: CallError) -> CallError {
        let local = matches!(
            err,
            CallError::Cancelled | CallError::Stream(StreamError::Cancelled)
        ) && self.cancelled.load(Ordering::Acquire);
        if !local {
            return err;
        }
        if self.expired.load(Ordering::Acquire) {
            CallError::DeadlineExceeded
        } else {
            CallError::Cancelled
        }
    }
}

enum Inbound {
    /// Client: response headers not read yet.
    Pending(BoxSource),
    /// Server: request headers already validated.
    Ready(Metadata, ReadStream),
}

/// One gRPC call, from either side.
pub struct Call<C: Codec> {
    role: Role,
    codec: C,
    path: MethodPath,
    context: CallContext,
    ambient: CallContext,
    request_headers: Option<Metadata>,
    shared: Arc<Shared>,
    inbound: Option<Inbound>,
    registry: Arc<CompressionRegistry>,
    read_config: ReadStreamConfig,
    schedule_deadline: bool,
}

impl<C: Codec> Call<C> {
    /// Start an outgoing call on an open stream.
    ///
    /// Request headers are prepared but not sent until the first message,
    /// [`close_send`](Self::close_send) or [`incoming`](Self::incoming).
    pub fn connect(
        sink: BoxSink,
        source: BoxSource,
        options: CallOptions,
        codec: C,
        registry: Arc<CompressionRegistry>,
    ) -> Result<Self> {
        let timeout = options.context.effective_timeout(options.timeout)?;
        let content_type = ContentType::new(codec.wire_format(), options.web);

        let mut write = WriteStream::new(sink, CloseMode::HalfClose, registry.clone())
            .with_max_message_size(options.max_message_size);
        {
            let headers = write.headers_mut()?;
            headers.insert(":method", "POST");
            headers.insert(":scheme", options.scheme.as_str());
            headers.insert(":path", options.path.as_str());
            if let Some(authority) = &options.authority {
                headers.insert(":authority", authority.as_str());
            }
            headers.insert(CONTENT_TYPE, content_type.to_string());
            headers.insert("te", "trailers");
            if let Some(timeout) = timeout {
                let value = encode_duration(timeout).ok_or(TimeoutError::Unrepresentable(timeout))?;
                headers.insert(GRPC_TIMEOUT, value);
            }
            headers.insert(GRPC_ACCEPT_ENCODING, registry.accept_encoding());
            headers.extend(options.metadata);
        }
        if let Some(encoding) = &options.encoding {
            write.set_encoding(encoding)?;
        }

        let context = match (options.context.deadline(), timeout) {
            (Some(deadline), _) => CallContext::with_deadline(deadline),
            (None, Some(timeout)) => CallContext::with_timeout(timeout),
            (None, None) => CallContext::new(),
        };

        let shared = Shared::new(write);
        if let (Some(timeout), true) = (timeout, options.schedule_deadline) {
            Shared::arm(&shared, timeout)?;
        }

        debug!(path = %options.path, ?timeout, "starting call");
        Ok(Self {
            role: Role::Client,
            codec,
            path: options.path,
            context,
            ambient: options.context,
            request_headers: None,
            shared,
            inbound: Some(Inbound::Pending(source)),
            registry,
            read_config: ReadStreamConfig {
                max_message_size: options.max_message_size,
                ..Default::default()
            },
            schedule_deadline: options.schedule_deadline,
        })
    }

    /// Read and validate the request headers of an incoming call.
    ///
    /// Malformed requests are answered here: a bad content type or timeout
    /// resets the stream, an unknown method path or request encoding gets a
    /// trailers-only `UNIMPLEMENTED` response.
    pub async fn accept(
        mut sink: BoxSink,
        mut source: BoxSource,
        options: ServerOptions,
        codec: C,
        registry: Arc<CompressionRegistry>,
    ) -> Result<Self> {
        let (headers, end_stream) = match source.next().await {
            Some(InboundEvent::Headers {
                metadata,
                end_stream,
            }) => (metadata, end_stream),
            Some(InboundEvent::Reset(code)) => return Err(CallError::Stream(code.into())),
            Some(_) => {
                sink.reset(ResetCode::ProtocolError);
                return Err(CallError::Protocol(
                    "request did not start with headers".into(),
                ));
            }
            None => {
                return Err(CallError::Protocol(
                    "stream closed before request headers".into(),
                ));
            }
        };

        let Some(content_type) = headers.get(CONTENT_TYPE).and_then(ContentType::parse) else {
            warn!(content_type = ?headers.get(CONTENT_TYPE), "rejecting non-gRPC request");
            sink.reset(ResetCode::ProtocolError);
            return Err(CallError::Protocol(format!(
                "invalid content-type {:?}",
                headers.get(CONTENT_TYPE)
            )));
        };

        let timeout = match headers.get(GRPC_TIMEOUT).map(parse_timeout).transpose() {
            Ok(timeout) => timeout,
            Err(err) => {
                warn!(error = %err, "rejecting request with bad timeout");
                sink.reset(ResetCode::ProtocolError);
                return Err(CallError::Protocol(err.to_string()));
            }
        };

        let mode = if content_type.web {
            CloseMode::TrailerFrame
        } else {
            CloseMode::Trailers
        };
        let mut write = WriteStream::new(sink, mode, registry.clone())
            .with_max_message_size(options.max_message_size);
        {
            let response = write.headers_mut()?;
            response.insert(":status", "200");
            response.insert(CONTENT_TYPE, content_type.to_string());
            response.insert(GRPC_ACCEPT_ENCODING, registry.accept_encoding());
        }

        let path = match headers.get(":path").map(MethodPath::parse) {
            Some(Ok(path)) => path,
            _ => {
                return Err(reject(
                    write,
                    Status::unimplemented(format!(
                        "malformed method path {:?}",
                        headers.get(":path")
                    )),
                ));
            }
        };

        let inbound_encoding = headers
            .get(GRPC_ENCODING)
            .filter(|encoding| !encoding.eq_ignore_ascii_case(IDENTITY))
            .map(str::to_string);
        if let Some(encoding) = &inbound_encoding {
            if !registry.supports(encoding) {
                return Err(reject(
                    write,
                    Status::unimplemented(format!("unsupported grpc-encoding '{encoding}'")),
                ));
            }
        }

        if let Some(encoding) = &options.encoding {
            if accepts_encoding(&headers, encoding) {
                write.set_encoding(encoding)?;
            } else {
                trace!(%encoding, "client does not accept preferred response encoding");
            }
        }

        let context = timeout.map_or_else(CallContext::new, CallContext::with_timeout);
        let shared = Shared::new(write);
        if let (Some(timeout), true) = (timeout, options.schedule_deadline) {
            Shared::arm(&shared, timeout)?;
        }

        let read_config = ReadStreamConfig {
            max_message_size: options.max_message_size,
            ..Default::default()
        };
        let read = if end_stream {
            ReadStream::finished(None, registry.clone())
        } else {
            ReadStream::new(
                source,
                inbound_encoding,
                content_type.wire_format,
                registry.clone(),
                read_config.clone(),
            )
            .with_cancellation(shared.token.clone())
        };

        debug!(%path, ?timeout, web = content_type.web, "accepted call");
        Ok(Self {
            role: Role::Server,
            codec,
            path,
            context,
            ambient: CallContext::new(),
            request_headers: Some(headers.clone()),
            shared,
            inbound: Some(Inbound::Ready(headers, read)),
            registry,
            read_config,
            schedule_deadline: options.schedule_deadline,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn path(&self) -> &MethodPath {
        &self.path
    }

    /// Fully-qualified service name from the request path.
    pub fn service(&self) -> &str {
        self.path.service()
    }

    /// Method name from the request path.
    pub fn method(&self) -> &str {
        self.path.method()
    }

    /// Context to pass to calls made on behalf of this one.
    pub fn context(&self) -> CallContext {
        self.context
    }

    /// Headers of the incoming request (server side only).
    pub fn request_headers(&self) -> Option<&Metadata> {
        self.request_headers.as_ref()
    }

    pub fn write_state(&self) -> WriteState {
        self.shared.write().state()
    }

    /// Encoding applied to outbound messages.
    pub fn encoding(&self) -> String {
        self.shared.write().encoding().to_string()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// Whether the deadline timer is still pending.
    pub fn is_deadline_armed(&self) -> bool {
        self.shared.deadline().is_armed()
    }

    /// Choose the outbound encoding. Only allowed before headers are sent.
    pub fn set_encoding(&self, encoding: &str) -> Result<()> {
        self.shared.write().set_encoding(encoding)
    }

    /// Set the call timeout. Only allowed on the client, before headers are sent.
    ///
    /// A deadline inherited through [`CallOptions::context`] takes precedence.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if self.role != Role::Client {
            return Err(CallError::InvalidState("only outgoing calls carry a timeout"));
        }
        let effective = self
            .ambient
            .effective_timeout(Some(timeout))?
            .unwrap_or(timeout);

        {
            let mut write = self.shared.write();
            let headers = write.headers_mut()?;
            let value =
                encode_duration(effective).ok_or(TimeoutError::Unrepresentable(effective))?;
            headers.set(GRPC_TIMEOUT, value);
        }

        self.context = match self.ambient.deadline() {
            Some(deadline) => CallContext::with_deadline(deadline),
            None => CallContext::with_timeout(effective),
        };
        if self.schedule_deadline {
            Shared::arm(&self.shared, effective)?;
        }
        Ok(())
    }

    /// Edit the outbound headers before they are sent.
    pub fn with_headers<R>(&self, f: impl FnOnce(&mut Metadata) -> R) -> Result<R> {
        let mut write = self.shared.write();
        Ok(f(write.headers_mut()?))
    }

    /// Edit the outbound trailers before they are sent.
    pub fn with_trailers<R>(&self, f: impl FnOnce(&mut Metadata) -> R) -> Result<R> {
        let mut write = self.shared.write();
        Ok(f(write.trailers_mut()?))
    }

    /// Register the handler notified when the stream fails.
    pub fn on_error(&self, handler: impl FnOnce(StreamError) + Send + 'static) {
        self.shared.write().on_error(handler);
    }

    /// Encode and send one message.
    pub fn send(&self, item: &C::Encode) -> Result<()> {
        let message = self.codec.encode(item)?;
        self.send_message(message)
    }

    /// Send an already encoded message.
    pub fn send_message(&self, message: Message) -> Result<()> {
        let result = self.shared.write().write(message);
        result.map_err(|err| self.shared.map_error(err))
    }

    /// Send a final request message and half-close (client side).
    pub fn send_last(&self, item: &C::Encode) -> Result<()> {
        self.require(Role::Client, "send_last is for outgoing calls")?;
        let message = self.codec.encode(item)?;
        let result = self.shared.write().end(Some(message));
        result.map_err(|err| self.shared.map_error(err))
    }

    /// Half-close the request stream (client side).
    pub fn close_send(&self) -> Result<()> {
        self.require(Role::Client, "close_send is for outgoing calls")?;
        let result = self.shared.write().end(None);
        result.map_err(|err| self.shared.map_error(err))
    }

    /// Send the status in trailers and close the response (server side).
    pub fn finish(&self, status: Status) -> Result<()> {
        self.finish_inner(None, status)
    }

    /// Send a single response message with an OK status (server side).
    pub fn reply(&self, item: &C::Encode) -> Result<()> {
        let message = self.codec.encode(item)?;
        self.finish_inner(Some(message), Status::ok())
    }

    fn finish_inner(&self, message: Option<Message>, status: Status) -> Result<()> {
        self.require(Role::Server, "only incoming calls send a status")?;
        let result = {
            let mut write = self.shared.write();
            write
                .trailers_mut()
                .map(|trailers| status.write_to(trailers))
                .and_then(|()| write.end(message))
        };
        result.map_err(|err| self.shared.map_error(err))?;
        debug!(%status, "call finished");
        self.shared.complete();
        Ok(())
    }

    /// Cancel the call. Idempotent.
    ///
    /// The stream is reset unless the response already completed.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// The inbound side of the call.
    ///
    /// On the client this sends the request headers if needed and waits for
    /// the response headers. On the server it returns immediately.
    pub async fn incoming(&mut self) -> Result<Incoming<C>> {
        let mut source = match self.inbound.take() {
            Some(Inbound::Ready(headers, read)) => {
                return Ok(Incoming::new(self, headers, read, None));
            }
            Some(Inbound::Pending(source)) => source,
            None => return Err(CallError::InvalidState("incoming stream already taken")),
        };

        {
            let mut write = self.shared.write();
            if write.state() == WriteState::Idle {
                write
                    .flush_headers()
                    .map_err(|err| self.shared.map_error(err))?;
            }
        }

        let token = self.shared.token.clone();
        let event = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(self.shared.map_error(CallError::Cancelled)),
            event = source.next() => event,
        };

        let (headers, end_stream) = match event {
            Some(InboundEvent::Headers {
                metadata,
                end_stream,
            }) => (metadata, end_stream),
            Some(InboundEvent::Trailers(metadata)) => (metadata, true),
            Some(InboundEvent::Reset(code)) => {
                let err = StreamError::from(code);
                self.shared.reset_by_peer(err);
                return Err(CallError::Stream(err));
            }
            Some(InboundEvent::Data(_)) => {
                self.shared.fail(ResetCode::ProtocolError);
                return Err(CallError::Protocol("data before response headers".into()));
            }
            Some(InboundEvent::End) | None => {
                self.shared.fail(ResetCode::ProtocolError);
                return Err(CallError::Protocol(
                    "stream ended before response headers".into(),
                ));
            }
        };
        self.shared.disarm();

        if let Some(raw) = headers.get(":status") {
            let code: u16 = raw
                .parse()
                .map_err(|_| CallError::Protocol(format!("invalid :status '{raw}'")))?;
            if code != 200 {
                let status = Status::new(
                    Code::from_http_status(code),
                    format!("unexpected HTTP status {code}"),
                );
                debug!(http_status = code, %status, "non-200 response");
                let read = ReadStream::finished(None, self.registry.clone());
                return Ok(Incoming::new(self, headers, read, Some(status)));
            }
        }

        if end_stream {
            let status = Status::from_metadata(&headers)
                .unwrap_or_else(|| Status::unknown("trailers-only response without grpc-status"));
            debug!(%status, "trailers-only response");
            let read = ReadStream::finished(Some(headers.clone()), self.registry.clone());
            return Ok(Incoming::new(self, headers, read, Some(status)));
        }

        let encoding = headers
            .get(GRPC_ENCODING)
            .filter(|encoding| !encoding.eq_ignore_ascii_case(IDENTITY))
            .map(str::to_string);
        if let Some(encoding) = &encoding {
            if !self.registry.supports(encoding) {
                warn!(%encoding, "response uses an unsupported encoding");
                self.shared.cancel();
                return Err(CallError::Protocol(format!(
                    "unsupported response grpc-encoding '{encoding}'"
                )));
            }
        }

        let wire_format = headers
            .get(CONTENT_TYPE)
            .and_then(ContentType::parse)
            .map_or_else(|| self.codec.wire_format(), |ct| ct.wire_format);
        let read = ReadStream::new(
            source,
            encoding,
            wire_format,
            self.registry.clone(),
            self.read_config.clone(),
        )
        .with_cancellation(self.shared.token.clone());

        Ok(Incoming::new(self, headers, read, None))
    }

    fn require(&self, role: Role, what: &'static str) -> Result<()> {
        if self.role != role {
            return Err(CallError::InvalidState(what));
        }
        Ok(())
    }
}

impl<C: Codec> fmt::Debug for Call<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("role", &self.role)
            .field("path", &self.path)
            .field("context", &self.context)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Answer a request with a trailers-only status and give up on it.
fn reject(mut write: WriteStream, status: Status) -> CallError {
    debug!(%status, "rejecting call");
    let result = write
        .trailers_mut()
        .map(|trailers| status.write_to(trailers))
        .and_then(|()| write.end(None));
    if let Err(err) = result {
        warn!(error = %err, "failed to send rejection");
    }
    CallError::Status(status)
}

fn accepts_encoding(headers: &Metadata, encoding: &str) -> bool {
    headers
        .get_all(GRPC_ACCEPT_ENCODING)
        .flat_map(|value| value.split(','))
        .any(|candidate| candidate.trim().eq_ignore_ascii_case(encoding))
}

/// Inbound side of a call: the response on a client, the request on a server.
pub struct Incoming<C: Codec> {
    role: Role,
    headers: Metadata,
    read: ReadStream,
    status: Option<Status>,
    codec: C,
    shared: Arc<Shared>,
}

impl<C: Codec> Incoming<C> {
    fn new(call: &Call<C>, headers: Metadata, read: ReadStream, status: Option<Status>) -> Self {
        if status.as_ref().is_some_and(Status::is_ok) {
            call.shared.complete();
        }
        Self {
            role: call.role,
            headers,
            read,
            status,
            codec: call.codec.clone(),
            shared: call.shared.clone(),
        }
    }

    /// The peer's header block.
    pub fn headers(&self) -> &Metadata {
        &self.headers
    }

    /// The peer's trailers, once the stream has ended.
    pub fn trailers(&self) -> Option<&Metadata> {
        self.read.trailers()
    }

    pub fn pause(&mut self) {
        self.read.pause();
    }

    pub fn resume(&mut self) {
        self.read.resume();
    }

    /// Grant credit for `n` more messages.
    pub fn fetch(&mut self, n: u64) {
        self.read.fetch(n);
    }

    pub fn is_paused(&self) -> bool {
        self.read.is_paused()
    }

    /// Next raw message, in the encoding it arrived in.
    pub async fn recv_message(&mut self) -> Result<Option<Message>> {
        match self.read.recv().await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => {
                self.resolve_status();
                Ok(None)
            }
            Err(err) => Err(self.on_error(err)),
        }
    }

    /// Next decoded message, or `None` at the end of the stream.
    ///
    /// A message that fails to decode cancels the call.
    pub async fn recv(&mut self) -> Result<Option<C::Decode>> {
        let Some(message) = self.recv_message().await? else {
            return Ok(None);
        };
        self.decode(&message).map(Some)
    }

    /// Read to the end and decode the final message.
    ///
    /// Oversized messages are skipped rather than ending the read.
    pub async fn last(&mut self) -> Result<C::Decode> {
        self.read.resume();
        let mut last = None;
        while let Some(message) = self.drain_message().await? {
            last = Some(message);
        }
        let message = last.ok_or(CallError::NoMessage)?;
        self.decode(&message)
    }

    /// The response status, reading (and discarding) any remaining messages.
    ///
    /// A response that ends without `grpc-status` resolves to `UNKNOWN`.
    pub async fn status(&mut self) -> Result<Status> {
        if self.role != Role::Client {
            return Err(CallError::InvalidState("requests carry no status"));
        }
        if let Some(status) = &self.status {
            return Ok(status.clone());
        }
        self.read.resume();
        while self.drain_message().await?.is_some() {}
        self.status
            .clone()
            .ok_or(CallError::InvalidState("stream ended without resolving a status"))
    }

    /// Read to the end of the stream.
    ///
    /// On the client this fails unless the resolved status is `OK`; read
    /// [`status`](Self::status) first to inspect other outcomes.
    pub async fn end(&mut self) -> Result<()> {
        match self.role {
            Role::Client => {
                let status = self.status().await?;
                if status.is_ok() {
                    Ok(())
                } else {
                    Err(CallError::Status(status))
                }
            }
            Role::Server => {
                self.read.resume();
                while self.drain_message().await?.is_some() {}
                Ok(())
            }
        }
    }

    async fn drain_message(&mut self) -> Result<Option<Message>> {
        loop {
            match self.recv_message().await {
                Err(CallError::Frame(err)) if !err.is_fatal() => {
                    warn!(error = %err, "dropping oversized message while draining");
                }
                other => return other,
            }
        }
    }

    fn decode(&self, message: &Message) -> Result<C::Decode> {
        self.read.decode(&self.codec, message).map_err(|err| {
            warn!(error = %err, "failed to decode message, cancelling call");
            self.shared.cancel();
            err
        })
    }

    fn resolve_status(&mut self) {
        if self.role != Role::Client || self.status.is_some() {
            return;
        }
        let status = match self.read.trailers() {
            Some(trailers) => Status::from_metadata(trailers)
                .unwrap_or_else(|| Status::unknown("trailers without grpc-status")),
            None => Status::unknown("stream ended without trailers"),
        };
        debug!(%status, "response status");
        if status.is_ok() {
            self.shared.complete();
        }
        self.status = Some(status);
    }

    fn on_error(&mut self, err: CallError) -> CallError {
        match &err {
            CallError::Stream(stream_err) => self.shared.reset_by_peer(*stream_err),
            CallError::Protocol(reason) => {
                warn!(%reason, "inbound protocol error");
                self.shared.fail(ResetCode::ProtocolError);
            }
            _ => {}
        }
        self.shared.map_error(err)
    }
}

impl<C: Codec> fmt::Debug for Incoming<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Incoming")
            .field("role", &self.role)
            .field("headers", &self.headers)
            .field("read", &self.read)
            .field("status", &self.status)
            .finish()
    }
}
