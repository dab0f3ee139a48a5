use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use grpcwire_call::{
    BytesCodec, Call, CallError, CallOptions, Code, JsonCodec, MethodPath, ServerOptions,
};
use grpcwire_frame::{encode_message, CompressionRegistry, Message, WireFormat};
use grpcwire_transport::{
    InboundEvent, MemorySink, MemorySource, MemoryStream, Metadata, ResetCode, StreamError,
    StreamSink,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Greeting {
    name: String,
}

type GreetingCodec = JsonCodec<Greeting, Greeting>;

fn registry() -> Arc<CompressionRegistry> {
    Arc::new(CompressionRegistry::default())
}

fn path() -> MethodPath {
    MethodPath::new("helloworld.Greeter", "SayHello").unwrap()
}

fn client<C: grpcwire_call::Codec>(
    stream: MemoryStream,
    options: CallOptions,
    codec: C,
) -> Call<C> {
    let (sink, source) = stream.into_split();
    Call::connect(Box::new(sink), Box::new(source), options, codec, registry()).unwrap()
}

async fn server<C: grpcwire_call::Codec>(
    stream: MemoryStream,
    options: ServerOptions,
    codec: C,
) -> grpcwire_call::Result<Call<C>> {
    let (sink, source) = stream.into_split();
    Call::accept(Box::new(sink), Box::new(source), options, codec, registry()).await
}

fn request_headers(extra: &[(&str, &str)]) -> Metadata {
    let mut headers = Metadata::from_iter([
        (":method", "POST"),
        (":scheme", "http"),
        (":path", "/helloworld.Greeter/SayHello"),
        ("content-type", "application/grpc"),
        ("te", "trailers"),
    ]);
    for (key, value) in extra {
        headers.set(*key, *value);
    }
    headers
}

fn response_headers() -> Metadata {
    Metadata::from_iter([(":status", "200"), ("content-type", "application/grpc")])
}

fn data(payload: &'static [u8]) -> Bytes {
    encode_message(&Message::identity(WireFormat::Protobuf, payload))
}

async fn expect_reset(source: &mut MemorySource) -> ResetCode {
    loop {
        match source.next().await {
            Some(InboundEvent::Reset(code)) => return code,
            Some(_) => continue,
            None => panic!("stream ended without reset"),
        }
    }
}

#[tokio::test]
async fn unary_gzip_round_trip() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let mut call = client(
        client_stream,
        CallOptions::new(path()).with_encoding("gzip"),
        GreetingCodec::new(),
    );
    call.send_last(&Greeting {
        name: "Bob".into(),
    })
    .unwrap();

    let handler = tokio::spawn(async move {
        let mut call = server(
            server_stream,
            ServerOptions {
                encoding: Some("gzip".into()),
                ..Default::default()
            },
            GreetingCodec::new(),
        )
        .await
        .unwrap();
        assert_eq!(call.service(), "helloworld.Greeter");
        assert_eq!(call.method(), "SayHello");
        let request_headers = call.request_headers().unwrap();
        assert_eq!(request_headers.get("grpc-encoding"), Some("gzip"));
        assert_eq!(
            request_headers.get("content-type"),
            Some("application/grpc+json")
        );

        let mut incoming = call.incoming().await.unwrap();
        let request = incoming.last().await.unwrap();
        call.reply(&Greeting {
            name: format!("Hello, {}", request.name),
        })
        .unwrap();
    });

    let mut incoming = call.incoming().await.unwrap();
    assert_eq!(incoming.headers().get("grpc-encoding"), Some("gzip"));
    let reply = incoming.last().await.unwrap();
    assert_eq!(reply.name, "Hello, Bob");
    incoming.end().await.unwrap();
    assert_eq!(incoming.status().await.unwrap().code(), Code::Ok);
    assert_eq!(incoming.trailers().unwrap().get("grpc-status"), Some("0"));

    handler.await.unwrap();
}

#[tokio::test]
async fn server_streaming_with_flow_control() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let mut call = client(client_stream, CallOptions::new(path()), BytesCodec::default());
    call.send_last(&Bytes::from_static(b"go")).unwrap();

    let server_call = server(server_stream, ServerOptions::default(), BytesCodec::default())
        .await
        .unwrap();
    for chunk in [&b"one"[..], b"two", b"three"] {
        server_call.send(&Bytes::from_static(chunk)).unwrap();
    }
    server_call.finish(grpcwire_call::Status::ok()).unwrap();

    let mut incoming = call.incoming().await.unwrap();
    incoming.pause();
    assert!(matches!(
        incoming.recv().await,
        Err(CallError::InvalidState(_))
    ));

    incoming.fetch(2);
    assert_eq!(incoming.recv().await.unwrap().unwrap(), "one");
    assert_eq!(incoming.recv().await.unwrap().unwrap(), "two");
    assert!(incoming.is_paused());

    incoming.resume();
    assert_eq!(incoming.recv().await.unwrap().unwrap(), "three");
    assert_eq!(incoming.recv().await.unwrap(), None);
    incoming.end().await.unwrap();
}

#[tokio::test]
async fn missing_status_resolves_to_unknown() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let mut call = client(client_stream, CallOptions::new(path()), BytesCodec::default());
    call.close_send().unwrap();

    let (mut sink, _source) = server_stream.into_split();
    sink.send_headers(response_headers(), false).unwrap();
    sink.send_data(data(b"partial"), false).unwrap();
    sink.send_trailers(Metadata::from_iter([("x-info", "no status")]))
        .unwrap();

    let mut incoming = call.incoming().await.unwrap();
    assert_eq!(incoming.recv().await.unwrap().unwrap(), "partial");
    let status = incoming.status().await.unwrap();
    assert_eq!(status.code(), Code::Unknown);
    match incoming.end().await {
        Err(CallError::Status(status)) => assert_eq!(status.code(), Code::Unknown),
        other => panic!("expected unknown status, got {other:?}"),
    }
}

#[tokio::test]
async fn end_without_trailers_resolves_to_unknown() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let mut call = client(client_stream, CallOptions::new(path()), BytesCodec::default());
    call.close_send().unwrap();

    let (mut sink, _source) = server_stream.into_split();
    sink.send_headers(response_headers(), false).unwrap();
    sink.send_data(data(b"x"), true).unwrap();

    let mut incoming = call.incoming().await.unwrap();
    assert_eq!(incoming.status().await.unwrap().code(), Code::Unknown);
}

#[tokio::test]
async fn error_status_is_reported() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let mut call = client(client_stream, CallOptions::new(path()), BytesCodec::default());
    call.close_send().unwrap();

    let server_call = server(server_stream, ServerOptions::default(), BytesCodec::default())
        .await
        .unwrap();
    server_call
        .with_trailers(|trailers| trailers.insert("x-detail", "db"))
        .unwrap();
    server_call
        .finish(grpcwire_call::Status::unavailable("backend down 100%"))
        .unwrap();

    let mut incoming = call.incoming().await.unwrap();
    let status = incoming.status().await.unwrap();
    assert_eq!(status.code(), Code::Unavailable);
    assert_eq!(status.message(), Some("backend down 100%"));
    assert_eq!(incoming.trailers().unwrap().get("x-detail"), Some("db"));
    assert!(matches!(incoming.end().await, Err(CallError::Status(_))));
}

#[tokio::test]
async fn trailers_only_response() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let mut call = client(client_stream, CallOptions::new(path()), BytesCodec::default());
    call.close_send().unwrap();

    let (mut sink, _source) = server_stream.into_split();
    let mut headers = response_headers();
    headers.insert("grpc-status", "5");
    headers.insert("grpc-message", "no such greeting");
    sink.send_headers(headers, true).unwrap();

    let mut incoming = call.incoming().await.unwrap();
    assert_eq!(incoming.recv().await.unwrap(), None);
    let status = incoming.status().await.unwrap();
    assert_eq!(status.code(), Code::NotFound);
    assert_eq!(status.message(), Some("no such greeting"));
}

#[tokio::test]
async fn non_200_http_status_maps_to_code() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let mut call = client(client_stream, CallOptions::new(path()), BytesCodec::default());
    call.close_send().unwrap();

    let (mut sink, _source) = server_stream.into_split();
    sink.send_headers(Metadata::from_iter([(":status", "503")]), false)
        .unwrap();

    let mut incoming = call.incoming().await.unwrap();
    assert_eq!(incoming.status().await.unwrap().code(), Code::Unavailable);
}

#[tokio::test]
async fn unsupported_response_encoding_cancels() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let mut call = client(client_stream, CallOptions::new(path()), BytesCodec::default());
    call.close_send().unwrap();

    let (mut sink, mut source) = server_stream.into_split();
    let mut headers = response_headers();
    headers.insert("grpc-encoding", "snappy");
    sink.send_headers(headers, false).unwrap();

    assert!(matches!(
        call.incoming().await,
        Err(CallError::Protocol(_))
    ));
    assert!(call.is_cancelled());
    assert_eq!(expect_reset(&mut source).await, ResetCode::Cancel);
}

#[tokio::test]
async fn decode_failure_cancels_call() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let mut call = client(client_stream, CallOptions::new(path()), GreetingCodec::new());
    call.close_send().unwrap();

    let (mut sink, mut source) = server_stream.into_split();
    let mut headers = response_headers();
    headers.set("content-type", "application/grpc+json");
    sink.send_headers(headers, false).unwrap();
    sink.send_data(
        encode_message(&Message::identity(WireFormat::Json, &b"{not json"[..])),
        false,
    )
    .unwrap();

    let mut incoming = call.incoming().await.unwrap();
    assert!(matches!(incoming.recv().await, Err(CallError::Decode(_))));
    assert!(call.is_cancelled());
    assert_eq!(expect_reset(&mut source).await, ResetCode::Cancel);
}

#[tokio::test]
async fn peer_reset_surfaces_as_stream_error() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let mut call = client(client_stream, CallOptions::new(path()), BytesCodec::default());
    let (tx, rx) = tokio::sync::oneshot::channel();
    call.on_error(move |err| {
        let _ = tx.send(err);
    });
    call.close_send().unwrap();

    let (mut sink, _source) = server_stream.into_split();
    sink.send_headers(response_headers(), false).unwrap();
    sink.reset(ResetCode::RefusedStream);

    let mut incoming = call.incoming().await.unwrap();
    assert!(matches!(
        incoming.recv().await,
        Err(CallError::Stream(StreamError::Refused))
    ));
    assert_eq!(rx.await.unwrap(), StreamError::Refused);
}

#[tokio::test]
async fn cancel_after_peer_reset_sends_nothing() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let mut call = client(client_stream, CallOptions::new(path()), BytesCodec::default());
    call.close_send().unwrap();

    let (mut sink, mut source) = server_stream.into_split();
    sink.send_headers(response_headers(), false).unwrap();
    sink.reset(ResetCode::RefusedStream);

    let mut incoming = call.incoming().await.unwrap();
    assert!(matches!(
        incoming.recv().await,
        Err(CallError::Stream(StreamError::Refused))
    ));
    call.cancel();

    assert!(matches!(
        source.next().await,
        Some(InboundEvent::Headers {
            end_stream: true,
            ..
        })
    ));
    drop(call);
    drop(incoming);
    assert_eq!(source.next().await, None);
}

/// Response carrying an oversized message, a small one, then `OK`.
fn respond_with_oversized(server_stream: MemoryStream) -> MemorySource {
    let (mut sink, source) = server_stream.into_split();
    sink.send_headers(response_headers(), false).unwrap();
    sink.send_data(data(b"0123456789"), false).unwrap();
    sink.send_data(data(b"ok"), false).unwrap();
    sink.send_trailers(Metadata::from_iter([("grpc-status", "0")]))
        .unwrap();
    source
}

#[tokio::test]
async fn end_skips_oversized_response_message() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let options = CallOptions::new(path()).with_max_message_size(4);
    let mut call = client(client_stream, options, BytesCodec::default());
    call.close_send().unwrap();
    let _source = respond_with_oversized(server_stream);

    let mut incoming = call.incoming().await.unwrap();
    incoming.end().await.unwrap();
    incoming.end().await.unwrap();
    assert_eq!(incoming.status().await.unwrap().code(), Code::Ok);
}

#[tokio::test]
async fn last_skips_oversized_response_message() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let options = CallOptions::new(path()).with_max_message_size(4);
    let mut call = client(client_stream, options, BytesCodec::default());
    call.close_send().unwrap();
    let _source = respond_with_oversized(server_stream);

    let mut incoming = call.incoming().await.unwrap();
    assert_eq!(incoming.last().await.unwrap(), "ok");
    incoming.end().await.unwrap();
}

#[tokio::test]
async fn rejects_bad_content_type() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let (mut sink, mut source) = client_stream.into_split();
    sink.send_headers(request_headers(&[("content-type", "text/plain")]), false)
        .unwrap();

    let result = server(server_stream, ServerOptions::default(), BytesCodec::default()).await;
    assert!(matches!(result, Err(CallError::Protocol(_))));
    assert_eq!(expect_reset(&mut source).await, ResetCode::ProtocolError);
}

#[tokio::test]
async fn rejects_bad_timeout() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let (mut sink, mut source) = client_stream.into_split();
    sink.send_headers(request_headers(&[("grpc-timeout", "10x")]), false)
        .unwrap();

    let result = server(server_stream, ServerOptions::default(), BytesCodec::default()).await;
    assert!(matches!(result, Err(CallError::Protocol(_))));
    assert_eq!(expect_reset(&mut source).await, ResetCode::ProtocolError);
}

#[tokio::test]
async fn rejects_unsupported_request_encoding() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let (mut sink, mut source) = client_stream.into_split();
    sink.send_headers(request_headers(&[("grpc-encoding", "snappy")]), false)
        .unwrap();

    let result = server(server_stream, ServerOptions::default(), BytesCodec::default()).await;
    match result {
        Err(CallError::Status(status)) => assert_eq!(status.code(), Code::Unimplemented),
        other => panic!("expected UNIMPLEMENTED, got {other:?}"),
    }

    match source.next().await {
        Some(InboundEvent::Headers {
            metadata,
            end_stream,
        }) => {
            assert!(end_stream);
            assert_eq!(metadata.get("grpc-status"), Some("12"));
            assert_eq!(
                metadata.get("grpc-accept-encoding"),
                Some("identity,gzip,deflate")
            );
        }
        other => panic!("expected trailers-only response, got {other:?}"),
    }
}

#[tokio::test]
async fn rejects_malformed_path() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let (mut sink, _source) = client_stream.into_split();
    sink.send_headers(request_headers(&[(":path", "nonsense")]), false)
        .unwrap();

    let result = server(server_stream, ServerOptions::default(), BytesCodec::default()).await;
    assert!(matches!(
        result,
        Err(CallError::Status(status)) if status.code() == Code::Unimplemented
    ));
}

#[tokio::test]
async fn response_encoding_requires_client_support() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let (mut sink, mut source) = client_stream.into_split();
    sink.send_headers(
        request_headers(&[("grpc-accept-encoding", "identity")]),
        true,
    )
    .unwrap();

    let call = server(
        server_stream,
        ServerOptions {
            encoding: Some("gzip".into()),
            ..Default::default()
        },
        BytesCodec::default(),
    )
    .await
    .unwrap();
    assert_eq!(call.encoding(), "identity");
    call.reply(&Bytes::from_static(b"plain")).unwrap();

    match source.next().await {
        Some(InboundEvent::Headers { metadata, .. }) => {
            assert!(!metadata.contains_key("grpc-encoding"));
        }
        other => panic!("expected headers, got {other:?}"),
    }
}

#[tokio::test]
async fn web_call_uses_trailer_frame() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let mut call = client(
        client_stream,
        CallOptions::new(path()).with_web(true),
        BytesCodec::default(),
    );
    call.send_last(&Bytes::from_static(b"ping")).unwrap();

    let mut server_call = server(server_stream, ServerOptions::default(), BytesCodec::default())
        .await
        .unwrap();
    let mut request = server_call.incoming().await.unwrap();
    assert_eq!(request.last().await.unwrap(), "ping");
    server_call.reply(&Bytes::from_static(b"pong")).unwrap();

    let mut incoming = call.incoming().await.unwrap();
    assert_eq!(
        incoming.headers().get("content-type"),
        Some("application/grpc-web")
    );
    assert_eq!(incoming.last().await.unwrap(), "pong");
    assert_eq!(incoming.trailers().unwrap().get("grpc-status"), Some("0"));
    incoming.end().await.unwrap();
}

#[tokio::test]
async fn client_cancel_resets_once() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let call = client(client_stream, CallOptions::new(path()), BytesCodec::default());
    call.send(&Bytes::from_static(b"first")).unwrap();

    let mut server_call = server(server_stream, ServerOptions::default(), BytesCodec::default())
        .await
        .unwrap();
    let mut request = server_call.incoming().await.unwrap();
    assert_eq!(request.recv().await.unwrap().unwrap(), "first");

    call.cancel();
    call.cancel();
    assert!(matches!(
        request.recv().await,
        Err(CallError::Stream(StreamError::Cancelled))
    ));
    assert!(matches!(
        call.send(&Bytes::from_static(b"late")),
        Err(CallError::Cancelled)
    ));
}

#[tokio::test]
async fn cancel_after_success_does_not_reset() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let mut call = client(client_stream, CallOptions::new(path()), BytesCodec::default());
    call.close_send().unwrap();

    let (mut sink, mut source) = server_stream.into_split();
    let mut headers = response_headers();
    headers.insert("grpc-status", "0");
    sink.send_headers(headers, true).unwrap();

    let mut incoming = call.incoming().await.unwrap();
    incoming.end().await.unwrap();
    call.cancel();

    // Only the half-closed request headers reach the server.
    assert!(matches!(
        source.next().await,
        Some(InboundEvent::Headers {
            end_stream: true,
            ..
        })
    ));
    drop(call);
    drop(incoming);
    assert_eq!(source.next().await, None);
}

#[tokio::test(start_paused = true)]
async fn deadline_expiry_cancels_client() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let mut call = client(
        client_stream,
        CallOptions::new(path()).with_timeout(Duration::from_millis(100)),
        BytesCodec::default(),
    );
    call.send(&Bytes::from_static(b"slow")).unwrap();

    let (_sink, mut source) = server_stream.into_split();
    match source.next().await {
        Some(InboundEvent::Headers { metadata, .. }) => {
            assert_eq!(metadata.get("grpc-timeout"), Some("100000u"));
        }
        other => panic!("expected headers, got {other:?}"),
    }

    let result = call.incoming().await;
    assert!(matches!(result, Err(CallError::DeadlineExceeded)));
    assert!(call.is_cancelled());
    assert_eq!(expect_reset(&mut source).await, ResetCode::Cancel);
}

#[tokio::test(start_paused = true)]
async fn deadline_disarmed_by_response_headers() {
    let (client_stream, server_stream) = MemoryStream::pair();
    let mut call = client(
        client_stream,
        CallOptions::new(path()).with_timeout(Duration::from_millis(100)),
        BytesCodec::default(),
    );
    call.close_send().unwrap();
    assert!(call.is_deadline_armed());

    let (mut sink, _source) = server_stream.into_split();
    sink.send_headers(response_headers(), false).unwrap();

    let _incoming = call.incoming().await.unwrap();
    assert!(!call.is_deadline_armed());
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!call.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn server_deadline_propagates_to_outgoing_call() {
    let (inbound_client, inbound_server) = MemoryStream::pair();
    let (mut sink, _source) = inbound_client.into_split();
    sink.send_headers(request_headers(&[("grpc-timeout", "2S")]), true)
        .unwrap();

    let server_call = server(
        inbound_server,
        ServerOptions {
            schedule_deadline: false,
            ..Default::default()
        },
        BytesCodec::default(),
    )
    .await
    .unwrap();
    tokio::time::advance(Duration::from_millis(500)).await;

    let (outbound_client, outbound_server) = MemoryStream::pair();
    let nested = client(
        outbound_client,
        CallOptions::new(path())
            .with_context(server_call.context())
            .with_timeout(Duration::from_secs(60)),
        BytesCodec::default(),
    );
    nested.close_send().unwrap();

    let (_nested_sink, mut nested_source) = outbound_server.into_split();
    match nested_source.next().await {
        Some(InboundEvent::Headers { metadata, .. }) => {
            assert_eq!(metadata.get("grpc-timeout"), Some("1500000u"));
        }
        other => panic!("expected headers, got {other:?}"),
    }
}
