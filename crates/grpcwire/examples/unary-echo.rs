//! In-process unary call over a memory stream: gzip request, gzip reply.
//!
//! Run with:
//!   cargo run --example unary-echo

use std::sync::Arc;
use std::time::Duration;

use grpcwire::call::{Call, CallOptions, JsonCodec, MethodPath, ServerOptions, Status};
use grpcwire::frame::CompressionRegistry;
use grpcwire::transport::MemoryStream;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct HelloRequest {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct HelloReply {
    message: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let registry = Arc::new(CompressionRegistry::default());
    let (client_stream, server_stream) = MemoryStream::pair();

    let server_registry = registry.clone();
    let server = tokio::spawn(async move {
        let (sink, source) = server_stream.into_split();
        let mut call = Call::accept(
            Box::new(sink),
            Box::new(source),
            ServerOptions {
                encoding: Some("gzip".into()),
                ..Default::default()
            },
            JsonCodec::<HelloReply, HelloRequest>::new(),
            server_registry,
        )
        .await?;
        eprintln!(
            "server: {} / {} (deadline in {:?})",
            call.service(),
            call.method(),
            call.context().remaining()
        );

        let request = call.incoming().await?.last().await?;
        if request.name.is_empty() {
            call.finish(Status::invalid_argument("name must not be empty"))?;
        } else {
            call.reply(&HelloReply {
                message: format!("Hello, {}", request.name),
            })?;
        }
        Ok::<_, grpcwire::call::CallError>(())
    });

    let (sink, source) = client_stream.into_split();
    let mut call = Call::connect(
        Box::new(sink),
        Box::new(source),
        CallOptions::new(MethodPath::new("helloworld.Greeter", "SayHello")?)
            .with_encoding("gzip")
            .with_timeout(Duration::from_secs(5)),
        JsonCodec::<HelloRequest, HelloReply>::new(),
        registry,
    )?;
    call.send_last(&HelloRequest { name: "Bob".into() })?;

    let mut response = call.incoming().await?;
    let reply = response.last().await?;
    response.end().await?;
    println!("client: {}", reply.message);

    server.await??;
    Ok(())
}
