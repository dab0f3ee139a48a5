use std::fs;

use bytes::{Bytes, BytesMut};
use grpcwire_frame::{encode_frame, encode_message, CompressionRegistry, Message, WireFormat};
use serde::Serialize;
use tracing::debug;

use crate::cmd::EncodeArgs;
use crate::exit::{frame_error, io_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_raw, print_value, OutputFormat};

#[derive(Serialize)]
struct EncodeOutput<'a> {
    path: String,
    encoding: &'a str,
    trailer: bool,
    payload_size: usize,
    frame_size: usize,
}

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = resolve_payload(&args)?;
    let registry = CompressionRegistry::default();
    let message = build_message(&registry, payload, args.compress.as_deref())?;
    let frame = frame_message(&message, args.trailer);
    debug!(
        encoding = message.encoding(),
        payload_size = message.payload().len(),
        frame_size = frame.len(),
        "encoded frame"
    );

    let Some(path) = &args.out else {
        print_raw(&frame);
        return Ok(SUCCESS);
    };

    fs::write(path, &frame)
        .map_err(|err| io_error(&format!("failed writing {}", path.display()), err))?;
    let out = EncodeOutput {
        path: path.display().to_string(),
        encoding: message.encoding(),
        trailer: args.trailer,
        payload_size: message.payload().len(),
        frame_size: frame.len(),
    };
    print_value(
        "frame",
        &format!("{} bytes -> {}", frame.len(), out.path),
        &out,
        format,
    );
    Ok(SUCCESS)
}

fn resolve_payload(args: &EncodeArgs) -> CliResult<Bytes> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(Bytes::copy_from_slice(json.as_bytes()));
    }
    if let Some(data) = &args.data {
        return Ok(Bytes::copy_from_slice(data.as_bytes()));
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map(Bytes::from)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Bytes::new())
}

fn build_message(
    registry: &CompressionRegistry,
    payload: Bytes,
    compress: Option<&str>,
) -> CliResult<Message> {
    let message = Message::identity(WireFormat::Protobuf, payload);
    match compress {
        Some(encoding) => registry
            .transcode(&message, encoding, usize::MAX)
            .map_err(|err| frame_error("compression failed", err)),
        None => Ok(message),
    }
}

fn frame_message(message: &Message, trailer: bool) -> Bytes {
    if !trailer {
        return encode_message(message);
    }
    let mut frame = BytesMut::with_capacity(message.payload().len() + grpcwire_frame::HEADER_SIZE);
    encode_frame(message.payload(), false, true, &mut frame);
    frame.freeze()
}
