use std::fs;
use std::io::Read;
use std::path::Path;

use grpcwire_call::parse_trailer_block;
use grpcwire_frame::{CompressionRegistry, Deframer, DeframerConfig, FrameError};
use tracing::{debug, warn};

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_records, OutputFormat, Record};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    if args.chunk_size == 0 {
        return Err(CliError::new(USAGE, "--chunk-size must be greater than zero"));
    }
    let input = read_input(args.file.as_deref())?;
    let records = decode_frames(&input, &args)?;
    print_records(&records, format);
    Ok(SUCCESS)
}

fn read_input(path: Option<&Path>) -> CliResult<Vec<u8>> {
    match path {
        Some(path) => {
            fs::read(path).map_err(|err| io_error(&format!("failed reading {}", path.display()), err))
        }
        None => {
            let mut input = Vec::new();
            std::io::stdin()
                .read_to_end(&mut input)
                .map_err(|err| io_error("failed reading stdin", err))?;
            Ok(input)
        }
    }
}

fn decode_frames(input: &[u8], args: &DecodeArgs) -> CliResult<Vec<Record>> {
    let registry = CompressionRegistry::default();
    if let Some(encoding) = &args.encoding {
        if !registry.supports(encoding) {
            return Err(frame_error(
                "invalid --encoding",
                FrameError::UnsupportedEncoding(encoding.clone()),
            ));
        }
    }

    let mut deframer = Deframer::with_config(DeframerConfig {
        max_message_size: args.max_message_size,
        encoding: args.encoding.clone(),
        ..Default::default()
    });
    let mut records = Vec::new();

    for chunk in input.chunks(args.chunk_size) {
        for result in deframer.update(chunk) {
            let index = records.len();
            match result {
                Ok(message) if args.decompress => {
                    let message = registry
                        .decode(&message, args.max_message_size)
                        .map_err(|err| frame_error(&format!("message {index}"), err))?;
                    records.push(Record::message(index, message.encoding(), message.payload()));
                }
                Ok(message) => {
                    records.push(Record::message(index, message.encoding(), message.payload()));
                }
                Err(FrameError::MessageTooLarge { size, max }) => {
                    warn!(index, size, max, "skipping oversized frame");
                    records.push(Record::oversized(index, size));
                }
                Err(err) => return Err(frame_error(&format!("frame {index}"), err)),
            }
        }

        if let Some(block) = deframer.take_trailer_frame() {
            parse_trailer_block(&block).map_err(|err| {
                CliError::new(DATA_INVALID, format!("invalid trailer frame: {err}"))
            })?;
            records.push(Record::trailers(records.len(), &block));
        }
    }

    if deframer.has_partial_frame() {
        return Err(CliError::new(
            DATA_INVALID,
            format!(
                "input ends inside a frame ({} bytes buffered, {} still expected)",
                deframer.buffered_len(),
                deframer.bytes_to_skip()
            ),
        ));
    }

    debug!(records = records.len(), bytes = input.len(), "decoded input");
    Ok(records)
}
