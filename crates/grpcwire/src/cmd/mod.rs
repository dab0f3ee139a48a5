use clap::{Args, Subcommand};
use std::path::PathBuf;

use grpcwire_frame::DEFAULT_MAX_MESSAGE_SIZE;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod decode;
pub mod encode;
pub mod timeout;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Frame one payload and write the raw frame.
    Encode(EncodeArgs),
    /// Split a byte stream into messages.
    Decode(DecodeArgs),
    /// Encode or parse a grpc-timeout header value.
    Timeout(TimeoutArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Encode(args) => encode::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Timeout(args) => timeout::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// JSON payload (validated before framing).
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["data", "json"])]
    pub file: Option<PathBuf>,
    /// Compress the payload with this encoding (gzip, deflate).
    #[arg(long, value_name = "ENCODING", conflicts_with = "trailer")]
    pub compress: Option<String>,
    /// Mark the frame as a web trailer frame (flag bit 7).
    #[arg(long)]
    pub trailer: bool,
    /// Write the frame to a file instead of stdout.
    #[arg(long, short = 'o', value_name = "PATH")]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Input file. Reads stdin when omitted.
    pub file: Option<PathBuf>,
    /// Negotiated grpc-encoding for compressed frames.
    #[arg(long, value_name = "ENCODING")]
    pub encoding: Option<String>,
    /// Frames declaring more than this many bytes are skipped.
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,
    /// Feed the input to the deframer in chunks of this size.
    #[arg(long, value_name = "BYTES", default_value_t = 8192)]
    pub chunk_size: usize,
    /// Decompress messages before printing them.
    #[arg(long)]
    pub decompress: bool,
}

#[derive(Args, Debug)]
pub struct TimeoutArgs {
    /// Duration such as 1500ms, 2s or 250us; a header value with --parse.
    pub value: String,
    /// Decode a grpc-timeout header value instead of encoding one.
    #[arg(long)]
    pub parse: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
