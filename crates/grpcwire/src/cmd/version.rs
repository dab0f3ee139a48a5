use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("grpcwire {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: grpcwire");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "compression: {}",
        grpcwire_frame::CompressionRegistry::default().accept_encoding()
    );
    println!(
        "max_message_size: {}",
        grpcwire_frame::DEFAULT_MAX_MESSAGE_SIZE
    );
    println!("features: call={}, cli=true", cfg!(feature = "call"));

    Ok(SUCCESS)
}
