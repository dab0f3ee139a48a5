use std::time::Duration;

use grpcwire_call::{encode_duration, parse_timeout, TimeoutError, GRPC_TIMEOUT};
use serde::Serialize;

use crate::cmd::TimeoutArgs;
use crate::exit::{timeout_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_value, OutputFormat};

#[derive(Serialize)]
struct TimeoutOutput<'a> {
    header: &'a str,
    value: &'a str,
    nanos: u128,
}

pub fn run(args: TimeoutArgs, format: OutputFormat) -> CliResult<i32> {
    let (value, duration) = if args.parse {
        let duration = parse_timeout(&args.value)
            .map_err(|err| timeout_error("invalid grpc-timeout value", err))?;
        (args.value.clone(), duration)
    } else {
        let duration = parse_duration(&args.value)?;
        let value = encode_duration(duration).ok_or_else(|| {
            timeout_error("cannot encode", TimeoutError::Unrepresentable(duration))
        })?;
        (value, duration)
    };

    let out = TimeoutOutput {
        header: GRPC_TIMEOUT,
        value: &value,
        nanos: duration.as_nanos(),
    };
    let shown = if args.parse {
        format!("{duration:?}")
    } else {
        value.clone()
    };
    print_value(GRPC_TIMEOUT, &shown, &out, format);
    Ok(SUCCESS)
}

/// Parse a human duration such as `1500ms`, `2s`, `250us` or `5m`.
fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ns" => Ok(Duration::from_nanos(value)),
        "us" => Ok(Duration::from_micros(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "s" | "" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| CliError::new(USAGE, format!("duration out of range: {input}"))),
        "h" => value
            .checked_mul(3600)
            .map(Duration::from_secs)
            .ok_or_else(|| CliError::new(USAGE, format!("duration out of range: {input}"))),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}
