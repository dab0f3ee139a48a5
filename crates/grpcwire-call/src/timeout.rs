//! `grpc-timeout` header codec.
//!
//! The header carries at most 8 decimal digits followed by a unit suffix.
//! Encoding picks the finest unit whose value still fits in 8 digits.

use std::time::Duration;

use crate::error::TimeoutError;

/// Header carrying the call timeout.
pub const GRPC_TIMEOUT: &str = "grpc-timeout";

/// Largest value the header can carry.
pub const MAX_TIMEOUT_VALUE: u64 = 99_999_999;

const MAX_DIGITS: usize = 8;

/// Time units in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    /// All units, finest first.
    pub const ALL: [TimeUnit; 6] = [
        TimeUnit::Nanoseconds,
        TimeUnit::Microseconds,
        TimeUnit::Milliseconds,
        TimeUnit::Seconds,
        TimeUnit::Minutes,
        TimeUnit::Hours,
    ];

    /// Length of one unit in nanoseconds.
    pub fn nanos(self) -> u128 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Minutes => 60_000_000_000,
            TimeUnit::Hours => 3_600_000_000_000,
        }
    }

    /// Header suffix for this unit.
    pub fn suffix(self) -> char {
        match self {
            TimeUnit::Nanoseconds => 'n',
            TimeUnit::Microseconds => 'u',
            TimeUnit::Milliseconds => 'm',
            TimeUnit::Seconds => 'S',
            TimeUnit::Minutes => 'M',
            TimeUnit::Hours => 'H',
        }
    }

    pub fn from_suffix(suffix: char) -> Option<Self> {
        TimeUnit::ALL.into_iter().find(|unit| unit.suffix() == suffix)
    }
}

/// Encode `value` of `unit` as a `grpc-timeout` value.
///
/// Returns `None` when no unit can hold the duration in 8 digits.
pub fn encode_timeout(value: u64, unit: TimeUnit) -> Option<String> {
    encode_nanos(u128::from(value) * unit.nanos())
}

/// Encode a [`Duration`] as a `grpc-timeout` value.
pub fn encode_duration(duration: Duration) -> Option<String> {
    encode_nanos(duration.as_nanos())
}

fn encode_nanos(nanos: u128) -> Option<String> {
    TimeUnit::ALL.into_iter().find_map(|unit| {
        let value = nanos / unit.nanos();
        (value <= u128::from(MAX_TIMEOUT_VALUE)).then(|| format!("{value}{}", unit.suffix()))
    })
}

/// Parse a `grpc-timeout` value.
pub fn parse_timeout(value: &str) -> Result<Duration, TimeoutError> {
    let malformed = || TimeoutError::Malformed(value.to_string());

    let suffix = value.chars().last().ok_or_else(malformed)?;
    let unit = TimeUnit::from_suffix(suffix).ok_or_else(malformed)?;
    let digits = &value[..value.len() - suffix.len_utf8()];
    if digits.is_empty() || digits.len() > MAX_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(malformed());
    }

    let amount: u64 = digits.parse().map_err(|_| malformed())?;
    let nanos = u128::from(amount) * unit.nanos();
    let secs = (nanos / 1_000_000_000) as u64;
    let subsec = (nanos % 1_000_000_000) as u32;
    Ok(Duration::new(secs, subsec))
}
