use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// What the deframer produced at one position of the input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Message,
    Trailers,
    Oversized,
}

impl RecordKind {
    fn as_str(self) -> &'static str {
        match self {
            RecordKind::Message => "message",
            RecordKind::Trailers => "trailers",
            RecordKind::Oversized => "oversized",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Record {
    pub index: usize,
    pub kind: RecordKind,
    pub encoding: String,
    pub size: usize,
    pub payload: String,
    #[serde(skip)]
    pub raw: Vec<u8>,
}

impl Record {
    pub fn message(index: usize, encoding: &str, payload: &[u8]) -> Self {
        Self {
            index,
            kind: RecordKind::Message,
            encoding: encoding.to_string(),
            size: payload.len(),
            payload: payload_preview(payload),
            raw: payload.to_vec(),
        }
    }

    pub fn trailers(index: usize, block: &[u8]) -> Self {
        Self {
            index,
            kind: RecordKind::Trailers,
            encoding: String::new(),
            size: block.len(),
            payload: payload_preview(block).trim_end().replace("\r\n", "; "),
            raw: block.to_vec(),
        }
    }

    pub fn oversized(index: usize, size: usize) -> Self {
        Self {
            index,
            kind: RecordKind::Oversized,
            encoding: String::new(),
            size,
            payload: String::new(),
            raw: Vec::new(),
        }
    }
}

pub fn print_records(records: &[Record], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for record in records {
                println!(
                    "{}",
                    serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "KIND", "ENCODING", "SIZE", "PAYLOAD"]);
            for record in records {
                table.add_row(vec![
                    record.index.to_string(),
                    record.kind.as_str().to_string(),
                    record.encoding.clone(),
                    record.size.to_string(),
                    record.payload.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for record in records {
                println!(
                    "#{} {} encoding={} size={} payload={}",
                    record.index,
                    record.kind.as_str(),
                    if record.encoding.is_empty() {
                        "-"
                    } else {
                        record.encoding.as_str()
                    },
                    record.size,
                    record.payload
                );
            }
        }
        OutputFormat::Raw => {
            for record in records.iter().filter(|r| r.kind == RecordKind::Message) {
                print_raw(&record.raw);
            }
        }
    }
}

/// Print a single value: the bare value for raw/pretty, an object otherwise.
pub fn print_value<T: Serialize>(label: &str, value: &str, detail: &T, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(detail).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec![label.to_ascii_uppercase()])
                .add_row(vec![value.to_string()]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => println!("{value}"),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_payloads_are_summarized() {
        let record = Record::message(0, "gzip", &[0x1f, 0x8b, 0xff]);
        assert_eq!(record.payload, "<binary 3 bytes>");
        assert_eq!(record.raw, vec![0x1f, 0x8b, 0xff]);
    }

    #[test]
    fn records_serialize_without_raw_bytes() {
        let record = Record::trailers(2, b"grpc-status: 0\r\ngrpc-message: ok\r\n");
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"index":2,"kind":"trailers","encoding":"","size":34,"payload":"grpc-status: 0; grpc-message: ok"}"#
        );
    }
}
