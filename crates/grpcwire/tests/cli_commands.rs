#![cfg(feature = "cli")]

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "grpcwire-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn grpcwire(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_grpcwire"))
        .arg("--log-level")
        .arg("error")
        .args(args)
        .output()
        .expect("grpcwire should run")
}

fn grpcwire_with_stdin(args: &[&str], stdin: &[u8]) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_grpcwire"))
        .arg("--log-level")
        .arg("error")
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("grpcwire should start");
    child
        .stdin
        .take()
        .expect("stdin should be piped")
        .write_all(stdin)
        .expect("stdin should accept input");
    child.wait_with_output().expect("grpcwire should finish")
}

#[test]
fn encode_writes_raw_frame_to_stdout() {
    let output = grpcwire(&["encode", "--data", "Bob"]);

    assert!(output.status.success());
    assert_eq!(output.stdout, [0, 0, 0, 0, 3, b'B', b'o', b'b']);
}

#[test]
fn encode_then_decode_compressed_file() {
    let dir = unique_temp_dir("gzip");
    let frame_path = dir.join("frame.bin");
    let frame_arg = frame_path.to_str().expect("temp path should be UTF-8");

    let output = grpcwire(&[
        "--format",
        "json",
        "encode",
        "--data",
        "hello gzip",
        "--compress",
        "gzip",
        "--out",
        frame_arg,
    ]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"encoding\":\"gzip\""));

    let output = grpcwire(&[
        "--format",
        "json",
        "decode",
        frame_arg,
        "--encoding",
        "gzip",
        "--decompress",
        "--chunk-size",
        "2",
    ]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"kind\":\"message\""));
    assert!(stdout.contains("\"payload\":\"hello gzip\""));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn decode_reads_stdin_and_reports_oversized() {
    let mut input = vec![0, 0, 0, 0, 10];
    input.extend_from_slice(b"0123456789");
    input.extend_from_slice(&[0, 0, 0, 0, 2]);
    input.extend_from_slice(b"ok");

    let output = grpcwire_with_stdin(
        &["--format", "pretty", "decode", "--max-message-size", "4"],
        &input,
    );
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("#0 oversized"));
    assert!(stdout.contains("#1 message encoding=identity size=2 payload=ok"));
}

#[test]
fn decode_truncated_input_returns_60() {
    let output = grpcwire_with_stdin(&["decode"], &[0, 0, 0, 0, 9, b'x']);
    assert_eq!(output.status.code(), Some(60));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("input ends inside a frame"));
}

#[test]
fn decode_missing_file_returns_64() {
    let output = grpcwire(&["decode", "/nonexistent/grpcwire/frames.bin"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn timeout_encodes_and_parses() {
    let output = grpcwire(&["--format", "raw", "timeout", "1500ms"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "1500000u");

    let output = grpcwire(&["--format", "json", "timeout", "--parse", "100m"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"nanos\":100000000"));
}

#[test]
fn timeout_rejects_malformed_header_with_64() {
    let output = grpcwire(&["timeout", "--parse", "123456789S"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn encode_unknown_compression_returns_64() {
    let output = grpcwire(&["encode", "--data", "x", "--compress", "br"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_package_version() {
    let output = grpcwire(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("grpcwire {}", env!("CARGO_PKG_VERSION"))
    );
}
