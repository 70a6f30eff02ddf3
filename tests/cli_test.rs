//! Binary smoke tests.

#![allow(deprecated)] // cargo_bin

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn gateway() -> Command {
    let mut cmd = Command::cargo_bin("stream-gateway").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("STREAM_GATEWAY_SECRET")
        .env_remove("STREAM_GATEWAY_LICENSES")
        .env_remove("STREAM_GATEWAY_UPSTREAM_URL");
    cmd
}

#[test]
fn test_help_lists_options() {
    gateway()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--heartbeat-secs"))
        .stdout(predicate::str::contains("--token-ttl-secs"))
        .stdout(predicate::str::contains("--licenses"));
}

#[test]
fn test_version() {
    gateway()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_rejects_sweep_shorter_than_heartbeat() {
    gateway()
        .args(["--heartbeat-secs", "30", "--sweep-secs", "10", "--port", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("sweep period"));
}

#[test]
fn test_refuses_to_start_without_secret() {
    gateway()
        .args(["--port", "0"])
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no secret available"));
}

#[test]
fn test_rejects_malformed_license_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"{ not json").unwrap();

    gateway()
        .env("STREAM_GATEWAY_SECRET", "s")
        .args(["--port", "0", "--licenses"])
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("license"));
}
