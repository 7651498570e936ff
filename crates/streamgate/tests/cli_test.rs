//! Integration tests for the `streamgate` binary.
//!
//! Argument parsing, `check` output and error exit codes. Nothing here
//! opens a network connection.
#![allow(clippy::unwrap_used)]

use std::io::Write;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::NamedTempFile;

// ── Helpers ─────────────────────────────────────────────────────────

/// `streamgate` with config lookup isolated from the user's machine.
fn streamgate_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("streamgate");
    cmd.env("HOME", "/tmp/streamgate-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/streamgate-cli-test-nonexistent")
        .env_remove("STREAMGATE_CONFIG")
        .env_remove("RUST_LOG")
        .env_remove("SF_PASSWORD")
        .env_remove("SF_TOKEN");
    cmd
}

fn config_file(text: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

const VALID: &str = r#"
[[auth]]
name = "sf"
kind = "static"
server_url = "login.example.com"

[[dedup]]
name = "gate"

[[consumer]]
name = "console"
kind = "log"
address = "orders"

[[listener]]
name = "orders-in"
auth_name = "sf"
topic = "/topic/Orders"
destinations = ["orders"]
dedup = "gate"
"#;

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn no_args_shows_help() {
    let output = streamgate_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = String::from_utf8_lossy(&output.stderr);
    assert!(text.contains("Usage"), "Expected 'Usage' in:\n{text}");
}

#[test]
fn help_lists_commands() {
    streamgate_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("run")
            .and(predicate::str::contains("check"))
            .and(predicate::str::contains("--config")),
    );
}

#[test]
fn version_flag() {
    streamgate_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("streamgate"));
}

#[test]
fn invalid_stop_timeout_is_rejected() {
    streamgate_cmd()
        .args(["run", "--stop-timeout", "soon"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("stop-timeout"));
}

// ── check ───────────────────────────────────────────────────────────

#[test]
fn check_prints_the_topology() {
    let file = config_file(VALID);
    streamgate_cmd()
        .env("SF_TOKEN", "Bearer abc")
        .arg("--config")
        .arg(file.path())
        .arg("check")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("auth     sf")
                .and(predicate::str::contains("dedup    gate"))
                .and(predicate::str::contains("/topic/Orders via gate -> orders")),
        );
}

#[test]
fn check_without_secret_is_a_usage_error() {
    let file = config_file(VALID);
    streamgate_cmd()
        .arg("--config")
        .arg(file.path())
        .arg("check")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no token configured for auth provider 'sf'"));
}

#[test]
fn missing_config_exits_not_found() {
    streamgate_cmd()
        .args(["--config", "/tmp/streamgate-cli-test-nonexistent/none.toml", "check"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("Configuration file not found"));
}

#[test]
fn unknown_kind_is_reported_by_unit() {
    let file = config_file(
        r#"
        [[consumer]]
        name = "queue"
        kind = "kafka"
        address = "orders"
    "#,
    );
    streamgate_cmd()
        .arg("--config")
        .arg(file.path())
        .arg("check")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unit 'queue' cannot be built"));
}

#[test]
fn empty_topology_refuses_to_run() {
    let file = config_file("[runtime]\nstop_timeout_secs = 5\n");
    streamgate_cmd()
        .arg("--config")
        .arg(file.path())
        .arg("run")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Topology defines no units"));
}
