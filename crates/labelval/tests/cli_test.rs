//! Integration tests for the `labelval` CLI binary.
//!
//! These tests validate argument parsing, help output, shell completions,
//! config handling and error exit codes, all without a live node.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

const ISOLATED_HOME: &str = "/tmp/labelval-cli-test-nonexistent";

/// Build a [`Command`] for the `labelval` binary with env isolation.
///
/// Clears all `LABELVAL_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn labelval_cmd() -> assert_cmd::Command {
    labelval_cmd_with_home(ISOLATED_HOME)
}

fn labelval_cmd_with_home(home: &str) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("labelval");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", format!("{home}/.config"))
        .env("XDG_DATA_HOME", format!("{home}/.local/share"))
        .env_remove("RUST_LOG");
    for var in [
        "LABELVAL_PROFILE",
        "LABELVAL_HOST",
        "LABELVAL_NODE",
        "LABELVAL_SYSTEM_PORT",
        "LABELVAL_NODE_PORT",
        "LABELVAL_USERNAME",
        "LABELVAL_PASSWORD",
        "LABELVAL_OUTPUT",
        "LABELVAL_TIMEOUT",
        "LABELVAL_PRINT_COMMAND",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = labelval_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    labelval_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("verification nodes")
            .and(predicate::str::contains("inspect"))
            .and(predicate::str::contains("run-mode"))
            .and(predicate::str::contains("sectors")),
    );
}

#[test]
fn test_version_flag() {
    labelval_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("labelval"));
}

#[test]
fn test_sectors_help_lists_subcommands() {
    labelval_cmd()
        .args(["sectors", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("list")
                .and(predicate::str::contains("clear"))
                .and(predicate::str::contains("create")),
        );
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    labelval_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_invalid_shell() {
    labelval_cmd()
        .args(["completions", "tcsh"])
        .assert()
        .failure()
        .code(2);
}

// ── Argument validation ─────────────────────────────────────────────

#[test]
fn test_invalid_output_format() {
    labelval_cmd()
        .args(["--output", "xml", "status"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_print_requires_state() {
    labelval_cmd().arg("print").assert().failure().code(2);
}

#[test]
fn test_invalid_wait_duration() {
    labelval_cmd()
        .args(["inspect", "--wait", "soon"])
        .assert()
        .failure()
        .code(2);
}

// ── Configuration errors ────────────────────────────────────────────

#[test]
fn test_status_without_config_is_usage_error() {
    let output = labelval_cmd().arg("status").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = combined_output(&output);
    assert!(
        text.contains("No node configured"),
        "Expected config error in output:\n{text}"
    );
}

#[test]
fn test_host_without_credentials_is_auth_error() {
    let output = labelval_cmd()
        .args(["--host", "127.0.0.1", "status"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(combined_output(&output).contains("No credentials"));
}

#[test]
fn test_unknown_profile_is_reported() {
    let output = labelval_cmd()
        .args(["--profile", "line-9", "status"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("line-9"));
}

#[test]
fn test_unreachable_node_is_connection_error() {
    // Port 9 (discard) is closed on test machines; the login fails fast.
    let output = labelval_cmd()
        .args([
            "--host",
            "127.0.0.1",
            "--node-port",
            "9",
            "-u",
            "admin",
            "--password",
            "admin",
            "--timeout",
            "2",
            "status",
        ])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(7), "{}", combined_output(&output));
}

// ── Config subcommands ──────────────────────────────────────────────

#[test]
fn test_config_path_prints_toml_path() {
    labelval_cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_add_profile_then_show_redacts() {
    let home = tempfile::tempdir().unwrap();
    let home = home.path().to_str().unwrap();

    labelval_cmd_with_home(home)
        .args([
            "config",
            "add-profile",
            "line-1",
            "--host",
            "10.0.0.7",
            "--node-number",
            "2",
            "--username",
            "operator",
        ])
        .assert()
        .success();

    labelval_cmd_with_home(home)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("10.0.0.7")
                .and(predicate::str::contains("line-1"))
                .and(predicate::str::contains("operator")),
        );

    labelval_cmd_with_home(home)
        .args(["--output", "plain", "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::diff("line-1\n"));
}
