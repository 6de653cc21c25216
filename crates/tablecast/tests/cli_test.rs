//! Integration tests for the `tablecast` CLI binary.
//!
//! These tests validate argument parsing, help output, shell completions,
//! configuration handling and error exit codes without a live backend.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `tablecast` binary with env isolation.
///
/// Clears all `TABLECAST_*` env vars and points config directories at
/// `home` so tests never touch the user's real configuration.
fn tablecast_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("tablecast");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("RUST_LOG")
        .env_remove("TABLECAST_PROFILE")
        .env_remove("TABLECAST_DEFAULT_PROFILE")
        .env_remove("TABLECAST_BASE_URL")
        .env_remove("TABLECAST_INSECURE")
        .env_remove("TABLECAST_TIMEOUT")
        .env_remove("TABLECAST_USERNAME")
        .env_remove("TABLECAST_PASSWORD");
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
    let home = tempfile::tempdir().unwrap();
    let output = tablecast_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    let home = tempfile::tempdir().unwrap();
    tablecast_cmd(home.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("event streams")
            .and(predicate::str::contains("login"))
            .and(predicate::str::contains("watch"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    let home = tempfile::tempdir().unwrap();
    tablecast_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tablecast"));
}

#[test]
fn test_watch_help_lists_topics() {
    let home = tempfile::tempdir().unwrap();
    tablecast_cmd(home.path())
        .args(["watch", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--screen").and(predicate::str::contains("--json")));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    let home = tempfile::tempdir().unwrap();
    tablecast_cmd(home.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    let home = tempfile::tempdir().unwrap();
    tablecast_cmd(home.path())
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tablecast"));
}

// ── Argument validation ─────────────────────────────────────────────

#[test]
fn test_unknown_topic_is_a_usage_error() {
    let home = tempfile::tempdir().unwrap();
    let output = tablecast_cmd(home.path())
        .args(["watch", "--screen", "tables"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("unknown topic 'tables'"));
}

#[test]
fn test_init_rejects_non_http_url() {
    let home = tempfile::tempdir().unwrap();
    let output = tablecast_cmd(home.path())
        .args(["config", "init", "--base-url", "ftp://pos.example.com"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("unsupported scheme"));
}

// ── Missing configuration ───────────────────────────────────────────

#[test]
fn test_watch_without_config_explains_setup() {
    let home = tempfile::tempdir().unwrap();
    let output = tablecast_cmd(home.path()).arg("watch").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let text = combined_output(&output);
    assert!(text.contains("No backend configured"), "got:\n{text}");
    assert!(text.contains("config init"), "got:\n{text}");
}

#[test]
fn test_unknown_profile_exits_not_found() {
    let home = tempfile::tempdir().unwrap();
    let output = tablecast_cmd(home.path())
        .args(["--profile", "bar", "login"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("Profile 'bar' not found"));
}

// ── Config round trip ───────────────────────────────────────────────

#[test]
fn test_config_path_points_at_toml() {
    let home = tempfile::tempdir().unwrap();
    tablecast_cmd(home.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_init_then_show_and_list_profiles() {
    let home = tempfile::tempdir().unwrap();

    tablecast_cmd(home.path())
        .args([
            "--profile",
            "floor",
            "config",
            "init",
            "--base-url",
            "http://10.0.2.2:8080/api/v1",
            "--username",
            "alice",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("Profile 'floor' saved"));

    tablecast_cmd(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[profiles.floor]")
                .and(predicate::str::contains("http://10.0.2.2:8080/api/v1"))
                .and(predicate::str::contains("username = \"alice\"")),
        );

    tablecast_cmd(home.path())
        .args(["config", "profiles"])
        .assert()
        .success()
        .stdout(predicate::str::contains("* floor"));
}

#[test]
fn test_use_unknown_profile_fails() {
    let home = tempfile::tempdir().unwrap();
    tablecast_cmd(home.path())
        .args(["config", "use", "kitchen"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("kitchen"));
}
