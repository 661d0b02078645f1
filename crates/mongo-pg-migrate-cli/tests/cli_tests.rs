//! CLI integration tests for mongo-pg-migrate.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for various error conditions.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the mongo-pg-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("mongo-pg-migrate").unwrap()
}

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("resume"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("rollback"))
        .stdout(predicate::str::contains("recover"))
        .stdout(predicate::str::contains("backup"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mongo-pg-migrate"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"));
}

#[test]
fn test_rollback_subcommand_help() {
    cmd()
        .args(["rollback", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--confirmed"))
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--restore-archive"));
}

#[test]
fn test_recover_subcommand_help() {
    cmd()
        .args(["recover", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--strategy"))
        .stdout(predicate::str::contains("--analyze-only"));
}

#[test]
fn test_missing_config_file_fails() {
    cmd()
        .args(["--config", "/nonexistent/config.yaml", "validate"])
        .assert()
        .failure();
}

#[test]
fn test_invalid_yaml_config_fails() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "this is: [not, valid, config").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "validate"])
        .assert()
        .failure();
}

#[test]
fn test_config_with_zero_batch_size_fails_fast() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
source:
  uri: mongodb://localhost:27017
  database: clinical
target:
  host: localhost
  database: clinical
  user: postgres
  password: secret
migration:
  batch_size: 0
"#
    )
    .unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("batch_size"));
}

#[test]
fn test_rollback_requires_migration_id() {
    cmd().arg("rollback").assert().failure();
}

#[test]
fn test_unknown_subcommand_fails() {
    cmd().arg("frobnicate").assert().failure();
}
