//! 命令行集成测试（不需要硬件）

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn cli(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("electrak-cli").unwrap();
    cmd.arg("--config").arg(config);
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("electrak-cli")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("provision"))
        .stdout(predicate::str::contains("feedback"))
        .stdout(predicate::str::contains("shell"));
}

#[test]
fn test_config_set_then_get() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    cli(&path)
        .args(["config", "set", "--interface", "can1", "--node", "20"])
        .args(["--acceleration-overflow", "truncate"])
        .assert()
        .success();

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("interface = \"can1\""));
    assert!(written.contains("[driver]"));

    cli(&path).args(["config", "get", "interface"]).assert().success().stdout("can1\n");
    cli(&path).args(["config", "get", "node_id"]).assert().success().stdout("20\n");
    cli(&path)
        .args(["config", "get", "acceleration_overflow"])
        .assert()
        .success()
        .stdout("truncate\n");
}

#[test]
fn test_config_set_rejects_invalid_node() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    cli(&path).args(["config", "set", "--node", "0"]).assert().failure();
    assert!(!path.exists());
}

#[test]
fn test_config_get_unknown_key_fails() {
    let dir = tempfile::tempdir().unwrap();
    cli(&dir.path().join("config.toml"))
        .args(["config", "get", "colour"])
        .assert()
        .failure();
}

#[test]
fn test_config_check_without_file() {
    let dir = tempfile::tempdir().unwrap();
    cli(&dir.path().join("config.toml"))
        .args(["config", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("19"));
}

#[test]
fn test_command_without_channel_fails() {
    let dir = tempfile::tempdir().unwrap();
    cli(&dir.path().join("config.toml"))
        .args(["read", "0x2102"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--interface"));
}

#[test]
fn test_connect_failure_exits_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("no-such-adapter");
    cli(&dir.path().join("config.toml"))
        .args(["--driver", "slcan", "--interface"])
        .arg(&missing)
        .arg("stop")
        .assert()
        .failure();
}

#[test]
fn test_invalid_address_rejected_by_parser() {
    let dir = tempfile::tempdir().unwrap();
    cli(&dir.path().join("config.toml"))
        .args(["read", "not-an-address"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid"));
}
