use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

mod common;

const HEADER: &str = "user,balance,reserved,available";

#[test]
fn test_replays_fixture_commands() {
    let mut cmd = Command::new(cargo_bin!("gig-ledger"));
    cmd.arg("tests/fixtures/commands.jsonl")
        .arg("--promo-codes")
        .arg("tests/fixtures/promo_codes.csv")
        .arg("--log-format")
        .arg("json");

    cmd.assert()
        .success()
        .stdout(predicate::str::starts_with(HEADER))
        .stdout(predicate::str::contains("alice,0,0,0"))
        .stdout(predicate::str::contains("bob,0,0,0"))
        .stdout(predicate::str::contains("carol,700,0,700"))
        .stdout(predicate::str::contains("platform,7920,0,7920"))
        .stderr(predicate::str::contains("\"failed\":2"));
}

#[test]
fn test_stdout_is_only_the_report() {
    let file = common::command_file(&[
        r#"{"op": "add_payment_method", "user": "zed", "last4": "4242", "as": "card"}"#,
        r#"{"op": "capture_order", "buyer": "zed", "order_id": "o-1", "amount": 250, "method": "card"}"#,
    ]);

    let output = Command::new(cargo_bin!("gig-ledger"))
        .arg(file.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, [HEADER, "platform,250,0,250", "zed,0,0,0"]);
}

#[test]
fn test_empty_command_file_prints_header() {
    let file = common::command_file(&["# nothing to do"]);
    Command::new(cargo_bin!("gig-ledger"))
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::diff(format!("{HEADER}\n")));
}

#[test]
fn test_missing_input_file_fails() {
    Command::new(cargo_bin!("gig-ledger"))
        .arg("tests/fixtures/does-not-exist.jsonl")
        .assert()
        .failure();
}

#[test]
fn test_platform_account_is_configurable() {
    let file = common::command_file(&[
        r#"{"op": "add_payment_method", "user": "zed", "last4": "4242", "as": "card"}"#,
        r#"{"op": "capture_order", "buyer": "zed", "order_id": "o-1", "amount": 250, "method": "card"}"#,
    ]);
    Command::new(cargo_bin!("gig-ledger"))
        .arg(file.path())
        .env("GIG_LEDGER_PLATFORM_ACCOUNT", "house")
        .assert()
        .success()
        .stdout(predicate::str::contains("house,250,0,250"));
}

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_db_path_needs_rocksdb_build() {
    let file = common::command_file(&["# nothing to do"]);
    let dir = tempfile::tempdir().unwrap();
    Command::new(cargo_bin!("gig-ledger"))
        .arg(file.path())
        .arg("--db-path")
        .arg(dir.path().join("db"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("storage-rocksdb"));
}
