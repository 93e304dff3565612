#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;
use tempfile::tempdir;

mod common;

#[test]
fn test_ledger_survives_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("ledger_db");

    let first = common::command_file(&[
        r#"{"op": "add_payment_method", "user": "zed", "last4": "4242", "as": "card"}"#,
        r#"{"op": "capture_order", "buyer": "zed", "order_id": "o-1", "amount": 250, "method": "card"}"#,
        r#"{"op": "create_escrow", "order_id": "o-1", "amount": 250, "buyer": "zed", "seller": "yan"}"#,
    ]);
    Command::new(cargo_bin!("gig-ledger"))
        .arg(first.path())
        .arg("--db-path")
        .arg(&db_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("platform,250,250,0"));

    // The second run sees the captured order and its escrow.
    let second = common::command_file(&[
        r#"{"op": "create_escrow", "order_id": "o-1", "amount": 250, "buyer": "zed", "seller": "yan"}"#,
    ]);
    Command::new(cargo_bin!("gig-ledger"))
        .arg(second.path())
        .arg("--db-path")
        .arg(&db_path)
        .args(["--log-format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("platform,250,250,0"))
        .stderr(predicate::str::contains("already has an escrow"));
}
