mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn positionbook() -> Command {
    let mut cmd = Command::cargo_bin("positionbook").unwrap();
    cmd.env("POSITIONBOOK_LOG", "warn");
    cmd
}

#[test]
fn prints_default_config() {
    positionbook()
        .arg("--print-default-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("[risk]").and(predicate::str::contains("capital")));
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("conf").join("positionbook.toml");

    positionbook().args(["init", "--config"]).arg(&path).assert().success();
    assert!(fs::read_to_string(&path).unwrap().contains("[[instruments]]"));

    positionbook()
        .args(["init", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    positionbook().args(["init", "--force", "--config"]).arg(&path).assert().success();
}

#[test]
fn rebalance_writes_book_and_audit_log() {
    let dir = tempdir().unwrap();
    let config = common::write_fixture(dir.path());
    let config_path = dir.path().join("positionbook.toml");
    config.save_to_file(&config_path).unwrap();

    positionbook()
        .args(["rebalance", "--config"])
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("ES").and(predicate::str::contains("Wrote position book")));

    let book = fs::read_to_string(&config.data.output).unwrap();
    assert!(book.starts_with("symbol,contracts\n"));
    assert!(book.contains("ES,"));
    assert!(book.contains("ZN,-"));
    assert!(!book.contains("ZT"));
    assert!(config.data.audit_db.as_ref().unwrap().exists());
}

#[test]
fn dry_run_writes_nothing() {
    let dir = tempdir().unwrap();
    let config = common::write_fixture(dir.path());
    let config_path = dir.path().join("positionbook.toml");
    config.save_to_file(&config_path).unwrap();

    positionbook()
        .args(["rebalance", "--dry-run", "--config"])
        .arg(&config_path)
        .assert()
        .success();
    assert!(!config.data.output.exists());
    assert!(!config.data.audit_db.as_ref().unwrap().exists());
}

#[test]
fn rebalance_starts_from_held_positions() {
    let dir = tempdir().unwrap();
    let config = common::write_fixture(dir.path());
    let config_path = dir.path().join("positionbook.toml");
    config.save_to_file(&config_path).unwrap();
    let held = dir.path().join("held.csv");
    fs::write(&held, "symbol,contracts\nES,1\nZN,-2\n").unwrap();

    positionbook()
        .args(["rebalance", "--config"])
        .arg(&config_path)
        .arg("--held")
        .arg(&held)
        .assert()
        .success();
    assert!(config.data.output.exists());
}

#[test]
fn rebalance_prints_json_report() {
    let dir = tempdir().unwrap();
    let config = common::write_fixture(dir.path());
    let config_path = dir.path().join("positionbook.toml");
    config.save_to_file(&config_path).unwrap();

    let out = positionbook()
        .args(["rebalance", "--dry-run", "--json", "--config"])
        .arg(&config_path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert!(report["book"]["ES"].as_i64().unwrap() > 0);
    assert!(report["book"]["ZN"].as_i64().unwrap() < 0);
    assert!(report["book"].get("ZT").is_none());
    assert_eq!(report["trades"]["ES"], report["book"]["ES"]);
    assert!(report["scaling"]["multiplier"].as_f64().unwrap() <= 1.0);
}

#[test]
fn duplicate_held_positions_are_rejected() {
    let dir = tempdir().unwrap();
    let config = common::write_fixture(dir.path());
    let config_path = dir.path().join("positionbook.toml");
    config.save_to_file(&config_path).unwrap();
    let held = dir.path().join("held.csv");
    fs::write(&held, "symbol,contracts\nES,1\nZN,-2\nES,4\n").unwrap();

    positionbook()
        .args(["rebalance", "--config"])
        .arg(&config_path)
        .arg("--held")
        .arg(&held)
        .assert()
        .failure()
        .stderr(predicate::str::contains("duplicate"));
    assert!(!config.data.output.exists());
}

#[test]
fn filter_lists_rejected_instruments() {
    let dir = tempdir().unwrap();
    let config = common::write_fixture(dir.path());
    let config_path = dir.path().join("positionbook.toml");
    config.save_to_file(&config_path).unwrap();

    positionbook()
        .args(["filter", "--config"])
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"ZT\s+.*rejected").unwrap());
}

#[test]
fn missing_config_fails() {
    let dir = tempdir().unwrap();
    positionbook()
        .args(["rebalance", "--config"])
        .arg(dir.path().join("nope.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn missing_market_data_fails_without_output() {
    let dir = tempdir().unwrap();
    let config = common::write_fixture(dir.path());
    fs::remove_file(config.data.price_dir.join("ES.csv")).unwrap();
    let config_path = dir.path().join("positionbook.toml");
    config.save_to_file(&config_path).unwrap();

    positionbook()
        .args(["rebalance", "--config"])
        .arg(&config_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("ES"));
    assert!(!config.data.output.exists());
}
