//! Integration tests for cast-creds

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn setup() -> (TempDir, String, String) {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.toml");
    let db_path = dir.path().join("castline.db");
    let db_str = db_path.display().to_string().replace('\\', "/");
    fs::write(&config_path, format!("[database]\npath = \"{}\"\n", db_str)).unwrap();
    (dir, config_path.to_str().unwrap().to_string(), db_str)
}

fn cast_creds(config: &str, db: &str) -> Command {
    let mut cmd = Command::cargo_bin("cast-creds").unwrap();
    cmd.env("CASTLINE_CONFIG", config).env("CASTLINE_DB_PATH", db);
    cmd
}

#[test]
fn test_set_then_list_hides_token() {
    let (_dir, config, db) = setup();

    cast_creds(&config, &db)
        .args(["set", "alice", "twitter", "--token", "very-secret-token"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stored twitter credential for alice"));

    cast_creds(&config, &db)
        .args(["list", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("twitter"))
        .stdout(predicate::str::contains("active"))
        .stdout(predicate::str::contains("very-secret-token").not());
}

#[test]
fn test_set_from_stdin_with_account_id() {
    let (_dir, config, db) = setup();

    cast_creds(&config, &db)
        .args(["set", "alice", "instagram", "--stdin", "--account-id", "1784"])
        .write_stdin("ig-token\n")
        .assert()
        .success();

    let output = cast_creds(&config, &db)
        .args(["list", "alice", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(rows[0]["platform"], "instagram");
    assert_eq!(rows[0]["external_account_id"], "1784");
    assert_eq!(rows[0]["active"], true);
    assert!(!String::from_utf8_lossy(&output.stdout).contains("ig-token"));
}

#[test]
fn test_deactivate() {
    let (_dir, config, db) = setup();

    cast_creds(&config, &db)
        .args(["set", "alice", "linkedin", "--token", "t"])
        .assert()
        .success();
    cast_creds(&config, &db)
        .args(["deactivate", "alice", "linkedin"])
        .assert()
        .success();

    cast_creds(&config, &db)
        .args(["list", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("inactive"));
}

#[test]
fn test_deactivate_unknown_is_not_found() {
    let (_dir, config, db) = setup();

    cast_creds(&config, &db)
        .args(["deactivate", "alice", "twitter"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Not found"));
}

#[test]
fn test_set_requires_token() {
    let (_dir, config, db) = setup();

    cast_creds(&config, &db)
        .args(["set", "alice", "twitter"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("--token"));
}

#[test]
fn test_unknown_platform() {
    let (_dir, config, db) = setup();

    cast_creds(&config, &db)
        .args(["set", "alice", "myspace", "--token", "t"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Unknown platform"));
}
