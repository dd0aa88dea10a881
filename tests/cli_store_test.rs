//! Integration tests for raw store access: `bk get/set/has/rm/keys`.

mod common;

use common::{TestEnv, stdout_json};
use predicates::prelude::*;

#[test]
fn test_set_then_get() {
    let env = TestEnv::new();
    let json = stdout_json(env.bk().args(["set", "InputSaveData|x", "hello"]));
    assert_eq!(json["replaced"], false);
    assert_eq!(json["bytes"], 5);

    let json = stdout_json(env.bk().args(["get", "InputSaveData|x"]));
    assert_eq!(json["found"], true);
    assert_eq!(json["value"], "hello");

    env.bk()
        .args(["-H", "get", "InputSaveData|x"])
        .assert()
        .success()
        .stdout(predicate::str::diff("hello\n"));
}

#[test]
fn test_get_missing_key() {
    let env = TestEnv::new();
    let json = stdout_json(env.bk().args(["get", "nope"]));
    assert_eq!(json["found"], false);
    assert!(json["value"].is_null());
}

#[test]
fn test_set_replaces() {
    let env = TestEnv::new();
    env.set("k", "1");
    let json = stdout_json(env.bk().args(["set", "k", "2"]));
    assert_eq!(json["replaced"], true);
    let json = stdout_json(env.bk().args(["get", "k"]));
    assert_eq!(json["value"], "2");
}

#[test]
fn test_has_and_rm() {
    let env = TestEnv::new();
    env.set("k", "v");
    assert_eq!(stdout_json(env.bk().args(["has", "k"]))["exists"], true);
    assert_eq!(stdout_json(env.bk().args(["rm", "k"]))["deleted"], true);
    assert_eq!(stdout_json(env.bk().args(["has", "k"]))["exists"], false);
    assert_eq!(stdout_json(env.bk().args(["rm", "k"]))["deleted"], false);
}

#[test]
fn test_keys_sorted_and_filtered() {
    let env = TestEnv::new();
    env.set("InputSaveData|b", "2");
    env.set("InputSaveData|a", "1");
    env.set("Other", "3");

    let json = stdout_json(env.bk().arg("keys"));
    assert_eq!(json["count"], 3);
    let keys: Vec<&str> = json["keys"]
        .as_array()
        .unwrap()
        .iter()
        .map(|k| k.as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["InputSaveData|a", "InputSaveData|b", "Other"]);

    let json = stdout_json(env.bk().args(["keys", "--prefix", "InputSaveData"]));
    assert_eq!(json["count"], 2);
}

#[test]
fn test_json_file_backend() {
    let env = TestEnv::new();
    let path = env.data_path().join("prefs.json");
    env.bk()
        .arg("--store")
        .arg(&path)
        .args(["set", "k", "v"])
        .assert()
        .success();

    let content = std::fs::read_to_string(&path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(parsed["k"], "v");

    let json = stdout_json(env.bk().arg("--store").arg(&path).args(["get", "k"]));
    assert_eq!(json["value"], "v");
}

#[test]
fn test_corrupt_json_store_fails() {
    let env = TestEnv::new();
    let path = env.data_path().join("prefs.json");
    std::fs::write(&path, "{not json").unwrap();
    env.bk()
        .arg("--store")
        .arg(&path)
        .arg("keys")
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_empty_store_human() {
    let env = TestEnv::new();
    env.bk()
        .args(["-H", "keys"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No keys in"));
}
