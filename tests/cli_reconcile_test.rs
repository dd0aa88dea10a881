//! Integration tests for `bk reconcile`.

mod common;

use common::{TestEnv, stdout_json};
use predicates::prelude::*;

const SNAPSHOT_KEY: &str = "InputSaveData_DeviceAssignments";
const PAD_INSTANCE: &str = "6f1c2a4e-0000-4000-8000-000000000001";

/// Subject 0 had a pad with an instance guid, subject 1 a generic pad without one.
fn save_snapshot(env: &TestEnv) {
    let snapshot = format!(
        r#"{{"subjects": [
            {{"subject_id": 0, "has_keyboard": true, "devices": [
                {{"instance_guid": "{}", "hardware_identifier": "XInput", "session_id": 1}}
            ]}},
            {{"subject_id": 1, "devices": [
                {{"hardware_identifier": "Generic Pad", "session_id": 2}}
            ]}}
        ]}}"#,
        PAD_INSTANCE
    );
    env.set(SNAPSHOT_KEY, &snapshot);
}

fn devices() -> String {
    format!(
        r#"[
            {{"id": 11, "kind": "joystick", "hardware_identifier": "generic pad"}},
            {{"id": 10, "kind": "joystick", "instance_guid": "{}", "hardware_identifier": "XInput"}}
        ]"#,
        PAD_INSTANCE
    )
}

#[test]
fn test_precise_then_imprecise() {
    let env = TestEnv::new();
    save_snapshot(&env);

    let json = stdout_json(env.bk().args(["reconcile", "--devices", &devices()]));
    assert_eq!(json["applied"], true);
    assert_eq!(json["precise"], 1);
    assert_eq!(json["imprecise"], 1);
    assert_eq!(json["auto"], 0);
    assert_eq!(json["mapping"]["0"], serde_json::json!([10]));
    assert_eq!(json["mapping"]["1"], serde_json::json!([11]));
}

#[test]
fn test_precise_only_leaves_generic_pad_to_auto_assign() {
    let env = TestEnv::new();
    save_snapshot(&env);

    let json = stdout_json(env.bk().args(["reconcile", "--precise-only", "--devices", &devices()]));
    assert_eq!(json["precise"], 1);
    assert_eq!(json["imprecise"], 0);
    assert_eq!(json["auto"], 1);
    assert_eq!(json["mapping"]["1"], serde_json::json!([11]));
}

#[test]
fn test_save_writes_new_session_ids() {
    let env = TestEnv::new();
    save_snapshot(&env);

    let json = stdout_json(env.bk().args(["reconcile", "--save", "--devices", &devices()]));
    assert_eq!(json["saved"], true);

    let stored = stdout_json(env.bk().args(["get", SNAPSHOT_KEY]));
    let snapshot: serde_json::Value =
        serde_json::from_str(stored["value"].as_str().unwrap()).unwrap();
    let subjects = snapshot["subjects"].as_array().unwrap();
    assert_eq!(subjects[0]["devices"][0]["session_id"], 10);
    assert_eq!(subjects[1]["devices"][0]["session_id"], 11);
}

#[test]
fn test_missing_snapshot_auto_assigns() {
    let env = TestEnv::new();
    let json = stdout_json(env.bk().args([
        "reconcile",
        "--subject",
        "0,1",
        "--devices",
        r#"[{"id": 4, "kind": "joystick"}, {"id": 5, "kind": "joystick"}]"#,
    ]));
    assert_eq!(json["applied"], true);
    assert_eq!(json["auto"], 2);
    assert_eq!(json["mapping"]["0"], serde_json::json!([4]));
    assert_eq!(json["mapping"]["1"], serde_json::json!([5]));
}

#[test]
fn test_malformed_snapshot_changes_nothing() {
    let env = TestEnv::new();
    env.set(SNAPSHOT_KEY, "garbage");
    let json = stdout_json(env.bk().args([
        "reconcile",
        "--subject",
        "0",
        "--devices",
        r#"[{"id": 4, "kind": "joystick"}]"#,
    ]));
    assert_eq!(json["applied"], false);
}

#[test]
fn test_no_subjects_is_an_error() {
    let env = TestEnv::new();
    env.bk()
        .args(["reconcile", "--devices", "[]"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--subject"));
}

#[test]
fn test_human_output_lists_subjects() {
    let env = TestEnv::new();
    save_snapshot(&env);
    env.bk()
        .args(["-H", "reconcile", "--devices", &devices()])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 precise, 1 imprecise"))
        .stdout(predicate::str::contains("subject 1: 11"));
}
