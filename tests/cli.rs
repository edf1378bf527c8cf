//! End-to-end tests driving the `crmflow` binary against a temporary home.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

const WELCOME_RULE: &str = r#"
name: welcome
description: Greet new leads
entity_type: lead
trigger:
  trigger_type: on_create
conditions:
  match: all
  rules:
    - field: email
      operator: is_not_empty
actions:
  - type: add_tag
    tags: [welcomed]
  - type: send_email
    to: "{email}"
    subject: Welcome aboard
    body: "Hi {name}"
  - type: create_task
    title: "Call {name}"
    due_in_days: 2
"#;

const QUALIFY_RULE: &str = r"
name: qualify
trigger:
  trigger_type: on_update
  config:
    type: update
    watched_fields: [stage]
conditions:
  rules:
    - field: stage
      operator: equals
      value: qualified
actions:
  - type: assign_owner
    pool: [alice, bob]
";

fn crmflow(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("crmflow").unwrap();
    cmd.env("CRMFLOW_HOME", home)
        .env_remove("CRMFLOW_ORG")
        .env_remove("CRMFLOW_DB")
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1");
    cmd
}

fn json_output(cmd: &mut Command) -> Value {
    let output = cmd.arg("--output").arg("json").output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

fn create_rule(home: &TempDir, yaml: &str) {
    let file = home.path().join("rule.yaml");
    std::fs::write(&file, yaml).unwrap();
    crmflow(home.path())
        .args(["rules", "create", "--file"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Created rule"));
}

#[test]
fn test_help() {
    let home = TempDir::new().unwrap();
    crmflow(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("workflow automation"));
}

#[test]
fn test_rules_create_and_list() {
    let home = TempDir::new().unwrap();
    create_rule(&home, WELCOME_RULE);

    let listed = json_output(crmflow(home.path()).args(["rules", "list"]));
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["items"][0]["name"], "welcome");
    assert_eq!(listed["items"][0]["organization_id"], "default");

    crmflow(home.path())
        .args(["rules", "show", "welcome"])
        .assert()
        .success()
        .stdout(predicate::str::contains("welcome"));
}

#[test]
fn test_record_create_runs_matching_rule() {
    let home = TempDir::new().unwrap();
    create_rule(&home, WELCOME_RULE);

    let created = json_output(crmflow(home.path()).args([
        "records",
        "create",
        "lead",
        "--data",
        r#"{"name": "Ann", "email": "ann@example.com"}"#,
    ]));

    assert_eq!(created["record"]["tags"], serde_json::json!(["welcomed"]));
    let automation = &created["automation"]["on_create"];
    assert_eq!(automation["rules_triggered"], 1);
    assert_eq!(automation["actions_executed"], 3);

    let shown = json_output(crmflow(home.path()).args(["records", "show", "1"]));
    assert_eq!(shown["tasks"][0]["title"], "Call Ann");
}

#[test]
fn test_rule_skipped_when_conditions_fail() {
    let home = TempDir::new().unwrap();
    create_rule(&home, WELCOME_RULE);

    let created = json_output(crmflow(home.path()).args(["records", "create", "lead"]));
    assert_eq!(created["automation"]["on_create"]["rules_triggered"], 0);
    assert_eq!(created["record"]["tags"], serde_json::json!([]));
}

#[test]
fn test_update_round_robin() {
    let home = TempDir::new().unwrap();
    create_rule(&home, QUALIFY_RULE);

    for _ in 0..2 {
        crmflow(home.path())
            .args(["records", "create", "deal", "--stage", "new"])
            .assert()
            .success();
    }

    let first = json_output(crmflow(home.path()).args([
        "records", "update", "1", "--set", "stage=qualified",
    ]));
    let second = json_output(crmflow(home.path()).args([
        "records", "update", "2", "--set", "stage=qualified",
    ]));

    assert_eq!(first["record"]["owner_id"], "alice");
    assert_eq!(second["record"]["owner_id"], "bob");
}

#[test]
fn test_manual_run_dry_run() {
    let home = TempDir::new().unwrap();
    create_rule(&home, WELCOME_RULE);
    crmflow(home.path())
        .args(["records", "create", "lead", "--no-rules", "--data", r#"{"email": "x@example.com"}"#])
        .assert()
        .success();

    let run = json_output(crmflow(home.path()).args(["run", "welcome", "--record", "1", "--dry-run"]));
    assert_eq!(run["dry_run"], true);
    assert_eq!(run["status"], "completed");

    let shown = json_output(crmflow(home.path()).args(["records", "show", "1"]));
    assert_eq!(shown["record"]["tags"], serde_json::json!([]));
    assert_eq!(shown["tasks"], serde_json::json!([]));
}

#[test]
fn test_queue_and_tick() {
    let home = TempDir::new().unwrap();
    create_rule(&home, WELCOME_RULE);
    crmflow(home.path())
        .args(["records", "create", "lead", "--no-rules", "--data", r#"{"email": "q@example.com"}"#])
        .assert()
        .success();

    crmflow(home.path())
        .args(["run", "welcome", "--record", "1", "--queue"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Queued job #1"));

    let stats = json_output(crmflow(home.path()).args(["jobs", "stats"]));
    assert_eq!(stats["pending"], 1);

    let tick = json_output(crmflow(home.path()).arg("tick"));
    assert_eq!(tick["completed"], 1);

    let stats = json_output(crmflow(home.path()).args(["jobs", "stats"]));
    assert_eq!(stats["pending"], 0);
    assert_eq!(stats["completed"], 1);

    let runs = json_output(crmflow(home.path()).args(["runs", "list", "--rule", "welcome"]));
    assert_eq!(runs["count"], 1);
}

#[test]
fn test_organizations_are_isolated() {
    let home = TempDir::new().unwrap();
    create_rule(&home, WELCOME_RULE);

    let listed = json_output(crmflow(home.path()).args(["--org", "globex", "rules", "list"]));
    assert_eq!(listed["count"], 0);

    crmflow(home.path())
        .args(["--org", "globex", "rules", "show", "welcome"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not found"));
}

#[test]
fn test_unknown_record_fails() {
    let home = TempDir::new().unwrap();
    crmflow(home.path())
        .args(["records", "show", "99"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_export_import_round_trip() {
    let home = TempDir::new().unwrap();
    create_rule(&home, WELCOME_RULE);

    let output = crmflow(home.path())
        .args(["rules", "export", "-"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let file = home.path().join("export.yaml");
    std::fs::write(&file, &output.stdout).unwrap();

    let imported = json_output(
        crmflow(home.path())
            .args(["--org", "globex", "rules", "import"])
            .arg(&file),
    );
    assert_eq!(imported["created"], 1);

    let listed = json_output(crmflow(home.path()).args(["--org", "globex", "rules", "list"]));
    assert_eq!(listed["items"][0]["organization_id"], "globex");
}
