use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Helper function to create a Command with --no-color and a database file
fn journey_cmd(db_path: &Path) -> Command {
    let mut cmd = Command::cargo_bin("journey").expect("Failed to find journey binary");
    cmd.arg("--no-color")
        .arg("--database-file")
        .arg(db_path)
        .env_remove("EMAIL_API_URL")
        .env_remove("OPENAI_API_KEY");
    cmd
}

fn run(db_path: &Path, args: &[&str]) {
    journey_cmd(db_path).args(args).assert().success();
}

/// Journey 1 with a tag step wired to an exit step, activated, plus contact 1.
fn seed_tagging_journey(db_path: &Path) {
    run(db_path, &["journey", "create", "Onboarding", "--company", "acme"]);
    run(
        db_path,
        &["step", "add", "1", "Tag", "--type", "add_tag", "--config", r#"{"tags":["onboarded"]}"#],
    );
    run(db_path, &["step", "add", "1", "Done", "--type", "exit"]);
    run(db_path, &["step", "connect", "1", "next", "2"]);
    run(db_path, &["journey", "activate", "1"]);
    run(
        db_path,
        &["contact", "create", "--company", "acme", "--email", "ada@example.com", "--first-name", "Ada"],
    );
}

#[test]
fn test_cli_list_empty_journeys() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cli_test.db");

    journey_cmd(&db_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("No journeys found."));
}

#[test]
fn test_cli_create_and_show_journey() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cli_test.db");

    journey_cmd(&db_path)
        .args([
            "journey",
            "create",
            "Welcome series",
            "--company",
            "acme",
            "--description",
            "Greets new signups",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created journey with ID: 1"))
        .stdout(predicate::str::contains("Greets new signups"));

    journey_cmd(&db_path)
        .args(["journey", "list", "--company", "acme"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Welcome series"));

    journey_cmd(&db_path)
        .args(["journey", "show", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("# 1. Welcome series"))
        .stdout(predicate::str::contains("No steps in this journey."));
}

#[test]
fn test_cli_show_missing_journey_fails() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cli_test.db");

    journey_cmd(&db_path)
        .args(["journey", "show", "7"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Journey with ID 7 not found"));
}

#[test]
fn test_cli_activate_empty_journey_fails() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cli_test.db");

    run(&db_path, &["journey", "create", "Empty", "--company", "acme"]);

    journey_cmd(&db_path)
        .args(["journey", "activate", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Journey has no steps"));
}

#[test]
fn test_cli_validate_reports_missing_branch() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cli_test.db");

    run(&db_path, &["journey", "create", "Branching", "--company", "acme"]);
    run(
        &db_path,
        &[
            "step",
            "add",
            "1",
            "Is customer",
            "--type",
            "condition",
            "--config",
            r#"{"conditions":[{"field":"lifecycle_stage","operator":"equals","value":"customer"}]}"#,
        ],
    );

    journey_cmd(&db_path)
        .args(["journey", "validate", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Journey is not valid."))
        .stdout(predicate::str::contains("missing its true branch target"));
}

#[test]
fn test_cli_add_and_connect_steps() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cli_test.db");

    run(&db_path, &["journey", "create", "Nurture", "--company", "acme"]);

    journey_cmd(&db_path)
        .args([
            "step",
            "add",
            "1",
            "Wait a day",
            "--type",
            "delay",
            "--config",
            r#"{"amount":1,"unit":"days"}"#,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created step with ID: 1"))
        .stdout(predicate::str::contains("Wait: 1 days"));

    run(&db_path, &["step", "add", "1", "Done", "--type", "exit"]);

    journey_cmd(&db_path)
        .args(["step", "connect", "1", "next", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Updated step with ID: 1"))
        .stdout(predicate::str::contains("port next"));
}

#[test]
fn test_cli_rejects_invalid_step_config() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cli_test.db");

    run(&db_path, &["journey", "create", "Nurture", "--company", "acme"]);

    journey_cmd(&db_path)
        .args(["step", "add", "1", "Broken", "--type", "delay", "--config", "not json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid JSON"));
}

#[test]
fn test_cli_enroll_runs_journey() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cli_test.db");

    seed_tagging_journey(&db_path);

    journey_cmd(&db_path)
        .args(["enroll", "1", "1", "--context", r#"{"campaign":"spring"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("# Enrollment 1"))
        .stdout(predicate::str::contains("Completed"))
        .stdout(predicate::str::contains("spring"));

    journey_cmd(&db_path)
        .args(["contact", "show", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("onboarded"));

    journey_cmd(&db_path)
        .args(["enrollment", "list", "--journey", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("## Enrollment 1"));
}

#[test]
fn test_cli_trigger_without_match() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cli_test.db");

    seed_tagging_journey(&db_path);

    journey_cmd(&db_path)
        .args([
            "trigger",
            "tag_added",
            "--data",
            r#"{"company_id":"acme","contact_id":1,"tag":"vip"}"#,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("No journeys matched the trigger."));
}

#[test]
fn test_cli_sweep_with_nothing_due() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cli_test.db");

    journey_cmd(&db_path)
        .arg("sweep")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Resumed 0 enrollments (0 succeeded, 0 failed)",
        ));
}

#[test]
fn test_cli_schema_describes_request() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cli_test.db");

    journey_cmd(&db_path)
        .arg("schema")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"action\""))
        .stdout(predicate::str::contains("enrollmentId"));
}
