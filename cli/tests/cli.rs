#![expect(clippy::expect_used)]

//! End-to-end checks of the `shellgrade` binary that need no container
//! runtime: argument handling, schema validation, and the offline grade
//! path.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use shellgrade_protocol::Command as TestCommand;
use shellgrade_protocol::Event;
use shellgrade_protocol::EventType;
use shellgrade_protocol::GenericCmd;
use shellgrade_protocol::Line;
use shellgrade_protocol::RunResult;
use shellgrade_protocol::Section;
use shellgrade_protocol::TestCase;
use tempfile::TempDir;

const PROMPT: &str = "<osnuser@osntesting:/app> ";

const TESTCASES_JSON: &str = r#"{
    "testcases": [{
        "section": "A.1",
        "description": "echo hi",
        "cmds": [{"cmd": "echo hi", "sequential_outputs": [{"text": "hi"}]}]
    }]
}"#;

fn shellgrade() -> Command {
    Command::cargo_bin("shellgrade").expect("binary builds")
}

#[test]
fn help_lists_both_subcommands() {
    shellgrade()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("grade"));
}

#[test]
fn grade_rejects_an_invalid_testcase_file() {
    let dir = TempDir::new().expect("tempdir");
    let testcases = dir.path().join("testcases.json");
    fs::write(&testcases, r#"{"testcases": [{"section": "Z.9"}]}"#).expect("write testcases");

    shellgrade()
        .args(["grade", "--logging-dir"])
        .arg(dir.path())
        .arg("--testcases")
        .arg(&testcases)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unable to validate"));
}

#[test]
fn grade_reports_a_recorded_pass() {
    let dir = TempDir::new().expect("tempdir");
    let testcases = dir.path().join("testcases.json");
    fs::write(&testcases, TESTCASES_JSON).expect("write testcases");

    let log_dir = dir.path().join("logs");
    let tests_dir = log_dir.join("tests");
    fs::create_dir_all(&tests_dir).expect("create tests dir");

    let cmd = TestCommand::Generic(GenericCmd {
        cmd: "echo hi".to_string(),
        sequential_outputs: vec![Line::exact("hi")],
        nonsequential_outputs: Vec::new(),
        ignore_output: false,
        cwd_after: None,
        expect_exit: false,
        skip_prompt_check: false,
    });
    let result = RunResult {
        testcase: TestCase {
            section: Section::A1,
            description: "echo hi".to_string(),
            cmds: vec![cmd.clone()],
            timeout: 2.0,
            strict_prompt: false,
            requires_test_folder: false,
        },
        events: vec![
            Event::new(EventType::Output, PROMPT),
            Event::new(
                EventType::Input,
                serde_json::to_string(&cmd).expect("command serializes"),
            ),
            Event::new(EventType::Output, "hi"),
            Event::new(EventType::Output, PROMPT),
        ],
        raw_log: String::new(),
        driver_log: String::new(),
    };
    fs::write(
        tests_dir.join("test_0.log"),
        serde_json::to_string_pretty(&result).expect("result serializes"),
    )
    .expect("write run result");

    shellgrade()
        .args(["--color", "never", "grade", "--logging-dir"])
        .arg(&log_dir)
        .arg("--testcases")
        .arg(&testcases)
        .assert()
        .success()
        .stdout(predicate::str::contains("PASS test_0"))
        .stdout(predicate::str::contains("Passed: 1/1"));

    assert!(log_dir.join("summary.json").is_file());
    assert!(log_dir.join("grade/test_0_grade.json").is_file());
}

#[test]
fn grade_fails_when_no_logs_exist() {
    let dir = TempDir::new().expect("tempdir");
    let testcases = dir.path().join("testcases.json");
    fs::write(&testcases, TESTCASES_JSON).expect("write testcases");
    let empty = dir.path().join("empty");
    fs::create_dir(&empty).expect("create empty dir");

    shellgrade()
        .args(["grade", "--logging-dir"])
        .arg(&empty)
        .arg("--testcases")
        .arg(&testcases)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no recorded test logs"));
}

#[test]
fn run_rejects_a_missing_binaries_dir() {
    let dir = TempDir::new().expect("tempdir");
    let testcases = dir.path().join("testcases.json");
    fs::write(&testcases, TESTCASES_JSON).expect("write testcases");

    shellgrade()
        .args(["run", "--binaries-dir"])
        .arg(dir.path().join("does-not-exist"))
        .arg("--logging-dir")
        .arg(dir.path().join("logs"))
        .arg("--testcases")
        .arg(&testcases)
        .assert()
        .failure();
}
