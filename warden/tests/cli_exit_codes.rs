use std::path::Path;
use std::process::{Command, Output};

use warden::exit_codes;
use warden::test_support::workspace_fixture;

fn warden(workspace: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_warden"))
        .arg("--workspace")
        .arg(workspace)
        .args(args)
        .output()
        .expect("run warden")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("json on stdout")
}

#[test]
fn ls_lists_workspace_root() {
    let temp = workspace_fixture();
    let output = warden(temp.path(), &["ls"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let json = stdout_json(&output);
    assert_eq!(json["success"], true);
    let names: Vec<&str> = json["files"]
        .as_array()
        .expect("files")
        .iter()
        .filter_map(|entry| entry["name"].as_str())
        .collect();
    assert_eq!(names, ["file1.txt", "file2.txt", "folder1"]);
}

#[test]
fn cat_outside_workspace_is_rejected() {
    let temp = workspace_fixture();
    let output = warden(temp.path(), &["cat", "../../etc/passwd"]);
    assert_eq!(output.status.code(), Some(exit_codes::REJECTED));

    let json = stdout_json(&output);
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], "PATH_OUTSIDE_WORKSPACE");
}

#[test]
fn missing_workspace_is_invalid() {
    let temp = workspace_fixture();
    let output = warden(&temp.path().join("does-not-exist"), &["ls"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert_eq!(stdout_json(&output)["code"], "INVALID_WORKSPACE");
}

#[test]
fn check_reports_first_rejected_path() {
    let temp = workspace_fixture();
    let ok = warden(temp.path(), &["check", "file1.txt", "folder1/nested.txt"]);
    assert_eq!(ok.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout_json(&ok)["paths"].as_array().map(Vec::len), Some(2));

    let rejected = warden(temp.path(), &["check", "file1.txt", "../escape"]);
    assert_eq!(rejected.status.code(), Some(exit_codes::REJECTED));
}

#[test]
fn write_then_cat_round_trips() {
    let temp = workspace_fixture();
    let write = warden(temp.path(), &["write", "notes/todo.txt", "--content", "hello"]);
    assert_eq!(write.status.code(), Some(exit_codes::FAILED));

    let into_existing_dir = warden(
        temp.path(),
        &["write", "folder1/todo.txt", "--content", "hello"],
    );
    assert_eq!(into_existing_dir.status.code(), Some(exit_codes::OK));
    let cat = warden(temp.path(), &["cat", "folder1/todo.txt"]);
    assert_eq!(cat.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout_json(&cat)["content"], "hello");
}

#[test]
fn broken_config_exits_invalid() {
    let temp = workspace_fixture();
    std::fs::write(temp.path().join("warden.toml"), "[tool]\ntimeout_secs = 0\n")
        .expect("write config");
    let output = warden(temp.path(), &["ls"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}
