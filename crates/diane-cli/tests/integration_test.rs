use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_command_succeeds() {
    let mut cmd = Command::cargo_bin("diane").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Diane MCP hub"));
}

#[test]
fn version_command_succeeds() {
    let mut cmd = Command::cargo_bin("diane").unwrap();
    cmd.arg("--version").assert().success();
}

#[test]
fn servers_list_on_fresh_data_dir_is_empty_but_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("diane").unwrap();
    cmd.arg("--data-dir")
        .arg(dir.path())
        .arg("servers")
        .arg("list")
        .assert()
        .success();
}

#[test]
fn servers_add_stdio_then_list_shows_it() {
    let dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("diane")
        .unwrap()
        .arg("--data-dir")
        .arg(dir.path())
        .arg("servers")
        .arg("add-stdio")
        .arg("gh")
        .arg("gh-mcp")
        .assert()
        .success();

    Command::cargo_bin("diane")
        .unwrap()
        .arg("--data-dir")
        .arg(dir.path())
        .arg("servers")
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("gh"));
}

#[test]
fn contexts_create_then_set_default() {
    let dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("diane")
        .unwrap()
        .arg("--data-dir")
        .arg(dir.path())
        .arg("contexts")
        .arg("create")
        .arg("work")
        .arg("Work context")
        .assert()
        .success();

    Command::cargo_bin("diane")
        .unwrap()
        .arg("--data-dir")
        .arg(dir.path())
        .arg("contexts")
        .arg("set-default")
        .arg("work")
        .assert()
        .success();

    Command::cargo_bin("diane")
        .unwrap()
        .arg("--data-dir")
        .arg(dir.path())
        .arg("contexts")
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("work"));
}
