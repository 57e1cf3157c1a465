//! CLI smoke tests for the `co` binary

use assert_cmd::Command;
use predicates::prelude::*;

/// Write a config pointing the store into the given temp dir
fn write_config(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let config_path = dir.path().join("conductor.yml");
    let store_path = dir.path().join("state.db");
    std::fs::write(
        &config_path,
        format!("storage:\n  store-path: {}\n", store_path.display()),
    )
    .unwrap();
    config_path
}

fn co(dir: &tempfile::TempDir) -> Command {
    let config = write_config(dir);
    let mut cmd = Command::cargo_bin("co").unwrap();
    cmd.arg("--config").arg(config);
    cmd
}

#[test]
fn task_list_on_fresh_store_is_empty_and_succeeds() {
    let dir = tempfile::TempDir::new().unwrap();
    co(&dir).args(["task", "list"]).assert().success().stdout("");
}

#[test]
fn work_list_on_fresh_store_succeeds() {
    let dir = tempfile::TempDir::new().unwrap();
    co(&dir).args(["work", "list"]).assert().success();
}

#[test]
fn task_show_missing_task_fails_nonzero() {
    let dir = tempfile::TempDir::new().unwrap();
    co(&dir)
        .args(["task", "show", "w-1.1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn work_create_with_explicit_path_then_show() {
    let dir = tempfile::TempDir::new().unwrap();
    let workspace = dir.path().join("ws");
    std::fs::create_dir_all(&workspace).unwrap();

    let output = co(&dir)
        .args(["work", "create", "--name", "Fix auth", "--branch", "feature/auth"])
        .arg("--path")
        .arg(&workspace)
        .args(["bead-1", "bead-2"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    // The created id is the last token of the confirmation line
    let stdout = String::from_utf8(output).unwrap();
    let id = stdout.split_whitespace().last().unwrap().to_string();
    assert!(id.ends_with("fix-auth"), "unexpected id: {id}");

    co(&dir)
        .args(["work", "show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("feature/auth").and(predicate::str::contains("bead-1")));

    co(&dir)
        .args(["work", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains(&id).and(predicate::str::contains("pending")));
}

#[test]
fn orchestrate_unknown_work_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    co(&dir)
        .args(["orchestrate", "--work", "w-none"])
        .assert()
        .failure();
}

#[test]
fn task_complete_without_id_or_env_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    co(&dir)
        .args(["task", "complete"])
        .env_remove("CO_TASK_ID")
        .assert()
        .failure()
        .stderr(predicate::str::contains("CO_TASK_ID"));
}
