use assert_cmd::Command;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[allow(deprecated)]
fn sessync_cmd(tmp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("sessync").unwrap();
    cmd.env("SESSYNC_DB", db_path(tmp));
    cmd.env("SESSYNC_CONFIG", tmp.path().join("no-config.toml"));
    cmd.env("RUST_LOG", "off");
    cmd
}

fn db_path(tmp: &TempDir) -> PathBuf {
    tmp.path().join("index.db")
}

fn project_dir(tmp: &TempDir) -> PathBuf {
    let wd = tmp.path().join("proj");
    std::fs::create_dir_all(&wd).unwrap();
    wd
}

fn write_state(wd: &Path, slug: &str, body: &str) -> PathBuf {
    let dir = wd.join("agents/sessions").join(slug);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("state.json"), body).unwrap();
    dir
}

fn stdout_json(out: &std::process::Output) -> Value {
    serde_json::from_slice(&out.stdout).unwrap()
}

const DEMO: &str = r#"{
  "topic": "Demo",
  "current_phase": "build",
  "status": "build",
  "phase_history": {"spec_started_at": "2026-01-01T00:00:00Z"},
  "build_progress": {"checkpoints_total": 4, "checkpoints_completed": [1, 2]}
}"#;

#[test]
fn sync_prints_outcome_and_show_reads_it_back() {
    let tmp = TempDir::new().unwrap();
    let wd = project_dir(&tmp);
    write_state(&wd, "demo-1", DEMO);

    let out = sessync_cmd(&tmp)
        .args(["sync", "demo-1", "--cwd"])
        .arg(&wd)
        .output()
        .unwrap();
    assert!(out.status.success());
    let v = stdout_json(&out);
    assert_eq!(v["session_slug"], "demo-1");
    assert_eq!(v["status"], "build");
    assert_eq!(v["created"], true);

    let out = sessync_cmd(&tmp).args(["show", "demo-1"]).output().unwrap();
    assert!(out.status.success());
    let rec = stdout_json(&out);
    assert_eq!(rec["title"], "Demo");
    assert_eq!(rec["checkpoints_total"], 4);
    assert_eq!(rec["checkpoints_completed"], 2);
    assert_eq!(rec["started_at"], "2026-01-01T00:00:00Z");
}

#[test]
fn resync_keeps_id() {
    let tmp = TempDir::new().unwrap();
    let wd = project_dir(&tmp);
    write_state(&wd, "demo-1", DEMO);

    let first = sessync_cmd(&tmp)
        .args(["sync", "demo-1", "--cwd"])
        .arg(&wd)
        .output()
        .unwrap();
    let second = sessync_cmd(&tmp)
        .args(["sync", "demo-1", "--cwd"])
        .arg(&wd)
        .output()
        .unwrap();

    let (a, b) = (stdout_json(&first), stdout_json(&second));
    assert_eq!(a["id"], b["id"]);
    assert_eq!(b["created"], false);
}

#[test]
fn sync_missing_session_reports_not_found() {
    let tmp = TempDir::new().unwrap();
    let wd = project_dir(&tmp);

    let out = sessync_cmd(&tmp)
        .args(["sync", "ghost", "--cwd"])
        .arg(&wd)
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    let v = stdout_json(&out);
    assert_eq!(v["code"], "not_found");
    assert_eq!(v["error"], "state document not found");
}

#[test]
fn sync_project_reports_per_session() {
    let tmp = TempDir::new().unwrap();
    let wd = project_dir(&tmp);
    write_state(&wd, "a", "{}");
    write_state(&wd, "b", "{ nope");
    write_state(&wd, "c", r#"{"current_phase":"plan"}"#);

    let out = sessync_cmd(&tmp)
        .args(["sync-project", "--register", "--cwd"])
        .arg(&wd)
        .output()
        .unwrap();
    assert!(out.status.success());
    let v = stdout_json(&out);
    assert_eq!(v["total"], 3);
    assert_eq!(v["synced"].as_array().unwrap().len(), 2);
    assert_eq!(v["failed"][0]["session_slug"], "b");
    assert_eq!(v["failed"][0]["code"], "malformed_state");

    let out = sessync_cmd(&tmp).args(["show", "a"]).output().unwrap();
    assert!(stdout_json(&out)["project_id"].is_i64());
}

#[test]
fn sync_project_background_drains_before_exit() {
    let tmp = TempDir::new().unwrap();
    let wd = project_dir(&tmp);
    for slug in ["s1", "s2", "s3", "s4"] {
        write_state(&wd, slug, "{}");
    }

    let out = sessync_cmd(&tmp)
        .args(["sync-project", "--background", "--cwd"])
        .arg(&wd)
        .output()
        .unwrap();
    assert!(out.status.success());
    let v = stdout_json(&out);
    assert_eq!(v["queued"], 4);
    assert_eq!(v["cancelled"], 0);

    for slug in ["s1", "s2", "s3", "s4"] {
        sessync_cmd(&tmp).args(["show", slug]).assert().success();
    }
}

#[test]
fn show_unknown_session_fails() {
    let tmp = TempDir::new().unwrap();
    sessync_cmd(&tmp)
        .args(["show", "nothing"])
        .assert()
        .failure();
}

#[test]
fn invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("bad.toml");
    std::fs::write(&config, "[pool]\nmax_concurrent = 0\n").unwrap();

    sessync_cmd(&tmp)
        .env("SESSYNC_CONFIG", &config)
        .args(["show", "x"])
        .assert()
        .failure();
}
