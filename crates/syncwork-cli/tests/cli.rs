//! Drives the `syncwork` binary against a throwaway database.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const WORKSPACE: &str = "6f1c1f5e-2a43-4a43-9a53-0d0e2b7f4a11";

fn fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/config/service.yaml")
}

/// Storage root used alongside `db`.
fn storage(db: &Path) -> PathBuf {
    db.with_file_name("storage")
}

fn command(db: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_syncwork"));
    cmd.arg("--config")
        .arg(fixture())
        .args(["--log-level", "warn"])
        .args(args)
        .env("SYNCWORK_TEST_DB", db)
        .env("SYNCWORK_TEST_STORAGE", storage(db))
        .env_remove("RUST_LOG");
    cmd
}

fn syncwork(db: &Path, args: &[&str]) -> Output {
    command(db, args).output().unwrap()
}

fn stdout(output: &Output) -> String {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout.clone()).unwrap()
}

fn dispatch(db: &Path, id: &str, input: &str) -> Output {
    syncwork(
        db,
        &[
            "dispatch",
            "--id",
            id,
            "--type",
            "check",
            "--input",
            input,
            "--log-path",
            "/logs/1/0",
            "--mutex-key",
            "source-1",
            "--label",
            "job_id=1",
            "--workspace-id",
            WORKSPACE,
        ],
    )
}

#[test]
fn dispatch_claim_and_complete() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("workloads.db");

    let out = stdout(&dispatch(&db, "check-1", r#"{"config":{}}"#));
    assert_eq!(out.trim(), "check-1");

    let pending = stdout(&syncwork(&db, &["list-pending", "--group", "eu-west"]));
    assert!(pending.contains("check-1"));
    assert!(pending.contains("1 of 1 pending shown"));

    let claimed = stdout(&syncwork(&db, &["claim", "check-1", "--dataplane-id", "dp-1"]));
    assert_eq!(claimed.trim(), "check-1 now claimed");

    stdout(&syncwork(&db, &["status", "check-1", "running"]));
    stdout(&syncwork(&db, &["heartbeat", "check-1"]));
    let done = stdout(&syncwork(&db, &["status", "check-1", "success"]));
    assert_eq!(done.trim(), "check-1 now success");

    let json: serde_json::Value =
        serde_json::from_str(&stdout(&syncwork(&db, &["get", "check-1"]))).unwrap();
    assert_eq!(json["status"], "success");
    assert_eq!(json["dataplane_group"], "eu-west");
    assert_eq!(json["dataplane_id"], "dp-1");
}

#[test]
fn mutex_conflict_exits_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("workloads.db");

    stdout(&dispatch(&db, "check-1", "{}"));
    let second = dispatch(&db, "check-2", "{}");
    assert!(!second.status.success());
    assert!(String::from_utf8_lossy(&second.stderr).contains("source-1"));
}

#[test]
fn worker_init_failure_fails_workload() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("workloads.db");

    stdout(&dispatch(
        &db,
        "check-1",
        r#"{"password":"${SYNCWORK_TEST_UNSET_SECRET}"}"#,
    ));
    let init = syncwork(&db, &["worker-init", "check-1"]);
    assert!(!init.status.success());

    let json: serde_json::Value =
        serde_json::from_str(&stdout(&syncwork(&db, &["get", "check-1"]))).unwrap();
    assert_eq!(json["status"], "failure");
    assert_eq!(json["termination_source"], "workload-init");
}

#[test]
fn backoff_prints_configured_schedule() {
    let dir = tempfile::tempdir().unwrap();
    let out = stdout(&syncwork(
        &dir.path().join("unused.db"),
        &["backoff", "--attempts", "3"],
    ));
    let lines: Vec<_> = out.lines().collect();
    assert_eq!(
        lines,
        vec!["attempt   0: 0s", "attempt   1: 10s", "attempt   2: 20s"]
    );
}

#[test]
fn pod_name_for_connector_image() {
    let dir = tempfile::tempdir().unwrap();
    let out = stdout(&syncwork(
        &dir.path().join("unused.db"),
        &[
            "pod-name",
            "--job-id",
            "7",
            "--attempt-id",
            "2",
            "--image",
            "airbyte/source-postgres:1.2.3",
            "--operation",
            "discover",
        ],
    ));
    assert_eq!(out.trim(), "source-postgres-discover-job-7-attempt-2");
}

#[test]
fn terminal_status_delivers_signal_before_exit() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("workloads.db");

    stdout(&syncwork(
        &db,
        &[
            "dispatch",
            "--id",
            "sync-1",
            "--type",
            "sync",
            "--input",
            "{}",
            "--log-path",
            "/logs/1/0",
            "--signal-input",
            r#"{"workflowType":"sync","workflowId":"wf-1"}"#,
        ],
    ));
    stdout(&syncwork(&db, &["claim", "sync-1", "--dataplane-id", "dp-1"]));

    let done = command(&db, &["status", "sync-1", "success"])
        .env("RUST_LOG", "info")
        .output()
        .unwrap();
    assert_eq!(stdout(&done).trim(), "sync-1 now success");
    let logs = String::from_utf8_lossy(&done.stderr);
    assert!(logs.contains("Workflow signalled"), "logs: {logs}");
    assert!(logs.contains("wf-1"));
}

#[test]
fn output_reads_connector_document_from_storage() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("workloads.db");

    stdout(&dispatch(&db, "check-1", "{}"));
    let missing = syncwork(&db, &["output", "check-1"]);
    assert!(!missing.status.success());
    assert!(String::from_utf8_lossy(&missing.stderr).contains("no output recorded"));

    let doc = storage(&db).join("workload-output/check-1");
    std::fs::create_dir_all(doc.parent().unwrap()).unwrap();
    std::fs::write(&doc, r#"{"operation":"check","check_succeeded":true}"#).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&stdout(&syncwork(&db, &["output", "check-1"]))).unwrap();
    assert_eq!(json["operation"], "check");
    assert_eq!(json["check_succeeded"], true);
}

#[test]
fn pod_completion_follows_marker_in_namespace() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("unused.db");
    let args = [
        "pod-name",
        "--job-id",
        "7",
        "--attempt-id",
        "0",
        "--check-completed",
    ];

    let before = stdout(&syncwork(&db, &args));
    assert_eq!(before.trim(), "replication-job-7-attempt-0 pending");

    let marker = storage(&db).join("jobs/replication-job-7-attempt-0/SUCCEEDED");
    std::fs::create_dir_all(marker.parent().unwrap()).unwrap();
    std::fs::write(&marker, b"").unwrap();

    let after = stdout(&syncwork(&db, &args));
    assert_eq!(after.trim(), "replication-job-7-attempt-0 completed");
}
