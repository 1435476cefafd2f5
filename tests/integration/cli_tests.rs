//! End-to-end tests for the `handoff` binary.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

fn handoff(root: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_handoff"))
        .args(args)
        .arg("--cwd")
        .arg(root)
        .env("RUST_LOG", "warn")
        .output()
        .expect("run handoff binary")
}

fn write_config(root: &Path, body: &str) {
    std::fs::write(root.join("handoff.toml"), body).expect("write config");
}

const CONFIG: &str = r#"
mode = "sequential"

[[scripts]]
key = "ok"
command = "echo fine"

[[scripts]]
key = "broken"
command = "echo nope; exit 3"

[archive]
enabled = false
"#;

#[test]
fn scripts_lists_configured_keys() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_config(dir.path(), CONFIG);

    let output = handoff(dir.path(), &["scripts"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout, "ok\techo fine\nbroken\techo nope; exit 3\n");
}

#[test]
fn failing_script_gives_failure_exit_and_summary() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_config(dir.path(), CONFIG);

    let output = handoff(dir.path(), &["run"]);

    assert_eq!(output.status.code(), Some(1));
    let summary = std::fs::read_to_string(dir.path().join(".handoff/out/run.json"))
        .expect("run.json written");
    let summary: serde_json::Value = serde_json::from_str(&summary).expect("json");
    assert_eq!(summary["exit_code"], 1);
    assert_eq!(summary["outcome"]["cancelled"], false);
    let tasks = summary["tasks"].as_array().expect("tasks");
    assert_eq!(tasks[0]["id"], "ok");
    assert_eq!(tasks[0]["state"]["state"], "done");
    assert_eq!(tasks[1]["id"], "broken");
    assert_eq!(tasks[1]["state"]["state"], "error");
}

#[test]
fn only_filter_limits_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_config(dir.path(), CONFIG);

    let output = handoff(dir.path(), &["run", "--only", "ok"]);

    assert!(output.status.success(), "{output:?}");
    assert!(dir.path().join(".handoff/out/ok.txt").exists());
    assert!(!dir.path().join(".handoff/out/broken.txt").exists());
}

#[test]
fn missing_config_fails() {
    let dir = tempfile::tempdir().expect("tempdir");

    let output = handoff(dir.path(), &["run"]);

    assert!(!output.status.success());
}

#[test]
fn archives_are_listed_on_stdout() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_config(
        dir.path(),
        "[[scripts]]\nkey = \"ok\"\ncommand = \"true\"\n",
    );
    std::fs::write(dir.path().join("notes.md"), "hello").expect("write");

    let output = handoff(dir.path(), &["run"]);

    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("full.txt"), "{stdout}");
    assert!(stdout.contains("diff.txt"), "{stdout}");
    let full = std::fs::read_to_string(dir.path().join(".handoff/out/full.txt")).expect("full");
    assert!(full.contains("===== notes.md ====="));
    assert!(full.contains("===== handoff.toml ====="));
}

#[test]
fn live_run_exits_while_stdin_stays_open() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_config(
        dir.path(),
        r#"
[[scripts]]
key = "hi"
command = "echo hi"

[archive]
enabled = false
"#,
    );

    let mut child = Command::new(env!("CARGO_BIN_EXE_handoff"))
        .args(["run", "--live", "--cwd"])
        .arg(dir.path())
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn handoff binary");
    // Held open for the whole run; no line and no EOF ever arrive.
    let _stdin = child.stdin.take().expect("stdin pipe");

    let deadline = Instant::now() + Duration::from_secs(5);
    let status = loop {
        if let Some(status) = child.try_wait().expect("poll child") {
            break status;
        }
        if Instant::now() >= deadline {
            child.kill().expect("kill handoff");
            panic!("handoff --live did not exit while stdin was open");
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    assert!(status.success());
    assert!(dir.path().join(".handoff/out/hi.txt").exists());
}
