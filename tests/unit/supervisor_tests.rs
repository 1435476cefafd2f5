//! Unit tests for the process supervisor.

use std::sync::Arc;
use std::time::Duration;

use handoff::orchestrator::supervisor::{ProcessHandle, ProcessSupervisor};

use super::support::{RecordingKiller, Sent};

fn supervisor() -> (Arc<ProcessSupervisor>, Arc<RecordingKiller>) {
    let killer = Arc::new(RecordingKiller::default());
    let supervisor = Arc::new(ProcessSupervisor::new(Arc::<RecordingKiller>::clone(&killer)));
    (supervisor, killer)
}

#[test]
fn track_ignores_missing_or_zero_pid() {
    let (supervisor, _) = supervisor();
    supervisor.track("a", None);
    supervisor.track("b", Some(0));
    assert!(supervisor.is_empty());
}

#[test]
fn last_registration_wins() {
    let (supervisor, _) = supervisor();
    supervisor.track("a", Some(10));
    supervisor.track("a", Some(11));
    assert_eq!(
        supervisor.tracked(),
        [ProcessHandle {
            task_id: "a".into(),
            pid: 11,
        }]
    );
}

#[test]
fn cancel_all_immediate_kills_every_tree() {
    let (supervisor, killer) = supervisor();
    supervisor.track("a", Some(10));
    supervisor.track("b", Some(20));
    supervisor.cancel_all(true);
    assert_eq!(killer.sent(), [Sent::Kill(10), Sent::Kill(20)]);
}

#[test]
fn cancel_all_graceful_terminates() {
    let (supervisor, killer) = supervisor();
    supervisor.track("a", Some(10));
    supervisor.cancel_all(false);
    assert_eq!(killer.sent(), [Sent::Terminate(10)]);
}

#[test]
fn cancel_all_swallows_delivery_failures() {
    let killer = Arc::new(RecordingKiller::failing());
    let supervisor = ProcessSupervisor::new(Arc::<RecordingKiller>::clone(&killer));
    supervisor.track("a", Some(10));
    supervisor.track("b", Some(20));
    supervisor.cancel_all(true);
    assert_eq!(killer.sent().len(), 2, "every handle is attempted");
}

#[test]
fn cancel_all_with_nothing_tracked_is_noop() {
    let (supervisor, killer) = supervisor();
    supervisor.cancel_all(true);
    assert!(killer.sent().is_empty());
}

#[tokio::test]
async fn wait_all_returns_immediately_when_empty() {
    let (supervisor, _) = supervisor();
    assert!(supervisor.wait_all(Duration::from_millis(10)).await);
}

#[tokio::test]
async fn wait_all_times_out_with_live_handles() {
    let (supervisor, _) = supervisor();
    supervisor.track("a", Some(10));
    assert!(!supervisor.wait_all(Duration::from_millis(100)).await);
}

#[tokio::test]
async fn wait_all_wakes_when_last_handle_exits() {
    let (supervisor, _) = supervisor();
    supervisor.track("a", Some(10));
    supervisor.track("b", Some(20));

    let remote = Arc::clone(&supervisor);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        remote.untrack("a");
        tokio::time::sleep(Duration::from_millis(50)).await;
        remote.untrack("b");
    });

    assert!(supervisor.wait_all(Duration::from_secs(5)).await);
}

#[cfg(unix)]
#[tokio::test]
async fn group_killer_ends_real_process_group() {
    use handoff::orchestrator::supervisor::{GroupKiller, ProcessKiller};

    let mut child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg("sleep 30 & sleep 30")
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .expect("spawn sh");
    let pid = child.id().expect("pid");

    GroupKiller.kill_tree(pid).expect("signal delivered");
    let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
        .await
        .expect("process exits after kill")
        .expect("wait");
    assert!(!status.success());
    assert_eq!(status.code(), None, "killed by a signal");
}
