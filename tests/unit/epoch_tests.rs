//! Unit tests for the session epoch guard.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use chrono::Utc;

use handoff::models::task::{TaskEnd, TaskState, TaskStatus};
use handoff::orchestrator::epoch::{EpochGuard, EpochScopedUi};
use handoff::ui::line::LineUi;
use handoff::ui::UiPort;

#[test]
fn newest_epoch_is_current() {
    let guard = EpochGuard::new();
    let first = guard.mint();
    assert!(guard.is_current(&first));

    let second = guard.mint();
    assert!(guard.is_current(&second));
    assert!(!guard.is_current(&first));
    assert_ne!(first, second);
}

#[test]
fn guarded_runs_only_for_current_epoch() {
    let guard = EpochGuard::new();
    let stale = guard.mint();
    let current = guard.mint();

    assert_eq!(guard.guarded(&current, || 7), Some(7));
    assert_eq!(guard.guarded(&stale, || 7), None);
}

#[test]
fn mint_waits_for_callback_admitted_under_previous_epoch() {
    let guard = Arc::new(EpochGuard::new());
    let old = guard.mint();
    let finished = Arc::new(AtomicBool::new(false));
    let (entered_tx, entered_rx) = mpsc::channel();

    let worker = {
        let guard = Arc::clone(&guard);
        let finished = Arc::clone(&finished);
        thread::spawn(move || {
            guard.guarded(&old, || {
                entered_tx.send(()).expect("signal entry");
                thread::sleep(Duration::from_millis(200));
                finished.store(true, Ordering::SeqCst);
            })
        })
    };
    entered_rx.recv().expect("callback entered");

    let new = guard.mint();

    assert!(
        finished.load(Ordering::SeqCst),
        "stale callback still running after mint returned"
    );
    assert!(guard.is_current(&new));
    assert_eq!(worker.join().expect("worker"), Some(()));
}

#[test]
fn nested_guarded_calls_do_not_block() {
    let guard = EpochGuard::new();
    let epoch = guard.mint();

    let result = guard.guarded(&epoch, || guard.guarded(&epoch, || 5));

    assert_eq!(result, Some(Some(5)));
}

#[test]
fn epoch_displays_as_simple_uuid() {
    let epoch = EpochGuard::new().mint();
    let text = epoch.to_string();
    assert_eq!(text.len(), 32);
    assert!(text.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn late_completion_from_replaced_attempt_leaves_board_untouched() {
    let guard = Arc::new(EpochGuard::new());
    let display = Arc::new(LineUi::with_writer(Box::new(std::io::sink()), false));
    let board = display.board();

    let first = EpochScopedUi::new(guard.mint(), Arc::clone(&guard), display.clone());
    first.start();
    first.on_script_queued("lint");
    first.on_script_start("lint", Utc::now());

    let second = EpochScopedUi::new(guard.mint(), Arc::clone(&guard), display.clone());
    second.start();
    second.on_script_queued("lint");
    assert!(!first.is_live());
    assert!(second.is_live());

    let now = Utc::now();
    first.on_script_end(&TaskEnd {
        key: "lint".into(),
        output_path: PathBuf::from("lint.txt"),
        started_at: now,
        ended_at: now,
        exit_code: Some(1),
        status: TaskStatus::Error,
    });

    assert_eq!(board.get("lint"), Some(TaskState::Waiting));
}

#[test]
fn current_attempt_reaches_display() {
    let guard = Arc::new(EpochGuard::new());
    let display = Arc::new(LineUi::with_writer(Box::new(std::io::sink()), false));
    let board = display.board();
    let scoped = EpochScopedUi::new(guard.mint(), Arc::clone(&guard), display);

    scoped.start();
    scoped.on_script_queued("test");
    scoped.on_script_start("test", Utc::now());

    assert!(matches!(board.get("test"), Some(TaskState::Running { .. })));
}
