//! Unit tests for OS interrupt wiring.
//!
//! These deliver real signals to the test process and run serially.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::getpid;
use serial_test::serial;
use tokio::signal::unix::{signal, SignalKind};

use handoff::models::outcome::CancelMode;
use handoff::orchestrator::cancel::{CancelController, ExitCodeCell};
use handoff::orchestrator::signals::install_interrupt;
use handoff::orchestrator::supervisor::ProcessSupervisor;

use super::support::EventUi;

fn controller() -> Arc<CancelController> {
    Arc::new(CancelController::new(
        EventUi::new(),
        Arc::new(ProcessSupervisor::default()),
        ExitCodeCell::new(),
    ))
}

#[tokio::test]
#[serial]
async fn sigterm_triggers_cancel() {
    // Keep a handler registered so the default action never ends the test.
    let _listener = signal(SignalKind::terminate()).expect("register SIGTERM");
    let controller = controller();
    let _guard = install_interrupt(Arc::downgrade(&controller));
    tokio::time::sleep(Duration::from_millis(100)).await;

    kill(getpid(), Signal::SIGTERM).expect("signal self");

    tokio::time::timeout(Duration::from_secs(5), controller.cancelled())
        .await
        .expect("interrupt observed");
    assert_eq!(controller.mode(), Some(CancelMode::Cancel));
}

#[tokio::test]
#[serial]
async fn dropped_guard_stops_listening() {
    let _listener = signal(SignalKind::terminate()).expect("register SIGTERM");
    let controller = controller();
    drop(install_interrupt(Arc::downgrade(&controller)));
    tokio::time::sleep(Duration::from_millis(100)).await;

    kill(getpid(), Signal::SIGTERM).expect("signal self");
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!controller.is_cancelled());
}
