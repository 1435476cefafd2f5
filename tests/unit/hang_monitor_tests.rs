//! Unit tests for hang detection and escalation.
//!
//! Thresholds are whole seconds and the monitor polls once per second, so
//! these tests take a few seconds each.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use handoff::models::hang::HangThresholds;
use handoff::orchestrator::hang_monitor::{ActivityClock, HangEvent, HangMonitor};

use super::support::{RecordingKiller, Sent};

const PID: u32 = 4242;

fn start(
    thresholds: HangThresholds,
) -> (
    handoff::orchestrator::hang_monitor::HangMonitorHandle,
    mpsc::UnboundedReceiver<HangEvent>,
    Arc<ActivityClock>,
    Arc<RecordingKiller>,
) {
    let clock = Arc::new(ActivityClock::new());
    let killer = Arc::new(RecordingKiller::default());
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = HangMonitor::new(
        "lint".into(),
        PID,
        thresholds,
        Arc::clone(&clock),
        Arc::<RecordingKiller>::clone(&killer),
        tx,
    )
    .spawn();
    (handle, rx, clock, killer)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<HangEvent>) -> HangEvent {
    tokio::time::timeout(Duration::from_secs(4), rx.recv())
        .await
        .expect("should receive event before timeout")
        .expect("channel should not be closed")
}

#[test]
fn activity_clock_resets_on_touch() {
    let clock = ActivityClock::new();
    std::thread::sleep(Duration::from_millis(30));
    assert!(clock.idle() >= Duration::from_millis(30));
    clock.touch();
    assert!(clock.idle() < Duration::from_millis(30));
}

#[tokio::test]
async fn warns_once_after_threshold() {
    let (handle, mut rx, _clock, killer) = start(HangThresholds::from_seconds(1, 0, 10));

    let event = next(&mut rx).await;
    assert!(
        matches!(event, HangEvent::Warned { idle } if idle >= Duration::from_secs(1)),
        "expected Warned, got {event:?}"
    );

    let again = tokio::time::timeout(Duration::from_millis(1500), rx.recv()).await;
    assert!(again.is_err(), "warning must fire only once");
    assert!(killer.sent().is_empty(), "a warning never signals the process");
    assert!(!handle.timed_out());
}

#[tokio::test]
async fn output_activity_prevents_warning() {
    let (handle, mut rx, clock, _killer) = start(HangThresholds::from_seconds(1, 0, 10));

    let toucher = tokio::spawn(async move {
        for _ in 0..12 {
            clock.touch();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    });

    let event = tokio::time::timeout(Duration::from_millis(2200), rx.recv()).await;
    assert!(event.is_err(), "active task must not be flagged: {event:?}");
    toucher.abort();
    drop(handle);
}

#[tokio::test]
async fn escalates_to_force_kill_after_grace() {
    let (handle, mut rx, _clock, killer) = start(HangThresholds::from_seconds(0, 1, 1));

    let event = next(&mut rx).await;
    assert!(matches!(event, HangEvent::TimedOut { .. }), "got {event:?}");
    assert!(handle.timed_out());
    assert_eq!(killer.sent(), [Sent::Terminate(PID)]);

    let event = next(&mut rx).await;
    assert_eq!(event, HangEvent::Killed);
    assert_eq!(killer.sent(), [Sent::Terminate(PID), Sent::Kill(PID)]);
}

#[tokio::test]
async fn stopping_within_grace_skips_force_kill() {
    let (handle, mut rx, _clock, killer) = start(HangThresholds::from_seconds(0, 1, 5));

    let event = next(&mut rx).await;
    assert!(matches!(event, HangEvent::TimedOut { .. }), "got {event:?}");

    assert!(handle.stop().await, "stop reports the hang kill");
    assert_eq!(killer.sent(), [Sent::Terminate(PID)]);
    assert!(
        rx.recv().await.is_none(),
        "no further events after the monitor stopped"
    );
}

#[tokio::test]
async fn warn_then_kill_in_order() {
    let (_handle, mut rx, _clock, _killer) = start(HangThresholds::from_seconds(1, 2, 10));

    assert!(matches!(next(&mut rx).await, HangEvent::Warned { .. }));
    assert!(matches!(next(&mut rx).await, HangEvent::TimedOut { .. }));
}

#[tokio::test]
async fn escalation_respects_thresholds_and_grace() {
    let started = Instant::now();
    let (_handle, mut rx, _clock, killer) = start(HangThresholds::from_seconds(1, 2, 1));

    assert!(matches!(next(&mut rx).await, HangEvent::Warned { .. }));
    let warned = started.elapsed();
    assert!(matches!(next(&mut rx).await, HangEvent::TimedOut { .. }));
    let timed_out = started.elapsed();
    assert_eq!(next(&mut rx).await, HangEvent::Killed);
    let killed = started.elapsed();

    assert!(warned >= Duration::from_secs(1), "warned at {warned:?}");
    assert!(timed_out >= Duration::from_secs(2), "soft terminate at {timed_out:?}");
    assert!(killed >= Duration::from_secs(3), "force kill at {killed:?}");
    assert!(
        killed - timed_out >= Duration::from_secs(1),
        "grace not honoured: {timed_out:?} -> {killed:?}"
    );
    assert_eq!(killer.sent(), [Sent::Terminate(PID), Sent::Kill(PID)]);
}
