//! Per-task hang detection with soft-terminate/grace/force-kill escalation.
//!
//! Each running script gets a [`HangMonitor`] that polls the task's
//! [`ActivityClock`] once per second. Crossing the warn threshold emits a
//! single [`HangEvent::Warned`]; crossing the kill threshold sends a soft
//! terminate, emits [`HangEvent::TimedOut`], and arms the grace timer. If
//! the monitor is still alive when the grace period ends, the process tree
//! is force-killed and [`HangEvent::Killed`] follows.
//!
//! The runner drops the handle as soon as the process exits, which stops
//! the monitor before any pending escalation step.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::supervisor::ProcessKiller;
use crate::models::hang::HangThresholds;

/// Fixed interval between inactivity checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Escalation steps reported to the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HangEvent {
    /// Silent past the warn threshold (fires once).
    Warned {
        /// Idle time when the event was generated.
        idle: Duration,
    },
    /// Silent past the kill threshold; soft terminate sent.
    TimedOut {
        /// Idle time when the event was generated.
        idle: Duration,
    },
    /// Grace period elapsed; process tree force-killed.
    Killed,
}

/// Tracks the time of the last output produced by a task.
#[derive(Debug)]
pub struct ActivityClock {
    origin: Instant,
    last_ms: AtomicU64,
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityClock {
    /// Clock whose last activity is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Record activity now.
    pub fn touch(&self) {
        self.last_ms.store(self.elapsed_ms(), Ordering::SeqCst);
    }

    /// Time since the last recorded activity.
    #[must_use]
    pub fn idle(&self) -> Duration {
        let last = self.last_ms.load(Ordering::SeqCst);
        Duration::from_millis(self.elapsed_ms().saturating_sub(last))
    }
}

/// Builder for a per-task hang monitor.
///
/// Call [`spawn`](Self::spawn) to start the polling task.
pub struct HangMonitor {
    task_id: String,
    pid: u32,
    thresholds: HangThresholds,
    clock: Arc<ActivityClock>,
    killer: Arc<dyn ProcessKiller>,
    event_tx: mpsc::UnboundedSender<HangEvent>,
}

impl HangMonitor {
    /// Construct a monitor (does not start polling yet).
    #[must_use]
    pub fn new(
        task_id: String,
        pid: u32,
        thresholds: HangThresholds,
        clock: Arc<ActivityClock>,
        killer: Arc<dyn ProcessKiller>,
        event_tx: mpsc::UnboundedSender<HangEvent>,
    ) -> Self {
        Self {
            task_id,
            pid,
            thresholds,
            clock,
            killer,
            event_tx,
        }
    }

    /// Spawn the polling task and return a handle controlling it.
    #[must_use]
    pub fn spawn(self) -> HangMonitorHandle {
        let cancel = CancellationToken::new();
        let timed_out = Arc::new(AtomicBool::new(false));
        let span = info_span!("hang_monitor", task = %self.task_id, pid = self.pid);

        let join_handle = tokio::spawn(
            self.run(cancel.clone(), Arc::clone(&timed_out))
                .instrument(span),
        );

        HangMonitorHandle {
            timed_out,
            join_handle: Some(join_handle),
            cancel,
        }
    }

    async fn run(self, cancel: CancellationToken, timed_out: Arc<AtomicBool>) {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.tick().await;
        let mut warned = false;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("hang monitor cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let idle = self.clock.idle();

            if !warned && self.thresholds.warn.is_some_and(|limit| idle >= limit) {
                warned = true;
                info!(idle_secs = idle.as_secs(), "task silent past warn threshold");
                let _ = self.event_tx.send(HangEvent::Warned { idle });
            }

            if self.thresholds.kill.is_some_and(|limit| idle >= limit) {
                timed_out.store(true, Ordering::SeqCst);
                warn!(idle_secs = idle.as_secs(), "task hung; sending soft terminate");
                if let Err(err) = self.killer.terminate(self.pid) {
                    debug!(%err, "soft terminate not delivered");
                }
                let _ = self.event_tx.send(HangEvent::TimedOut { idle });
                self.escalate(&cancel).await;
                return;
            }
        }
    }

    async fn escalate(&self, cancel: &CancellationToken) {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("process exited within grace period");
            }
            () = tokio::time::sleep(self.thresholds.kill_grace) => {
                warn!(
                    grace_secs = self.thresholds.kill_grace.as_secs(),
                    "task ignored soft terminate; killing process tree"
                );
                match self.killer.kill_tree(self.pid) {
                    Ok(()) => {
                        let _ = self.event_tx.send(HangEvent::Killed);
                    }
                    Err(err) => debug!(%err, "force kill not delivered"),
                }
            }
        }
    }
}

/// Handle returned from [`HangMonitor::spawn`].
pub struct HangMonitorHandle {
    timed_out: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Drop for HangMonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl HangMonitorHandle {
    /// Whether the kill threshold was crossed.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// Stop the monitor and wait for it to exit.
    ///
    /// Returns whether the kill threshold was crossed.
    pub async fn stop(mut self) -> bool {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
        self.timed_out()
    }
}
