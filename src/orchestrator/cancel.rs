//! Cancel controller: the single source of truth for "cancelled" and
//! "restart requested" within one session attempt.
//!
//! Triggers are bound to terminal keys and the OS interrupt signal. The
//! first trigger wins; later triggers are no-ops. Once cancelled, an
//! attempt never becomes uncancelled.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::supervisor::ProcessSupervisor;
use crate::models::outcome::CancelMode;
use crate::ui::{CancelHandlers, UiPort};

/// Exit code reported for failed or cancelled runs.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Exit code cell; one per attempt, plus the run-level cell that only the
/// final attempt commits to.
#[derive(Debug, Clone, Default)]
pub struct ExitCodeCell(Arc<AtomicI32>);

impl ExitCodeCell {
    /// Cell starting at success.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the run as failed.
    pub fn fail(&self) {
        self.0.store(FAILURE_EXIT_CODE, Ordering::SeqCst);
    }

    /// Whether [`fail`](Self::fail) was called.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.code() != 0
    }

    /// Current exit code.
    #[must_use]
    pub fn code(&self) -> i32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cancellation flags of one attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelState {
    /// The attempt was cancelled (also set for restarts).
    pub cancelled: bool,
    /// The operator asked for a fresh attempt.
    pub restart_requested: bool,
    /// Tasks that were still queued when the cancel arrived.
    pub cancelled_task_ids: HashSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    state: CancelState,
    queued: Vec<String>,
}

/// Attempt-scoped cancellation state machine.
pub struct CancelController {
    inner: Mutex<Inner>,
    token: CancellationToken,
    ui: Arc<dyn UiPort>,
    supervisor: Arc<ProcessSupervisor>,
    exit_code: ExitCodeCell,
}

impl std::fmt::Debug for CancelController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelController")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CancelController {
    /// Controller driving `ui` and `supervisor` on trigger.
    #[must_use]
    pub fn new(
        ui: Arc<dyn UiPort>,
        supervisor: Arc<ProcessSupervisor>,
        exit_code: ExitCodeCell,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            token: CancellationToken::new(),
            ui,
            supervisor,
            exit_code,
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `id` as queued (not yet started).
    pub fn queue(&self, id: &str) {
        self.inner().queued.push(id.to_owned());
    }

    /// Record that `id` left the queue.
    pub fn mark_started(&self, id: &str) {
        self.inner().queued.retain(|queued| queued != id);
    }

    /// Cancel the run. Idempotent.
    pub fn trigger_cancel(&self) {
        self.trigger(CancelMode::Cancel);
    }

    /// Cancel the attempt and request a fresh one. Idempotent.
    pub fn trigger_restart(&self) {
        self.trigger(CancelMode::Restart);
    }

    fn trigger(&self, mode: CancelMode) {
        {
            let mut inner = self.inner();
            if inner.state.cancelled {
                debug!(mode = mode.as_str(), "already cancelled; trigger ignored");
                return;
            }
            inner.state.cancelled = true;
            inner.state.restart_requested = mode == CancelMode::Restart;
            let queued = std::mem::take(&mut inner.queued);
            inner.state.cancelled_task_ids.extend(queued);
        }

        info!(mode = mode.as_str(), "run cancellation triggered");
        self.ui.on_cancelled(mode);
        self.supervisor.cancel_all(true);
        if mode == CancelMode::Cancel {
            self.exit_code.fail();
        }
        self.token.cancel();
    }

    /// Whether the attempt was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner().state.cancelled
    }

    /// Whether a restart was requested.
    #[must_use]
    pub fn is_restart(&self) -> bool {
        self.inner().state.restart_requested
    }

    /// Gate predicate for the scheduler and archive stage.
    #[must_use]
    pub fn should_continue(&self) -> bool {
        !self.is_cancelled()
    }

    /// Whether `id` was still queued when the cancel arrived.
    #[must_use]
    pub fn was_task_cancelled(&self, id: &str) -> bool {
        self.inner().state.cancelled_task_ids.contains(id)
    }

    /// How the attempt ended early, if it did.
    #[must_use]
    pub fn mode(&self) -> Option<CancelMode> {
        let inner = self.inner();
        match (inner.state.cancelled, inner.state.restart_requested) {
            (false, _) => None,
            (true, false) => Some(CancelMode::Cancel),
            (true, true) => Some(CancelMode::Restart),
        }
    }

    /// Copy of the current flags.
    #[must_use]
    pub fn state(&self) -> CancelState {
        self.inner().state.clone()
    }

    /// Token cancelled on the first trigger.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait until a trigger fires.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Key handlers bound to this controller.
    ///
    /// The handlers hold a weak reference so an installed binding does not
    /// keep a finished attempt alive.
    #[must_use]
    pub fn handlers(self: &Arc<Self>) -> CancelHandlers {
        let cancel = Arc::downgrade(self);
        let restart = Weak::clone(&cancel);
        CancelHandlers {
            on_cancel: Arc::new(move || {
                if let Some(controller) = cancel.upgrade() {
                    controller.trigger_cancel();
                }
            }),
            on_restart: Some(Arc::new(move || {
                if let Some(controller) = restart.upgrade() {
                    controller.trigger_restart();
                }
            })),
        }
    }
}
