//! Session epoch guard.
//!
//! Every session attempt mints a fresh [`SessionEpoch`], superseding the
//! previous one. Callbacks capture the epoch of the attempt that created
//! them and may only touch shared state while that epoch is still the
//! active one. A cancelled attempt's draining processes therefore cannot
//! corrupt the display of the attempt that replaced it.

use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::outcome::CancelMode;
use crate::models::task::{ArchiveKind, TaskEnd, TaskStatus};
use crate::ui::{CancelHandlers, UiPort};

/// Opaque token identifying one session attempt.
///
/// Only [`EpochGuard::mint`] can create one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionEpoch(Uuid);

impl std::fmt::Display for SessionEpoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Holder of the single active epoch.
///
/// Admission and the callback form one step: [`mint`](Self::mint) returns
/// only after every callback admitted under the previous epoch has
/// finished, so no stale callback runs once a new epoch is handed out.
#[derive(Debug, Default)]
pub struct EpochGuard {
    slot: Mutex<EpochSlot>,
    drained: Condvar,
}

#[derive(Debug, Default)]
struct EpochSlot {
    active: Option<SessionEpoch>,
    in_flight: usize,
}

/// Releases one admission when dropped, including on panic.
struct Admission<'a>(&'a EpochGuard);

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        let mut slot = self.0.slot();
        slot.in_flight = slot.in_flight.saturating_sub(1);
        if slot.in_flight == 0 {
            self.0.drained.notify_all();
        }
    }
}

impl EpochGuard {
    /// Guard with no active epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, EpochSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mint a new epoch and make it the active one.
    ///
    /// Waits for callbacks still running under the superseded epoch.
    /// Must not be called from inside a guarded callback.
    pub fn mint(&self) -> SessionEpoch {
        let epoch = SessionEpoch(Uuid::new_v4());
        let mut slot = self.slot();
        let previous = slot.active.replace(epoch.clone());
        if slot.in_flight > 0 {
            debug!(in_flight = slot.in_flight, "waiting for stale callbacks");
        }
        while slot.in_flight > 0 {
            slot = self
                .drained
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(slot);
        info!(
            epoch = %epoch,
            superseded = previous.map(|p| p.to_string()).unwrap_or_default(),
            "session epoch minted"
        );
        epoch
    }

    /// Whether `epoch` is the active one.
    #[must_use]
    pub fn is_current(&self, epoch: &SessionEpoch) -> bool {
        self.slot().active.as_ref() == Some(epoch)
    }

    /// Run `f` only if `epoch` is still active.
    ///
    /// The lock is not held while `f` runs, so `f` may itself go through
    /// the guard.
    pub fn guarded<R>(&self, epoch: &SessionEpoch, f: impl FnOnce() -> R) -> Option<R> {
        {
            let mut slot = self.slot();
            if slot.active.as_ref() != Some(epoch) {
                debug!(epoch = %epoch, "dropping callback from stale epoch");
                return None;
            }
            slot.in_flight += 1;
        }
        let _admission = Admission(self);
        Some(f())
    }
}

/// [`UiPort`] wrapper that drops every call from a superseded epoch.
pub struct EpochScopedUi {
    epoch: SessionEpoch,
    guard: Arc<EpochGuard>,
    inner: Arc<dyn UiPort>,
}

impl EpochScopedUi {
    /// Scope `inner` to `epoch`.
    #[must_use]
    pub fn new(epoch: SessionEpoch, guard: Arc<EpochGuard>, inner: Arc<dyn UiPort>) -> Self {
        Self {
            epoch,
            guard,
            inner,
        }
    }

    /// Epoch this wrapper admits.
    #[must_use]
    pub fn epoch(&self) -> &SessionEpoch {
        &self.epoch
    }

    /// Whether calls currently reach the inner port.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.guard.is_current(&self.epoch)
    }

    fn admit(&self, f: impl FnOnce(&dyn UiPort)) {
        self.guard.guarded(&self.epoch, || f(self.inner.as_ref()));
    }
}

impl UiPort for EpochScopedUi {
    fn start(&self) {
        self.admit(|ui| ui.start());
    }

    fn on_script_queued(&self, key: &str) {
        self.admit(|ui| ui.on_script_queued(key));
    }

    fn on_script_start(&self, key: &str, started_at: DateTime<Utc>) {
        self.admit(|ui| ui.on_script_start(key, started_at));
    }

    fn on_script_end(&self, end: &TaskEnd) {
        self.admit(|ui| ui.on_script_end(end));
    }

    fn on_archive_queued(&self, kind: ArchiveKind) {
        self.admit(|ui| ui.on_archive_queued(kind));
    }

    fn on_archive_start(&self, kind: ArchiveKind) {
        self.admit(|ui| ui.on_archive_start(kind));
    }

    fn on_archive_end(&self, kind: ArchiveKind, path: Option<&Path>, status: TaskStatus) {
        self.admit(|ui| ui.on_archive_end(kind, path, status));
    }

    fn on_hang_warn(&self, key: &str, idle: Duration) {
        self.admit(|ui| ui.on_hang_warn(key, idle));
    }

    fn on_hang_timeout(&self, key: &str) {
        self.admit(|ui| ui.on_hang_timeout(key));
    }

    fn on_hang_killed(&self, key: &str) {
        self.admit(|ui| ui.on_hang_killed(key));
    }

    fn on_cancelled(&self, mode: CancelMode) {
        self.admit(|ui| ui.on_cancelled(mode));
    }

    fn install_cancellation(&self, handlers: CancelHandlers) {
        self.admit(|ui| ui.install_cancellation(handlers));
    }

    fn clear_cancellation(&self) {
        self.admit(|ui| ui.clear_cancellation());
    }

    fn stop(&self) {
        self.admit(|ui| ui.stop());
    }
}
