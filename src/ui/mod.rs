//! Progress display port.
//!
//! The engine drives a [`UiPort`] and never inspects what it renders.
//! The port outlives session attempts so the display persists across a
//! restart; stale attempts are filtered by
//! [`EpochScopedUi`](crate::orchestrator::epoch::EpochScopedUi).

pub mod board;
pub mod keys;
pub mod line;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::outcome::CancelMode;
use crate::models::task::{ArchiveKind, TaskEnd, TaskStatus};

/// Callback bound to a cancel or restart trigger.
pub type Trigger = Arc<dyn Fn() + Send + Sync>;

/// Triggers installed into the UI's key capture for one attempt.
#[derive(Clone)]
pub struct CancelHandlers {
    /// Abandon the run.
    pub on_cancel: Trigger,
    /// Abandon the attempt and start again; `None` disables the restart key.
    pub on_restart: Option<Trigger>,
}

impl CancelHandlers {
    /// Invoke the trigger for `mode`, falling back to cancel when restart
    /// is not wired.
    pub fn fire(&self, mode: CancelMode) {
        match (mode, &self.on_restart) {
            (CancelMode::Restart, Some(restart)) => restart(),
            _ => (self.on_cancel)(),
        }
    }
}

impl std::fmt::Debug for CancelHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandlers")
            .field("restart", &self.on_restart.is_some())
            .finish_non_exhaustive()
    }
}

/// Sink for task lifecycle notifications.
pub trait UiPort: Send + Sync {
    /// Begin an attempt; clears any state from a previous attempt.
    fn start(&self);

    /// A script was added to the run.
    fn on_script_queued(&self, key: &str);

    /// A script process was spawned.
    fn on_script_start(&self, key: &str, started_at: DateTime<Utc>);

    /// A script process ended.
    fn on_script_end(&self, end: &TaskEnd);

    /// An archive was added to the run.
    fn on_archive_queued(&self, kind: ArchiveKind);

    /// Archive creation began.
    fn on_archive_start(&self, kind: ArchiveKind);

    /// Archive creation ended; `path` is set when a file was written.
    fn on_archive_end(&self, kind: ArchiveKind, path: Option<&Path>, status: TaskStatus);

    /// A script has been silent past the warn threshold.
    fn on_hang_warn(&self, _key: &str, _idle: Duration) {}

    /// A script was sent a soft terminate after going silent.
    fn on_hang_timeout(&self, _key: &str) {}

    /// A hung script's process tree was force-killed.
    fn on_hang_killed(&self, _key: &str) {}

    /// The attempt was cancelled or a restart was requested.
    fn on_cancelled(&self, mode: CancelMode);

    /// Bind cancel/restart keys for the current attempt.
    fn install_cancellation(&self, handlers: CancelHandlers);

    /// Unbind keys installed by [`install_cancellation`](Self::install_cancellation).
    fn clear_cancellation(&self) {}

    /// Finish the display; no further attempts follow.
    fn stop(&self);
}

/// Board id used for an archive task.
#[must_use]
pub fn archive_task_id(kind: ArchiveKind) -> String {
    format!("archive:{}", kind.as_str())
}
