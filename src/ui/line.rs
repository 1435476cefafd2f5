//! Line-oriented terminal sink.
//!
//! Prints one line per lifecycle edge to stderr and mirrors every state
//! into a [`TaskBoard`] the CLI reads back for the run summary.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::warn;

use super::board::TaskBoard;
use super::keys::{spawn_key_reader, HandlerSlot};
use super::{archive_task_id, CancelHandlers, UiPort};
use crate::models::outcome::CancelMode;
use crate::models::task::{ArchiveKind, TaskEnd, TaskState, TaskStatus};

/// Terminal sink writing one status line per event.
pub struct LineUi {
    board: Arc<TaskBoard>,
    out: Mutex<Box<dyn Write + Send>>,
    live: bool,
    handlers: HandlerSlot,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl LineUi {
    /// Sink writing to stderr; `live` enables stdin key capture.
    #[must_use]
    pub fn stderr(live: bool) -> Self {
        Self::with_writer(Box::new(std::io::stderr()), live)
    }

    /// Sink writing to an arbitrary writer.
    #[must_use]
    pub fn with_writer(out: Box<dyn Write + Send>, live: bool) -> Self {
        Self {
            board: Arc::new(TaskBoard::new()),
            out: Mutex::new(out),
            live,
            handlers: HandlerSlot::default(),
            reader: Mutex::new(None),
        }
    }

    /// Shared state table.
    #[must_use]
    pub fn board(&self) -> Arc<TaskBoard> {
        Arc::clone(&self.board)
    }

    fn line(&self, label: &str, name: &str, detail: &str) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = writeln!(out, "[{label:>9}] {name}{detail}") {
            warn!(%err, "failed to write status line");
        }
    }

    fn started_at(&self, id: &str) -> Option<DateTime<Utc>> {
        match self.board.get(id) {
            Some(TaskState::Running { started_at }) => Some(started_at),
            _ => None,
        }
    }
}

fn seconds(duration_ms: u64) -> String {
    // Display precision only.
    #[allow(clippy::cast_precision_loss)]
    let secs = duration_ms as f64 / 1000.0;
    format!("{secs:.1}s")
}

impl UiPort for LineUi {
    fn start(&self) {
        self.board.clear();
    }

    fn on_script_queued(&self, key: &str) {
        self.board.queue(key);
    }

    fn on_script_start(&self, key: &str, started_at: DateTime<Utc>) {
        if self.board.transition(key, TaskState::Running { started_at }) {
            self.line("running", key, "");
        }
    }

    fn on_script_end(&self, end: &TaskEnd) {
        if self.board.transition(&end.key, end.state()) {
            let detail = format!(
                " ({}) -> {}",
                seconds(end.duration_ms()),
                end.output_path.display()
            );
            self.line(end.status.as_str(), &end.key, &detail);
        }
    }

    fn on_archive_queued(&self, kind: ArchiveKind) {
        self.board.queue(&archive_task_id(kind));
    }

    fn on_archive_start(&self, kind: ArchiveKind) {
        let id = archive_task_id(kind);
        if self.board.transition(
            &id,
            TaskState::Running {
                started_at: Utc::now(),
            },
        ) {
            self.line("archiving", kind.as_str(), "");
        }
    }

    fn on_archive_end(&self, kind: ArchiveKind, path: Option<&Path>, status: TaskStatus) {
        let id = archive_task_id(kind);
        let duration_ms = self
            .started_at(&id)
            .and_then(|started| u64::try_from((Utc::now() - started).num_milliseconds()).ok())
            .unwrap_or(0);
        let output = path.map(Path::to_path_buf).unwrap_or_else(PathBuf::new);
        if self
            .board
            .transition(&id, status.into_state(duration_ms, output))
        {
            let detail = path.map_or_else(String::new, |p| format!(" -> {}", p.display()));
            self.line(status.as_str(), kind.as_str(), &detail);
        }
    }

    fn on_hang_warn(&self, key: &str, idle: Duration) {
        self.line("silent", key, &format!(" (no output for {}s)", idle.as_secs()));
    }

    fn on_hang_timeout(&self, key: &str) {
        self.line("stopping", key, " (hang timeout)");
    }

    fn on_hang_killed(&self, key: &str) {
        self.line("killed", key, " (did not exit after grace period)");
    }

    fn on_cancelled(&self, mode: CancelMode) {
        for id in self.board.cancel_waiting() {
            self.line("cancelled", &id, "");
        }
        let label = match mode {
            CancelMode::Cancel => "cancelled",
            CancelMode::Restart => "restart",
        };
        self.line(label, "run", "");
    }

    fn install_cancellation(&self, handlers: CancelHandlers) {
        *self.handlers.lock().unwrap_or_else(PoisonError::into_inner) = Some(handlers);
        if !self.live {
            return;
        }
        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        if reader.is_none() {
            *reader = Some(spawn_key_reader(Arc::clone(&self.handlers)));
        }
    }

    fn clear_cancellation(&self) {
        *self.handlers.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn stop(&self) {
        self.clear_cancellation();
        if let Some(reader) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = out.flush() {
            warn!(%err, "failed to flush status output");
        }
    }
}
