//! Task model and forward-only lifecycle.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A configured script: a shell command run in the repository root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptTask {
    /// Unique key within a run; also names the output file.
    pub key: String,
    /// Shell command string.
    pub command: String,
    /// Patterns that turn a clean exit into a warning when matched.
    #[serde(default)]
    pub warn_patterns: Vec<String>,
}

impl ScriptTask {
    /// Construct a script task without warn patterns.
    #[must_use]
    pub fn new(key: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            command: command.into(),
            warn_patterns: Vec::new(),
        }
    }

    /// Attach warn patterns.
    #[must_use]
    pub fn with_warn_patterns(mut self, patterns: Vec<String>) -> Self {
        self.warn_patterns = patterns;
        self
    }
}

/// The two archives produced per run when archiving is enabled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKind {
    /// Bundle of every selected file.
    Full,
    /// Working-tree changes against `HEAD`.
    Diff,
}

impl ArchiveKind {
    /// Both kinds in the order they are produced.
    pub const ALL: [Self; 2] = [Self::Full, Self::Diff];

    /// Lowercase name, also used as the task id on the board.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Diff => "diff",
        }
    }

    /// File name of the produced archive.
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Full => "full.txt",
            Self::Diff => "diff.txt",
        }
    }
}

/// Classified end of one runner invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Exit code 0 with no warn pattern match.
    Done,
    /// Exit code 0 and a warn pattern matched the output.
    Warn,
    /// Non-zero exit code, or the command could not run.
    Error,
    /// Terminated after the hang-kill threshold elapsed.
    TimedOut,
    /// Terminated by a signal that was not a hang kill.
    Killed,
}

impl TaskStatus {
    /// Short label for one-line status output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::TimedOut => "timeout",
            Self::Killed => "killed",
        }
    }

    /// Convert into the matching terminal [`TaskState`].
    #[must_use]
    pub fn into_state(self, duration_ms: u64, output_path: PathBuf) -> TaskState {
        match self {
            Self::Done => TaskState::Done {
                duration_ms,
                output_path,
            },
            Self::Warn => TaskState::Warn {
                duration_ms,
                output_path,
            },
            Self::Error => TaskState::Error {
                duration_ms,
                output_path,
            },
            Self::TimedOut => TaskState::TimedOut {
                duration_ms,
                output_path,
            },
            Self::Killed => TaskState::Killed {
                duration_ms,
                output_path,
            },
        }
    }
}

/// Everything reported when a script process ends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskEnd {
    /// Script key.
    pub key: String,
    /// Captured output file.
    pub output_path: PathBuf,
    /// Spawn time.
    pub started_at: DateTime<Utc>,
    /// Exit observation time.
    pub ended_at: DateTime<Utc>,
    /// Exit code, absent when the process died from a signal.
    pub exit_code: Option<i32>,
    /// Classified outcome.
    pub status: TaskStatus,
}

impl TaskEnd {
    /// Wall-clock duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        u64::try_from((self.ended_at - self.started_at).num_milliseconds()).unwrap_or(0)
    }

    /// Terminal board state for this end.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.status
            .into_state(self.duration_ms(), self.output_path.clone())
    }
}

/// Per-task lifecycle state shown on the board.
///
/// States only move forward: `Waiting`, then `Running`, then exactly one
/// terminal state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    /// Queued, not yet spawned.
    Waiting,
    /// Process spawned.
    Running {
        /// Spawn time.
        started_at: DateTime<Utc>,
    },
    /// Finished cleanly.
    Done {
        /// Wall-clock duration.
        duration_ms: u64,
        /// Captured output file.
        output_path: PathBuf,
    },
    /// Finished cleanly but output matched a warn pattern.
    Warn {
        /// Wall-clock duration.
        duration_ms: u64,
        /// Captured output file.
        output_path: PathBuf,
    },
    /// Finished with a failure.
    Error {
        /// Wall-clock duration.
        duration_ms: u64,
        /// Captured output file.
        output_path: PathBuf,
    },
    /// Killed after going silent past the hang-kill threshold.
    TimedOut {
        /// Wall-clock duration.
        duration_ms: u64,
        /// Captured output file.
        output_path: PathBuf,
    },
    /// Never started because the run was cancelled.
    Cancelled,
    /// Terminated by a cancel while running.
    Killed {
        /// Wall-clock duration.
        duration_ms: u64,
        /// Captured output file.
        output_path: PathBuf,
    },
}

impl TaskState {
    fn rank(&self) -> u8 {
        match self {
            Self::Waiting => 0,
            Self::Running { .. } => 1,
            _ => 2,
        }
    }

    /// Whether no further transition may be applied.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    /// Determine whether moving to `next` keeps the lifecycle monotonic.
    #[must_use]
    pub fn can_transition_to(&self, next: &Self) -> bool {
        self.rank() < next.rank()
    }

    /// Short label for one-line status output.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running { .. } => "running",
            Self::Done { .. } => "done",
            Self::Warn { .. } => "warn",
            Self::Error { .. } => "error",
            Self::TimedOut { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::Killed { .. } => "killed",
        }
    }
}
