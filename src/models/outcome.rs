//! Run-level inputs and outcomes.

use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use super::hang::HangThresholds;

/// How the scheduler dispatches script tasks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// All tasks start together and are joined.
    #[default]
    Concurrent,
    /// Tasks run one at a time in configured order.
    Sequential,
}

/// Which user action ended an attempt early.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelMode {
    /// Abandon the run.
    Cancel,
    /// Abandon the attempt and start a fresh one.
    Restart,
}

impl CancelMode {
    /// Lowercase label used in logs and the terminal sink.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cancel => "cancel",
            Self::Restart => "restart",
        }
    }
}

/// Behaviour flags resolved from configuration and CLI overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Behavior {
    /// Run the archive stage after scripts finish.
    pub archive: bool,
    /// Capture cancel/restart keys from the terminal.
    pub live: bool,
    /// Inactivity thresholds for every script.
    pub hang: HangThresholds,
    /// Optional file receiving a one-letter marker per finished task.
    pub order_file: Option<PathBuf>,
}

/// Result of one session attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunOutcome {
    /// Archives produced by the attempt.
    pub created_artifacts: Vec<PathBuf>,
    /// Whether the attempt was cancelled (also true for restarts).
    pub cancelled: bool,
    /// Whether the operator asked for a fresh attempt.
    pub restart_requested: bool,
}

impl RunOutcome {
    /// Outcome for an attempt abandoned by `mode`.
    #[must_use]
    pub fn aborted(mode: CancelMode) -> Self {
        Self {
            created_artifacts: Vec::new(),
            cancelled: true,
            restart_requested: mode == CancelMode::Restart,
        }
    }
}
