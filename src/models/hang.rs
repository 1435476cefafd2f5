//! Hang detection thresholds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default grace period between the soft terminate and the force kill.
pub const DEFAULT_KILL_GRACE_SECONDS: u64 = 10;

/// Per-run inactivity thresholds applied to every script task.
///
/// A `None` threshold disables the corresponding check. The grace period
/// only matters once a hang kill has been issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HangThresholds {
    /// Idle time after which a one-shot warning fires.
    pub warn: Option<Duration>,
    /// Idle time after which the process receives a soft terminate.
    pub kill: Option<Duration>,
    /// Wait between the soft terminate and the process-tree force kill.
    pub kill_grace: Duration,
}

impl Default for HangThresholds {
    fn default() -> Self {
        Self {
            warn: None,
            kill: None,
            kill_grace: Duration::from_secs(DEFAULT_KILL_GRACE_SECONDS),
        }
    }
}

impl HangThresholds {
    /// Build thresholds from whole seconds; `0` disables a check.
    #[must_use]
    pub fn from_seconds(warn: u64, kill: u64, kill_grace: u64) -> Self {
        let enabled = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));
        Self {
            warn: enabled(warn),
            kill: enabled(kill),
            kill_grace: Duration::from_secs(kill_grace),
        }
    }

    /// Whether any inactivity check is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.warn.is_some() || self.kill.is_some()
    }
}
