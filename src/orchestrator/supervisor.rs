//! Process supervisor: task id to OS process handle table.
//!
//! Owns best-effort bulk termination and a bounded wait for every tracked
//! process to exit. Each script is spawned as the leader of its own
//! process group, so signalling the group reaches the whole tree.
//! A fresh supervisor is created per session attempt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info};

use crate::{AppError, Result};

/// Signal delivery capability.
pub trait ProcessKiller: Send + Sync {
    /// Ask the process tree rooted at `pid` to shut down.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Signal` if the signal could not be delivered,
    /// typically because the process already exited.
    fn terminate(&self, pid: u32) -> Result<()>;

    /// Force-kill the process tree rooted at `pid`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Signal` if the signal could not be delivered.
    fn kill_tree(&self, pid: u32) -> Result<()>;
}

/// Process-group signalling via `killpg` (unix) or `taskkill` (windows).
#[derive(Debug, Default, Clone, Copy)]
pub struct GroupKiller;

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> Result<()> {
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| AppError::Signal(format!("pid {pid} out of range")))?;
    nix::sys::signal::killpg(Pid::from_raw(raw), signal)
        .map_err(|err| AppError::Signal(format!("{signal} to group {pid}: {err}")))
}

#[cfg(unix)]
impl ProcessKiller for GroupKiller {
    fn terminate(&self, pid: u32) -> Result<()> {
        signal_group(pid, nix::sys::signal::Signal::SIGTERM)
    }

    fn kill_tree(&self, pid: u32) -> Result<()> {
        signal_group(pid, nix::sys::signal::Signal::SIGKILL)
    }
}

#[cfg(windows)]
fn taskkill(pid: u32, force: bool) -> Result<()> {
    let mut cmd = std::process::Command::new("taskkill");
    cmd.arg("/T").arg("/PID").arg(pid.to_string());
    if force {
        cmd.arg("/F");
    }
    let status = cmd
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map_err(|err| AppError::Signal(format!("taskkill {pid}: {err}")))?;
    if status.success() {
        Ok(())
    } else {
        Err(AppError::Signal(format!("taskkill {pid} exited with {status}")))
    }
}

#[cfg(windows)]
impl ProcessKiller for GroupKiller {
    fn terminate(&self, pid: u32) -> Result<()> {
        taskkill(pid, false)
    }

    fn kill_tree(&self, pid: u32) -> Result<()> {
        taskkill(pid, true)
    }
}

/// A tracked process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    /// Logical task id.
    pub task_id: String,
    /// OS process id (process-group leader).
    pub pid: u32,
}

/// Attempt-scoped table of running script processes.
pub struct ProcessSupervisor {
    handles: Mutex<HashMap<String, u32>>,
    killer: Arc<dyn ProcessKiller>,
    exited: Notify,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("handles", &self.tracked())
            .finish_non_exhaustive()
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(Arc::new(GroupKiller))
    }
}

impl ProcessSupervisor {
    /// Construct a supervisor delivering signals through `killer`.
    #[must_use]
    pub fn new(killer: Arc<dyn ProcessKiller>) -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            killer,
            exited: Notify::new(),
        }
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signalling capability shared with runners for hang escalation.
    #[must_use]
    pub fn killer(&self) -> Arc<dyn ProcessKiller> {
        Arc::clone(&self.killer)
    }

    /// Register `pid` for `task_id`; the last registration wins.
    ///
    /// A missing or zero pid is ignored.
    pub fn track(&self, task_id: &str, pid: Option<u32>) {
        match pid {
            Some(pid) if pid > 0 => {
                self.handles().insert(task_id.to_owned(), pid);
                debug!(task_id, pid, "process tracked");
            }
            _ => debug!(task_id, "ignoring process without a valid pid"),
        }
    }

    /// Forget `task_id` after its process exited.
    pub fn untrack(&self, task_id: &str) {
        let removed = self.handles().remove(task_id);
        if removed.is_some() {
            self.exited.notify_waiters();
        }
    }

    /// Snapshot of tracked handles.
    #[must_use]
    pub fn tracked(&self) -> Vec<ProcessHandle> {
        let mut handles: Vec<ProcessHandle> = self
            .handles()
            .iter()
            .map(|(task_id, pid)| ProcessHandle {
                task_id: task_id.clone(),
                pid: *pid,
            })
            .collect();
        handles.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        handles
    }

    /// Whether no process is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles().is_empty()
    }

    /// Signal every tracked process. Delivery failures are swallowed.
    ///
    /// With `immediate` the tree is force-killed without a graceful phase.
    pub fn cancel_all(&self, immediate: bool) {
        let handles = self.tracked();
        if handles.is_empty() {
            return;
        }
        info!(count = handles.len(), immediate, "terminating tracked processes");
        for handle in handles {
            let result = if immediate {
                self.killer.kill_tree(handle.pid)
            } else {
                self.killer.terminate(handle.pid)
            };
            if let Err(err) = result {
                debug!(task_id = handle.task_id, pid = handle.pid, %err, "signal not delivered");
            }
        }
    }

    /// Wait until every tracked process has exited or `timeout` elapses.
    ///
    /// Returns `true` when the table drained in time. Never fails.
    pub async fn wait_all(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.exited.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_empty() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let remaining = self.tracked().len();
                debug!(remaining, "wait for process exit timed out");
                return self.is_empty();
            }
        }
    }
}
