//! Single-task runner.
//!
//! Spawns one script as a shell command, streams combined stdout/stderr
//! into `<output-dir>/<key>.txt`, supervises inactivity through a
//! [`HangMonitor`], and classifies the exit. The output file is created
//! before the process is spawned, so a started task always has a result
//! file to read.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::hang_monitor::{ActivityClock, HangEvent, HangMonitor};
use super::supervisor::ProcessSupervisor;
use crate::models::hang::HangThresholds;
use crate::models::pattern::WarnMatcher;
use crate::models::task::{ScriptTask, TaskEnd, TaskStatus};
use crate::{AppError, Result};

/// Upper bound on waiting for output pipes to close after the process exits.
///
/// Background grandchildren may keep a pipe open; the capture is abandoned
/// after this long.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle hooks fired by the runner.
///
/// All methods default to no-ops so observers implement only what they
/// need.
pub trait TaskObserver: Send + Sync {
    /// The process was spawned.
    fn on_start(&self, _key: &str, _started_at: DateTime<Utc>) {}

    /// The process exited and was classified.
    fn on_end(&self, _end: &TaskEnd) {}

    /// Silent past the warn threshold.
    fn on_hang_warn(&self, _key: &str, _idle: Duration) {}

    /// Soft terminate sent after the kill threshold.
    fn on_hang_timeout(&self, _key: &str) {}

    /// Process tree force-killed after the grace period.
    fn on_hang_killed(&self, _key: &str) {}
}

/// Observer that ignores every hook.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TaskObserver for NoopObserver {}

/// Runs scripts for one session attempt.
pub struct ScriptRunner {
    cwd: PathBuf,
    output_dir: PathBuf,
    path_env: Option<OsString>,
    thresholds: HangThresholds,
    order_file: Option<PathBuf>,
    supervisor: Arc<ProcessSupervisor>,
    abort: CancellationToken,
}

impl ScriptRunner {
    /// Runner spawning in `cwd` and writing outputs under `output_dir`.
    #[must_use]
    pub fn new(cwd: PathBuf, output_dir: PathBuf, supervisor: Arc<ProcessSupervisor>) -> Self {
        Self {
            cwd,
            output_dir,
            path_env: None,
            thresholds: HangThresholds::default(),
            order_file: None,
            supervisor,
            abort: CancellationToken::new(),
        }
    }

    /// Replace the child's `PATH`.
    #[must_use]
    pub fn with_path_env(mut self, path_env: Option<OsString>) -> Self {
        self.path_env = path_env;
        self
    }

    /// Apply inactivity thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: HangThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Append a one-letter marker per finished task to `order_file`.
    #[must_use]
    pub fn with_order_file(mut self, order_file: Option<PathBuf>) -> Self {
        self.order_file = order_file;
        self
    }

    /// Kill running processes as soon as `abort` fires.
    #[must_use]
    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }

    /// Output file path for `key`.
    #[must_use]
    pub fn output_path(&self, key: &str) -> PathBuf {
        self.output_dir.join(format!("{key}.txt"))
    }

    /// Run `task` to completion.
    ///
    /// Non-zero exits, hangs and kills are reported through the returned
    /// [`TaskEnd`], not as errors.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the output file cannot be created, or
    /// `AppError::Spawn` if the shell cannot be started. In the spawn case
    /// the error text is also written to the output file.
    pub async fn run(&self, task: &ScriptTask, observer: &dyn TaskObserver) -> Result<TaskEnd> {
        let span = info_span!("script", key = %task.key);
        self.run_inner(task, observer).instrument(span).await
    }

    async fn run_inner(&self, task: &ScriptTask, observer: &dyn TaskObserver) -> Result<TaskEnd> {
        let matcher = WarnMatcher::new(&task.warn_patterns)?;
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let output_path = self.output_path(&task.key);
        let mut file = tokio::fs::File::create(&output_path).await?;

        let mut cmd = shell_command(&task.command);
        cmd.current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = &self.path_env {
            cmd.env("PATH", path);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let started_at = Utc::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                let message = format!("failed to spawn `{}`: {err}\n", task.command);
                if let Err(write_err) = file.write_all(message.as_bytes()).await {
                    debug!(%write_err, "could not record spawn failure");
                }
                return Err(AppError::Spawn(message.trim_end().to_owned()));
            }
        };

        let pid = child.id();
        self.supervisor.track(&task.key, pid);
        info!(pid = pid.unwrap_or(0), command = %task.command, "script spawned");
        observer.on_start(&task.key, started_at);

        let clock = Arc::new(ActivityClock::new());
        let captured = Arc::new(Mutex::new(Vec::new()));
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward(stdout, chunk_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward(stderr, chunk_tx.clone()));
        }
        drop(chunk_tx);
        let mut writer = tokio::spawn(write_output(
            file,
            chunk_rx,
            Arc::clone(&clock),
            Arc::clone(&captured),
        ));

        let (event_tx, mut events) = mpsc::unbounded_channel();
        let monitor = match pid {
            Some(pid) if self.thresholds.is_enabled() => Some(
                HangMonitor::new(
                    task.key.clone(),
                    pid,
                    self.thresholds,
                    Arc::clone(&clock),
                    self.supervisor.killer(),
                    event_tx,
                )
                .spawn(),
            ),
            _ => {
                drop(event_tx);
                None
            }
        };

        let mut aborted = false;
        let wait_result = loop {
            tokio::select! {
                result = child.wait() => break result,
                Some(event) = events.recv() => dispatch(&task.key, &event, observer),
                () = self.abort.cancelled(), if !aborted => {
                    aborted = true;
                    if let Some(pid) = pid {
                        debug!(pid, "run aborted; killing process tree");
                        if let Err(err) = self.supervisor.killer().kill_tree(pid) {
                            debug!(%err, "abort kill not delivered");
                        }
                    }
                }
            }
        };

        let timed_out = match monitor {
            Some(handle) => handle.stop().await,
            None => false,
        };
        while let Ok(event) = events.try_recv() {
            dispatch(&task.key, &event, observer);
        }
        self.supervisor.untrack(&task.key);

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, &mut writer).await;
        match drained {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => warn!(%err, "failed writing script output"),
            Ok(Err(err)) => warn!(%err, "output writer task failed"),
            Err(_) => {
                // A descendant still holds the pipes; the file is final from here.
                warn!("output pipes still open after exit; capture truncated");
                writer.abort();
                if let Err(err) = writer.await {
                    debug!(%err, "output writer stopped");
                }
            }
        }

        let exit_code = match &wait_result {
            Ok(status) => status.code(),
            Err(err) => {
                warn!(%err, "failed waiting for script process");
                None
            }
        };
        let status = match wait_result {
            Ok(exit) => {
                let warned = !timed_out
                    && exit.success()
                    && warn_matched(&matcher, &captured, &output_path).await;
                classify(exit, timed_out, || warned)
            }
            Err(_) => TaskStatus::Error,
        };

        let end = TaskEnd {
            key: task.key.clone(),
            output_path,
            started_at,
            ended_at: Utc::now(),
            exit_code,
            status,
        };
        info!(
            status = status.as_str(),
            exit_code = exit_code.unwrap_or(-1),
            duration_ms = end.duration_ms(),
            "script finished"
        );

        if let Some(order_file) = &self.order_file {
            append_marker(order_file, &task.key).await;
        }
        observer.on_end(&end);
        Ok(end)
    }
}

/// Shell invocation for a command string.
fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

fn dispatch(key: &str, event: &HangEvent, observer: &dyn TaskObserver) {
    match event {
        HangEvent::Warned { idle } => observer.on_hang_warn(key, *idle),
        HangEvent::TimedOut { .. } => observer.on_hang_timeout(key),
        HangEvent::Killed => observer.on_hang_killed(key),
    }
}

/// Classify a process exit.
///
/// A hang kill wins over whatever exit code the terminated process
/// reported; a signal death without a hang kill is a plain kill.
pub fn classify(exit: ExitStatus, timed_out: bool, warn_matched: impl FnOnce() -> bool) -> TaskStatus {
    if timed_out {
        return TaskStatus::TimedOut;
    }
    match exit.code() {
        Some(0) if warn_matched() => TaskStatus::Warn,
        Some(0) => TaskStatus::Done,
        Some(_) => TaskStatus::Error,
        None => TaskStatus::Killed,
    }
}

async fn warn_matched(
    matcher: &WarnMatcher,
    captured: &Mutex<Vec<u8>>,
    output_path: &Path,
) -> bool {
    if matcher.is_empty() {
        return false;
    }
    let in_memory = {
        let bytes = captured.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    };
    if matcher.matches(&in_memory) {
        return true;
    }
    tokio::fs::read(output_path)
        .await
        .map(|bytes| matcher.matches(&String::from_utf8_lossy(&bytes)))
        .unwrap_or(false)
}

async fn forward<R>(mut stream: R, tx: mpsc::UnboundedSender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    return;
                }
            }
            Err(err) => {
                debug!(%err, "output stream read failed");
                return;
            }
        }
    }
}

async fn write_output(
    mut file: tokio::fs::File,
    mut chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    clock: Arc<ActivityClock>,
    captured: Arc<Mutex<Vec<u8>>>,
) -> std::io::Result<()> {
    while let Some(chunk) = chunks.recv().await {
        clock.touch();
        file.write_all(&chunk).await?;
        captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(&chunk);
    }
    file.flush().await
}

async fn append_marker(order_file: &Path, key: &str) {
    let Some(marker) = key.chars().next() else {
        return;
    };
    let result = async {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(order_file)
            .await?;
        file.write_all(marker.to_string().as_bytes()).await?;
        file.flush().await
    }
    .await;
    if let Err(err) = result {
        warn!(%err, path = %order_file.display(), "failed to append order marker");
    }
}
