//! Session orchestrator: one attempt of scripts plus archiving.
//!
//! Flow: mint epoch, wire cancellation, queue tasks, run the scheduler,
//! pass cancellation checkpoints, hand off to the archive stage, then
//! detach and settle. A cancel or restart at any checkpoint skips the
//! remaining states; neither is an error. Archive-stage errors propagate
//! unchanged.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, info_span, warn, Instrument};

use super::cancel::{CancelController, ExitCodeCell};
use super::epoch::{EpochGuard, EpochScopedUi};
use super::runner::{ScriptRunner, TaskObserver};
use super::scheduler::{run_scripts, ObservedRunner, ScheduleReport};
use super::signals::install_interrupt;
use super::supervisor::{GroupKiller, ProcessKiller, ProcessSupervisor};
use crate::archive::{ArchiveRequest, ArchiveStage, ContinueGate};
use crate::config::GlobalConfig;
use crate::models::outcome::{Behavior, CancelMode, ExecutionMode, RunOutcome};
use crate::models::task::{ArchiveKind, ScriptTask, TaskEnd, TaskStatus};
use crate::ui::{archive_task_id, UiPort};
use crate::Result;

/// Settle delay applied before an attempt returns.
///
/// Larger on platforms with slower filesystem-event delivery.
#[must_use]
pub fn default_settle_delay() -> Duration {
    if cfg!(target_os = "macos") {
        Duration::from_millis(200)
    } else if cfg!(windows) {
        Duration::from_millis(300)
    } else {
        Duration::from_millis(50)
    }
}

/// Delays used by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Pause between consecutive cancellation checkpoints.
    pub checkpoint_delay: Duration,
    /// Pause before returning from any terminal path.
    pub settle_delay: Duration,
    /// How long running scripts get to report after a cancel before the
    /// scheduler is abandoned.
    pub abandon_after: Duration,
    /// Bound on waiting for killed processes to exit.
    pub process_wait: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            checkpoint_delay: Duration::from_millis(25),
            settle_delay: default_settle_delay(),
            abandon_after: Duration::from_secs(5),
            process_wait: Duration::from_secs(2),
        }
    }
}

/// Everything shared by the attempts of one run.
pub struct SessionContext {
    /// Repository root; scripts run here.
    pub cwd: PathBuf,
    /// Loaded configuration.
    pub config: Arc<GlobalConfig>,
    /// Scripts in queue order.
    pub tasks: Vec<ScriptTask>,
    /// Dispatch mode.
    pub mode: ExecutionMode,
    /// Behaviour flags.
    pub behavior: Behavior,
    /// Directory receiving outputs and archives.
    pub output_dir: PathBuf,
    /// `PATH` for spawned scripts; `None` inherits.
    pub path_env: Option<OsString>,
    /// Display persisting across attempts.
    pub ui: Arc<dyn UiPort>,
    /// Archive collaborator.
    pub archive: Arc<dyn ArchiveStage>,
    /// Active-epoch cell.
    pub epochs: Arc<EpochGuard>,
    /// Process-level exit code.
    pub exit_code: ExitCodeCell,
    /// Signal delivery for supervisors.
    pub killer: Arc<dyn ProcessKiller>,
    /// Bind SIGINT/SIGTERM to cancel.
    pub handle_signals: bool,
    /// Orchestrator delays.
    pub timing: SessionTiming,
}

impl SessionContext {
    /// Context with default killer, timing and a fresh epoch cell.
    ///
    /// Interrupt handling is off; enable it with
    /// [`with_signals`](Self::with_signals).
    #[must_use]
    pub fn new(
        cwd: PathBuf,
        config: Arc<GlobalConfig>,
        tasks: Vec<ScriptTask>,
        behavior: Behavior,
        ui: Arc<dyn UiPort>,
        archive: Arc<dyn ArchiveStage>,
    ) -> Self {
        let output_dir = config.output_dir_in(&cwd);
        let mode = config.mode;
        Self {
            cwd,
            config,
            tasks,
            mode,
            behavior,
            output_dir,
            path_env: None,
            ui,
            archive,
            epochs: Arc::new(EpochGuard::new()),
            exit_code: ExitCodeCell::new(),
            killer: Arc::new(GroupKiller),
            handle_signals: false,
            timing: SessionTiming::default(),
        }
    }

    /// Override the dispatch mode.
    #[must_use]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the scripts' `PATH`.
    #[must_use]
    pub fn with_path_env(mut self, path_env: Option<OsString>) -> Self {
        self.path_env = path_env;
        self
    }

    /// Bind SIGINT/SIGTERM to cancel.
    #[must_use]
    pub fn with_signals(mut self, handle_signals: bool) -> Self {
        self.handle_signals = handle_signals;
        self
    }

    /// Override orchestrator delays.
    #[must_use]
    pub fn with_timing(mut self, timing: SessionTiming) -> Self {
        self.timing = timing;
        self
    }
}

/// Forwards runner hooks to the attempt's scoped display.
struct SessionObserver {
    ui: Arc<EpochScopedUi>,
    controller: Arc<CancelController>,
    exit_code: ExitCodeCell,
}

impl TaskObserver for SessionObserver {
    fn on_start(&self, key: &str, started_at: DateTime<Utc>) {
        self.controller.mark_started(key);
        self.ui.on_script_start(key, started_at);
    }

    fn on_end(&self, end: &TaskEnd) {
        if self.controller.was_task_cancelled(&end.key) {
            debug!(key = %end.key, "late completion for cancelled task ignored");
            return;
        }
        if !self.ui.is_live() {
            debug!(key = %end.key, "completion from superseded attempt ignored");
            return;
        }
        if end.status == TaskStatus::Error {
            self.exit_code.fail();
        }
        self.ui.on_script_end(end);
    }

    fn on_hang_warn(&self, key: &str, idle: Duration) {
        self.ui.on_hang_warn(key, idle);
    }

    fn on_hang_timeout(&self, key: &str) {
        self.ui.on_hang_timeout(key);
    }

    fn on_hang_killed(&self, key: &str) {
        self.ui.on_hang_killed(key);
    }
}

/// Run one session attempt.
///
/// # Errors
///
/// Only archive-stage failures are returned; script failures, hangs,
/// cancels and restarts are reported through the outcome and the display.
pub async fn run_session(ctx: &SessionContext) -> Result<RunOutcome> {
    let epoch = ctx.epochs.mint();
    let span = info_span!("session", epoch = %epoch);
    let ui = Arc::new(EpochScopedUi::new(
        epoch,
        Arc::clone(&ctx.epochs),
        Arc::clone(&ctx.ui),
    ));
    let scoped: Arc<dyn UiPort> = Arc::clone(&ui) as Arc<dyn UiPort>;
    let supervisor = Arc::new(ProcessSupervisor::new(Arc::clone(&ctx.killer)));
    // Failures are committed to the run only by an attempt that is not
    // superseded by a restart.
    let attempt_code = ExitCodeCell::new();
    let controller = Arc::new(CancelController::new(
        Arc::clone(&scoped),
        Arc::clone(&supervisor),
        attempt_code.clone(),
    ));

    async {
        ui.start();
        ui.install_cancellation(controller.handlers());
        let interrupt = ctx
            .handle_signals
            .then(|| install_interrupt(Arc::downgrade(&controller)));

        for task in &ctx.tasks {
            controller.queue(&task.key);
            ui.on_script_queued(&task.key);
        }
        if ctx.behavior.archive {
            for kind in ArchiveKind::ALL {
                controller.queue(&archive_task_id(kind));
                ui.on_archive_queued(kind);
            }
        }

        let result = drive(ctx, &ui, &scoped, &supervisor, &controller, &attempt_code).await;

        ui.clear_cancellation();
        drop(interrupt);
        if controller.is_cancelled() && !supervisor.wait_all(ctx.timing.process_wait).await {
            warn!("some processes were still running when the attempt ended");
        }
        tokio::time::sleep(ctx.timing.settle_delay).await;

        match &result {
            Ok(outcome) => info!(
                cancelled = outcome.cancelled,
                restart = outcome.restart_requested,
                artifacts = outcome.created_artifacts.len(),
                "session attempt finished"
            ),
            Err(err) => warn!(%err, "session attempt failed"),
        }
        let restarting = matches!(&result, Ok(outcome) if outcome.restart_requested);
        if attempt_code.is_failed() && !restarting {
            ctx.exit_code.fail();
        }
        result
    }
    .instrument(span)
    .await
}

/// Scheduling, checkpoints and archive hand-off.
async fn drive(
    ctx: &SessionContext,
    ui: &Arc<EpochScopedUi>,
    scoped: &Arc<dyn UiPort>,
    supervisor: &Arc<ProcessSupervisor>,
    controller: &Arc<CancelController>,
    attempt_code: &ExitCodeCell,
) -> Result<RunOutcome> {
    let runner = ScriptRunner::new(
        ctx.cwd.clone(),
        ctx.output_dir.clone(),
        Arc::clone(supervisor),
    )
    .with_path_env(ctx.path_env.clone())
    .with_thresholds(ctx.behavior.hang)
    .with_order_file(ctx.behavior.order_file.clone())
    .with_abort(controller.token());
    let observer = Arc::new(SessionObserver {
        ui: Arc::clone(ui),
        controller: Arc::clone(controller),
        exit_code: attempt_code.clone(),
    });
    let executor = ObservedRunner::new(runner, observer);
    let gate_controller = Arc::clone(controller);
    let gate = move || gate_controller.should_continue();

    let scripts = run_scripts(&ctx.tasks, ctx.mode, &executor, &gate);
    tokio::pin!(scripts);
    let report = tokio::select! {
        report = &mut scripts => Some(report),
        () = controller.cancelled() => {
            match tokio::time::timeout(ctx.timing.abandon_after, &mut scripts).await {
                Ok(report) => Some(report),
                Err(_) => {
                    warn!("scripts did not report after cancel; abandoning");
                    None
                }
            }
        }
    };
    if let Some(report) = report {
        record_spawn_failures(ctx, ui, controller, attempt_code, report);
    }

    // Checkpoints absorb a cancel that lands between the last script
    // finishing and the archive stage starting.
    if let Some(mode) = checkpoint(controller, 1) {
        return Ok(RunOutcome::aborted(mode));
    }
    tokio::time::sleep(ctx.timing.checkpoint_delay).await;
    if let Some(mode) = checkpoint(controller, 2) {
        return Ok(RunOutcome::aborted(mode));
    }

    if !ctx.behavior.archive {
        return Ok(RunOutcome::default());
    }

    let gate_controller = Arc::clone(controller);
    let should_continue: ContinueGate = Arc::new(move || gate_controller.should_continue());
    let prompt_path = ctx
        .config
        .archive
        .prompt_file
        .as_ref()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| ctx.cwd.join(p));
    let prompt_display = ctx
        .config
        .archive
        .prompt_file
        .as_ref()
        .map(|p| p.display().to_string());
    let request = ArchiveRequest {
        cwd: ctx.cwd.clone(),
        config: Arc::clone(&ctx.config),
        behavior: ctx.behavior.clone(),
        ui: Arc::clone(scoped),
        output_dir: ctx.output_dir.clone(),
        prompt_path,
        prompt_display,
        should_continue,
    };

    info!("starting archive stage");
    let archived = ctx.archive.run(request).await?;

    if archived.cancelled || controller.is_cancelled() {
        let mode = controller.mode().unwrap_or(CancelMode::Cancel);
        info!(
            mode = mode.as_str(),
            partial = archived.created.len(),
            "archive stage cancelled; removing partial artifacts"
        );
        remove_artifacts(&archived.created).await;
        return Ok(RunOutcome::aborted(mode));
    }

    Ok(RunOutcome {
        created_artifacts: archived.created,
        cancelled: false,
        restart_requested: false,
    })
}

fn checkpoint(controller: &CancelController, index: u8) -> Option<CancelMode> {
    let mode = controller.mode();
    if let Some(mode) = mode {
        info!(checkpoint = index, mode = mode.as_str(), "cancellation observed");
    }
    mode
}

/// Spawn failures never reach the observer; report them as errors here.
fn record_spawn_failures(
    ctx: &SessionContext,
    ui: &EpochScopedUi,
    controller: &CancelController,
    attempt_code: &ExitCodeCell,
    report: ScheduleReport,
) {
    debug!(
        finished = report.ends.len(),
        failed = report.failures.len(),
        skipped = report.skipped.len(),
        "scripts settled"
    );
    for (key, err) in report.failures {
        controller.mark_started(&key);
        let now = Utc::now();
        let end = TaskEnd {
            output_path: ctx.output_dir.join(format!("{key}.txt")),
            key,
            started_at: now,
            ended_at: now,
            exit_code: None,
            status: TaskStatus::Error,
        };
        warn!(key = %end.key, %err, "script failed to start");
        if ui.is_live() {
            attempt_code.fail();
            ui.on_script_end(&end);
        }
    }
}

async fn remove_artifacts(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "partial artifact removed"),
            Err(err) => debug!(path = %path.display(), %err, "partial artifact not removed"),
        }
    }
}
