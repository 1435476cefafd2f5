//! Task scheduler: concurrent fan-out/fan-in or strict sequential order.
//!
//! The cancellation gate is consulted before a task is dispatched. Tasks
//! already running are never interrupted here; only tasks that have not
//! started are skipped.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use super::runner::{ScriptRunner, TaskObserver};
use crate::models::outcome::ExecutionMode;
use crate::models::task::{ScriptTask, TaskEnd};
use crate::{AppError, Result};

/// Pause between the two gate checks separating sequential tasks.
pub const GUARD_PAUSE: Duration = Duration::from_millis(50);

/// Executes one script task on behalf of the scheduler.
pub trait ScriptExecutor: Send + Sync {
    /// Run `task` to completion.
    ///
    /// # Errors
    ///
    /// Returns an error when the task could not be started at all.
    fn execute<'a>(
        &'a self,
        task: &'a ScriptTask,
    ) -> Pin<Box<dyn Future<Output = Result<TaskEnd>> + Send + 'a>>;
}

/// [`ScriptRunner`] paired with the observer receiving its hooks.
pub struct ObservedRunner {
    runner: ScriptRunner,
    observer: Arc<dyn TaskObserver>,
}

impl ObservedRunner {
    /// Pair `runner` with `observer`.
    #[must_use]
    pub fn new(runner: ScriptRunner, observer: Arc<dyn TaskObserver>) -> Self {
        Self { runner, observer }
    }
}

impl ScriptExecutor for ObservedRunner {
    fn execute<'a>(
        &'a self,
        task: &'a ScriptTask,
    ) -> Pin<Box<dyn Future<Output = Result<TaskEnd>> + Send + 'a>> {
        Box::pin(self.runner.run(task, self.observer.as_ref()))
    }
}

/// What happened to the scheduled tasks.
#[derive(Debug, Default)]
pub struct ScheduleReport {
    /// Output files of finished tasks, in completion order.
    pub outputs: Vec<PathBuf>,
    /// Finished tasks, in completion order.
    pub ends: Vec<TaskEnd>,
    /// Tasks that could not be started.
    pub failures: Vec<(String, AppError)>,
    /// Tasks never dispatched because the gate closed.
    pub skipped: Vec<String>,
}

impl ScheduleReport {
    fn record(&mut self, key: String, result: Result<TaskEnd>) {
        match result {
            Ok(end) => {
                self.outputs.push(end.output_path.clone());
                self.ends.push(end);
            }
            Err(err) => {
                warn!(key, %err, "script could not be started");
                self.failures.push((key, err));
            }
        }
    }
}

/// Run `tasks` through `executor` in `mode`, honouring `should_continue`.
pub async fn run_scripts(
    tasks: &[ScriptTask],
    mode: ExecutionMode,
    executor: &dyn ScriptExecutor,
    should_continue: &(dyn Fn() -> bool + Send + Sync),
) -> ScheduleReport {
    info!(count = tasks.len(), mode = ?mode, "scheduling scripts");
    match mode {
        ExecutionMode::Concurrent => run_concurrent(tasks, executor, should_continue).await,
        ExecutionMode::Sequential => run_sequential(tasks, executor, should_continue).await,
    }
}

async fn run_concurrent(
    tasks: &[ScriptTask],
    executor: &dyn ScriptExecutor,
    should_continue: &(dyn Fn() -> bool + Send + Sync),
) -> ScheduleReport {
    let mut report = ScheduleReport::default();
    let mut in_flight = FuturesUnordered::new();

    for task in tasks {
        if should_continue() {
            in_flight.push(async move { (task.key.clone(), executor.execute(task).await) });
        } else {
            report.skipped.push(task.key.clone());
        }
    }

    while let Some((key, result)) = in_flight.next().await {
        report.record(key, result);
    }
    report
}

async fn run_sequential(
    tasks: &[ScriptTask],
    executor: &dyn ScriptExecutor,
    should_continue: &(dyn Fn() -> bool + Send + Sync),
) -> ScheduleReport {
    let mut report = ScheduleReport::default();

    for (index, task) in tasks.iter().enumerate() {
        let open = if index == 0 {
            should_continue()
        } else {
            gate_between(should_continue).await
        };
        if !open {
            debug!(next = %task.key, "gate closed; skipping remaining scripts");
            report
                .skipped
                .extend(tasks[index..].iter().map(|t| t.key.clone()));
            break;
        }
        let result = executor.execute(task).await;
        report.record(task.key.clone(), result);
    }
    report
}

/// Yield, check, pause, check again.
async fn gate_between(should_continue: &(dyn Fn() -> bool + Send + Sync)) -> bool {
    tokio::task::yield_now().await;
    if !should_continue() {
        return false;
    }
    tokio::time::sleep(GUARD_PAUSE).await;
    should_continue()
}
