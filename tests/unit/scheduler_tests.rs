//! Unit tests for the task scheduler.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use handoff::models::outcome::ExecutionMode;
use handoff::models::task::{ScriptTask, TaskEnd, TaskStatus};
use handoff::orchestrator::scheduler::{run_scripts, ScriptExecutor};
use handoff::{AppError, Result};

/// Executor that sleeps per key instead of spawning processes.
#[derive(Default)]
struct FakeExecutor {
    delays: HashMap<String, Duration>,
    failing: Vec<String>,
    started: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    close_after_first: Option<Arc<AtomicBool>>,
}

impl FakeExecutor {
    fn with_delays(delays: &[(&str, u64)]) -> Self {
        Self {
            delays: delays
                .iter()
                .map(|(key, ms)| ((*key).to_owned(), Duration::from_millis(*ms)))
                .collect(),
            ..Self::default()
        }
    }

    fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

impl ScriptExecutor for FakeExecutor {
    fn execute<'a>(
        &'a self,
        task: &'a ScriptTask,
    ) -> Pin<Box<dyn Future<Output = Result<TaskEnd>> + Send + 'a>> {
        Box::pin(async move {
            if self.failing.contains(&task.key) {
                return Err(AppError::Spawn(format!("cannot start {}", task.key)));
            }
            self.started.lock().unwrap().push(task.key.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let started_at = Utc::now();
            let delay = self.delays.get(&task.key).copied().unwrap_or_default();
            tokio::time::sleep(delay).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if let Some(gate) = &self.close_after_first {
                gate.store(false, Ordering::SeqCst);
            }
            Ok(TaskEnd {
                key: task.key.clone(),
                output_path: PathBuf::from(format!("{}.txt", task.key)),
                started_at,
                ended_at: Utc::now(),
                exit_code: Some(0),
                status: TaskStatus::Done,
            })
        })
    }
}

fn tasks(keys: &[&str]) -> Vec<ScriptTask> {
    keys.iter().map(|key| ScriptTask::new(*key, "true")).collect()
}

fn open() -> impl Fn() -> bool + Send + Sync {
    || true
}

fn names(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| p.display().to_string()).collect()
}

#[tokio::test]
async fn sequential_runs_in_configured_order() {
    let executor = FakeExecutor::with_delays(&[("a", 60), ("b", 10), ("c", 30)]);

    let report = run_scripts(&tasks(&["a", "b", "c"]), ExecutionMode::Sequential, &executor, &open()).await;

    assert_eq!(executor.started(), ["a", "b", "c"]);
    assert_eq!(names(&report.outputs), ["a.txt", "b.txt", "c.txt"]);
    assert_eq!(executor.peak.load(Ordering::SeqCst), 1, "never two at once");
    assert!(report.skipped.is_empty());
}

#[tokio::test]
async fn concurrent_starts_all_and_collects_in_completion_order() {
    let executor = FakeExecutor::with_delays(&[("a", 300), ("b", 50), ("c", 150)]);

    let report = run_scripts(&tasks(&["a", "b", "c"]), ExecutionMode::Concurrent, &executor, &open()).await;

    assert_eq!(executor.peak.load(Ordering::SeqCst), 3, "all tasks in flight together");
    assert_eq!(names(&report.outputs), ["b.txt", "c.txt", "a.txt"]);
    assert_eq!(report.ends.len(), 3);
}

#[tokio::test]
async fn sequential_skips_remaining_once_gate_closes() {
    let gate = Arc::new(AtomicBool::new(true));
    let executor = FakeExecutor {
        close_after_first: Some(Arc::clone(&gate)),
        ..FakeExecutor::default()
    };
    let check = {
        let gate = Arc::clone(&gate);
        move || gate.load(Ordering::SeqCst)
    };

    let report = run_scripts(&tasks(&["a", "b", "c"]), ExecutionMode::Sequential, &executor, &check).await;

    assert_eq!(executor.started(), ["a"]);
    assert_eq!(report.skipped, ["b", "c"]);
    assert_eq!(report.ends.len(), 1);
}

#[tokio::test]
async fn closed_gate_dispatches_nothing() {
    let executor = FakeExecutor::default();
    let closed = || false;

    for mode in [ExecutionMode::Concurrent, ExecutionMode::Sequential] {
        let report = run_scripts(&tasks(&["a", "b"]), mode, &executor, &closed).await;
        assert_eq!(report.skipped, ["a", "b"], "{mode:?}");
        assert!(report.outputs.is_empty());
    }
    assert!(executor.started().is_empty());
}

#[tokio::test]
async fn start_failure_does_not_stall_sequence() {
    let executor = FakeExecutor {
        failing: vec!["b".into()],
        ..FakeExecutor::default()
    };

    let report = run_scripts(&tasks(&["a", "b", "c"]), ExecutionMode::Sequential, &executor, &open()).await;

    assert_eq!(executor.started(), ["a", "c"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "b");
    assert!(matches!(report.failures[0].1, AppError::Spawn(_)));
}

#[tokio::test]
async fn start_failure_does_not_stall_fan_in() {
    let executor = FakeExecutor {
        failing: vec!["a".into()],
        ..FakeExecutor::with_delays(&[("b", 50)])
    };

    let report = run_scripts(&tasks(&["a", "b"]), ExecutionMode::Concurrent, &executor, &open()).await;

    assert_eq!(names(&report.outputs), ["b.txt"]);
    assert_eq!(report.failures.len(), 1);
}

#[tokio::test]
async fn empty_task_list_is_noop() {
    let executor = FakeExecutor::default();
    let report = run_scripts(&[], ExecutionMode::Concurrent, &executor, &open()).await;
    assert!(report.outputs.is_empty());
    assert!(report.skipped.is_empty());
}
