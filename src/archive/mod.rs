//! Archive stage: produces the `full` and `diff` bundles handed to the
//! assistant once scripts have finished.
//!
//! The session orchestrator only interprets the [`ArchiveResult`]; what is
//! bundled is decided here.

pub mod bundle;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::GlobalConfig;
use crate::models::outcome::Behavior;
use crate::ui::UiPort;
use crate::Result;

/// Gate polled by the archive stage between units of work.
pub type ContinueGate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Inputs for one archive stage run.
#[derive(Clone)]
pub struct ArchiveRequest {
    /// Repository root.
    pub cwd: PathBuf,
    /// Loaded configuration.
    pub config: Arc<GlobalConfig>,
    /// Resolved behaviour flags.
    pub behavior: Behavior,
    /// Progress sink (already scoped to the attempt's epoch).
    pub ui: Arc<dyn UiPort>,
    /// Directory receiving the archives.
    pub output_dir: PathBuf,
    /// Prompt file placed at the top of the full bundle.
    pub prompt_path: Option<PathBuf>,
    /// Label shown for the prompt.
    pub prompt_display: Option<String>,
    /// Returns `false` once the attempt was cancelled.
    pub should_continue: ContinueGate,
}

/// What the archive stage produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveResult {
    /// Files written, including a partial one when cancelled mid-way.
    pub created: Vec<PathBuf>,
    /// Whether the stage stopped because the gate closed.
    pub cancelled: bool,
}

/// Archive stage collaborator.
pub trait ArchiveStage: Send + Sync {
    /// Produce the archives described by `request`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Archive` (or `AppError::Io`) when an archive
    /// cannot be written. Cancellation is reported through
    /// [`ArchiveResult::cancelled`], never as an error.
    fn run(
        &self,
        request: ArchiveRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ArchiveResult>> + Send + '_>>;
}
