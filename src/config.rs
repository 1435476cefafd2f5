//! Global configuration parsing, validation, and CLI overrides.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::models::hang::{HangThresholds, DEFAULT_KILL_GRACE_SECONDS};
use crate::models::outcome::{Behavior, ExecutionMode};
use crate::models::pattern::WarnMatcher;
use crate::models::task::ScriptTask;
use crate::{AppError, Result};

/// Default config file name looked up in the repository root.
pub const DEFAULT_CONFIG_FILE: &str = "handoff.toml";

/// Inactivity thresholds (seconds); `0` disables a check.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HangConfig {
    /// Idle seconds before a hang warning.
    #[serde(default)]
    pub warn_seconds: u64,
    /// Idle seconds before the soft terminate.
    #[serde(default)]
    pub kill_seconds: u64,
    /// Seconds between soft terminate and force kill.
    #[serde(default = "default_kill_grace")]
    pub kill_grace_seconds: u64,
}

impl Default for HangConfig {
    fn default() -> Self {
        Self {
            warn_seconds: 0,
            kill_seconds: 0,
            kill_grace_seconds: DEFAULT_KILL_GRACE_SECONDS,
        }
    }
}

fn default_kill_grace() -> u64 {
    DEFAULT_KILL_GRACE_SECONDS
}

/// File selection for the archive stage.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ArchiveConfig {
    /// Whether archives are produced after scripts finish.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Glob patterns (relative to the repository root) to bundle.
    #[serde(default = "default_include")]
    pub include: Vec<String>,
    /// Glob patterns excluded from the bundle.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Optional prompt file placed at the top of the full bundle.
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include: default_include(),
            exclude: Vec::new(),
            prompt_file: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_include() -> Vec<String> {
    vec!["**/*".into()]
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".handoff").join("out")
}

fn default_bin_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("node_modules").join(".bin")]
}

/// Global configuration parsed from `handoff.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Scripts in the order they are queued.
    #[serde(default)]
    pub scripts: Vec<ScriptTask>,
    /// Dispatch mode for scripts.
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Directory receiving `<key>.txt` outputs and archives.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Local dependency-binary directories prepended to `PATH`.
    #[serde(default = "default_bin_dirs")]
    pub bin_dirs: Vec<PathBuf>,
    /// Optional ordering file (debug aid).
    #[serde(default)]
    pub order_file: Option<PathBuf>,
    /// Hang detection thresholds.
    #[serde(default)]
    pub hang: HangConfig,
    /// Archive stage settings.
    #[serde(default)]
    pub archive: ArchiveConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            scripts: Vec::new(),
            mode: ExecutionMode::default(),
            output_dir: default_output_dir(),
            bin_dirs: default_bin_dirs(),
            order_file: None,
            hang: HangConfig::default(),
            archive: ArchiveConfig::default(),
        }
    }
}

/// CLI overrides applied on top of the file configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// Replacement execution mode.
    pub mode: Option<ExecutionMode>,
    /// Disable the archive stage.
    pub no_archive: bool,
    /// Enable terminal key capture.
    pub live: bool,
    /// Replacement hang warn seconds.
    pub hang_warn: Option<u64>,
    /// Replacement hang kill seconds.
    pub hang_kill: Option<u64>,
    /// Replacement kill grace seconds.
    pub hang_kill_grace: Option<u64>,
    /// Replacement ordering file.
    pub order_file: Option<PathBuf>,
    /// Restrict the run to these script keys.
    pub only: Vec<String>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            AppError::Config(format!("failed to read config {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Output directory resolved against the repository root.
    #[must_use]
    pub fn output_dir_in(&self, cwd: &Path) -> PathBuf {
        cwd.join(&self.output_dir)
    }

    /// Scripts selected for a run, keeping configured order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `only` names an unknown script.
    pub fn select_scripts(&self, only: &[String]) -> Result<Vec<ScriptTask>> {
        if only.is_empty() {
            return Ok(self.scripts.clone());
        }
        if let Some(unknown) = only
            .iter()
            .find(|key| !self.scripts.iter().any(|s| &s.key == *key))
        {
            return Err(AppError::Config(format!("unknown script: {unknown}")));
        }
        Ok(self
            .scripts
            .iter()
            .filter(|s| only.contains(&s.key))
            .cloned()
            .collect())
    }

    /// Resolve behaviour flags, applying CLI overrides.
    #[must_use]
    pub fn behavior(&self, overrides: &Overrides) -> Behavior {
        let hang = HangThresholds::from_seconds(
            overrides.hang_warn.unwrap_or(self.hang.warn_seconds),
            overrides.hang_kill.unwrap_or(self.hang.kill_seconds),
            overrides
                .hang_kill_grace
                .unwrap_or(self.hang.kill_grace_seconds),
        );
        Behavior {
            archive: self.archive.enabled && !overrides.no_archive,
            live: overrides.live,
            hang,
            order_file: overrides
                .order_file
                .clone()
                .or_else(|| self.order_file.clone())
                .filter(|p| !p.as_os_str().is_empty()),
        }
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for script in &self.scripts {
            if script.key.trim().is_empty() {
                return Err(AppError::Config("script key must not be empty".into()));
            }
            if script.key.contains(['/', '\\']) {
                return Err(AppError::Config(format!(
                    "script key {} must not contain path separators",
                    script.key
                )));
            }
            if !seen.insert(script.key.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate script key: {}",
                    script.key
                )));
            }
            if script.command.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "script {} has an empty command",
                    script.key
                )));
            }
            WarnMatcher::new(&script.warn_patterns)
                .map_err(|err| AppError::Config(format!("script {}: {err}", script.key)))?;
        }

        for pattern in self.archive.include.iter().chain(&self.archive.exclude) {
            glob::Pattern::new(pattern)
                .map_err(|err| AppError::Config(format!("archive glob {pattern}: {err}")))?;
        }

        Ok(())
    }
}
