//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Script failures, hangs and cancellations are not errors; they are
/// reported as task statuses. Only archive-stage and scheduler-internal
/// failures escape a session attempt.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// A script command could not be spawned.
    Spawn(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Archive stage failure.
    Archive(String),
    /// Invalid warn pattern or glob.
    Pattern(String),
    /// OS signal registration or delivery failure.
    Signal(String),
    /// Internal scheduling failure (task panicked or was aborted).
    Scheduler(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Archive(msg) => write!(f, "archive: {msg}"),
            Self::Pattern(msg) => write!(f, "pattern: {msg}"),
            Self::Signal(msg) => write!(f, "signal: {msg}"),
            Self::Scheduler(msg) => write!(f, "scheduler: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(format!("json: {err}"))
    }
}

impl From<regex::Error> for AppError {
    fn from(err: regex::Error) -> Self {
        Self::Pattern(err.to_string())
    }
}

impl From<glob::PatternError> for AppError {
    fn from(err: glob::PatternError) -> Self {
        Self::Pattern(format!("invalid glob: {err}"))
    }
}
