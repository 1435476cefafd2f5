//! Text bundle archiver.
//!
//! `full.txt` concatenates every file selected by the configured include
//! globs (minus excludes, the output directory and `.git`), optionally
//! prefixed with a prompt. `diff.txt` holds `git diff HEAD`.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::future::Future;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::process::Command;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{ArchiveRequest, ArchiveResult, ArchiveStage, ContinueGate};
use crate::models::task::{ArchiveKind, TaskStatus};
use crate::{AppError, Result};

/// Archiver writing plain-text bundles.
#[derive(Debug, Default, Clone, Copy)]
pub struct BundleArchiver;

/// How writing one archive ended.
enum Written {
    Complete(TaskStatus),
    Interrupted,
}

impl ArchiveStage for BundleArchiver {
    fn run(
        &self,
        request: ArchiveRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ArchiveResult>> + Send + '_>> {
        Box::pin(run_bundles(request).instrument(info_span!("archive")))
    }
}

async fn run_bundles(request: ArchiveRequest) -> Result<ArchiveResult> {
    tokio::fs::create_dir_all(&request.output_dir).await?;
    let mut result = ArchiveResult::default();

    for kind in ArchiveKind::ALL {
        if !(request.should_continue)() {
            result.cancelled = true;
            return Ok(result);
        }
        let path = request.output_dir.join(kind.file_name());
        request.ui.on_archive_start(kind);

        let written = match kind {
            ArchiveKind::Full => write_full(&request, path.clone()).await,
            ArchiveKind::Diff => write_diff(&request.cwd, &path).await,
        };
        if path.exists() {
            result.created.push(path.clone());
        }

        match written {
            Ok(Written::Complete(status)) => {
                info!(kind = kind.as_str(), path = %path.display(), "archive written");
                request.ui.on_archive_end(kind, Some(path.as_path()), status);
            }
            Ok(Written::Interrupted) => {
                request.ui.on_archive_end(kind, None, TaskStatus::Killed);
                result.cancelled = true;
                return Ok(result);
            }
            Err(err) => {
                request.ui.on_archive_end(kind, None, TaskStatus::Error);
                return Err(err);
            }
        }
    }
    Ok(result)
}

async fn write_full(request: &ArchiveRequest, path: PathBuf) -> Result<Written> {
    let cwd = request.cwd.clone();
    let include = request.config.archive.include.clone();
    let exclude = request.config.archive.exclude.clone();
    let output_dir = request.output_dir.clone();
    let prompt = match &request.prompt_path {
        Some(prompt_path) => Some(
            tokio::fs::read_to_string(prompt_path)
                .await
                .map_err(|err| {
                    AppError::Archive(format!(
                        "cannot read prompt {}: {err}",
                        prompt_path.display()
                    ))
                })?,
        ),
        None => None,
    };
    let display = request.prompt_display.clone();
    let gate = request.should_continue.clone();

    tokio::task::spawn_blocking(move || {
        let files = select_files(&cwd, &include, &exclude, &output_dir)?;
        write_bundle(&path, &cwd, &files, prompt.as_deref(), display.as_deref(), &gate)
    })
    .await
    .map_err(|err| AppError::Archive(format!("bundle task failed: {err}")))?
}

/// Files under `cwd` matching `include` and none of `exclude`, sorted.
///
/// Anything inside `output_dir` or a `.git` directory is skipped.
///
/// # Errors
///
/// Returns `AppError::Pattern` for an invalid glob.
pub fn select_files(
    cwd: &Path,
    include: &[String],
    exclude: &[String],
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let excludes = exclude
        .iter()
        .map(|pattern| glob::Pattern::new(pattern))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let root = glob::Pattern::escape(&cwd.to_string_lossy());

    let mut selected = BTreeSet::new();
    for pattern in include {
        let full = format!("{root}/{pattern}");
        for entry in glob::glob(&full)? {
            let path = match entry {
                Ok(path) => path,
                Err(err) => {
                    debug!(%err, "unreadable path skipped");
                    continue;
                }
            };
            if !path.is_file() || path.starts_with(output_dir) {
                continue;
            }
            let Ok(relative) = path.strip_prefix(cwd) else {
                continue;
            };
            if relative.components().any(|c| c.as_os_str() == ".git") {
                continue;
            }
            if excludes.iter().any(|ex| ex.matches_path(relative)) {
                continue;
            }
            selected.insert(relative.to_path_buf());
        }
    }
    Ok(selected.into_iter().collect())
}

fn write_bundle(
    path: &Path,
    cwd: &Path,
    files: &[PathBuf],
    prompt: Option<&str>,
    display: Option<&str>,
    gate: &ContinueGate,
) -> Result<Written> {
    let mut out = std::io::BufWriter::new(fs::File::create(path)?);
    let mut header = String::from("# handoff bundle\n");
    let _ = writeln!(header, "# files: {}", files.len());
    if let Some(prompt) = prompt {
        let _ = writeln!(header, "# prompt: {}", display.unwrap_or("prompt"));
        header.push_str(prompt);
        if !prompt.ends_with('\n') {
            header.push('\n');
        }
    }
    out.write_all(header.as_bytes())?;

    let mut skipped = 0usize;
    for relative in files {
        if !gate() {
            out.flush()?;
            return Ok(Written::Interrupted);
        }
        let bytes = match fs::read(cwd.join(relative)) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(file = %relative.display(), %err, "file vanished while bundling");
                skipped += 1;
                continue;
            }
        };
        writeln!(out, "\n===== {} =====", relative.display())?;
        match std::str::from_utf8(&bytes) {
            Ok(text) => {
                out.write_all(text.as_bytes())?;
                if !text.ends_with('\n') {
                    out.write_all(b"\n")?;
                }
            }
            Err(_) => writeln!(out, "(binary file, {} bytes)", bytes.len())?,
        }
    }
    out.flush()?;

    if skipped > 0 {
        Ok(Written::Complete(TaskStatus::Warn))
    } else {
        Ok(Written::Complete(TaskStatus::Done))
    }
}

async fn write_diff(cwd: &Path, path: &Path) -> Result<Written> {
    let output = Command::new("git")
        .args(["diff", "HEAD", "--no-color"])
        .current_dir(cwd)
        .output()
        .await;

    let (body, status) = match output {
        Ok(out) if out.status.success() => (out.stdout, TaskStatus::Done),
        Ok(out) => {
            let reason = String::from_utf8_lossy(&out.stderr).trim().to_owned();
            warn!(%reason, "git diff failed");
            (
                format!("# git diff unavailable: {reason}\n").into_bytes(),
                TaskStatus::Warn,
            )
        }
        Err(err) => {
            warn!(%err, "git not runnable");
            (
                format!("# git diff unavailable: {err}\n").into_bytes(),
                TaskStatus::Warn,
            )
        }
    };

    tokio::fs::write(path, body).await?;
    Ok(Written::Complete(status))
}
