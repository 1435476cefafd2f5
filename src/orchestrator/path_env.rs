//! `PATH` augmentation with local dependency-binary directories.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::{AppError, Result};

/// Existing `<ancestor>/<bin_dir>` directories, nearest ancestor first.
#[must_use]
pub fn local_bin_dirs(cwd: &Path, bin_dirs: &[PathBuf]) -> Vec<PathBuf> {
    cwd.ancestors()
        .flat_map(|ancestor| bin_dirs.iter().map(move |bin| ancestor.join(bin)))
        .filter(|candidate| candidate.is_dir())
        .collect()
}

/// `PATH` value with local bin directories prepended to `inherited`.
///
/// Returns `None` when there is nothing to prepend.
///
/// # Errors
///
/// Returns `AppError::Config` if a directory contains the platform's
/// path-list separator.
pub fn augmented_path(
    cwd: &Path,
    bin_dirs: &[PathBuf],
    inherited: Option<OsString>,
) -> Result<Option<OsString>> {
    let local = local_bin_dirs(cwd, bin_dirs);
    if local.is_empty() {
        return Ok(None);
    }
    let inherited: Vec<PathBuf> = inherited
        .as_deref()
        .map(|value| env::split_paths(value).collect())
        .unwrap_or_default();
    let joined = env::join_paths(local.into_iter().chain(inherited))
        .map_err(|err| AppError::Config(format!("cannot build PATH: {err}")))?;
    Ok(Some(joined))
}

/// [`augmented_path`] applied to the current process environment.
///
/// # Errors
///
/// See [`augmented_path`].
pub fn augmented_process_path(cwd: &Path, bin_dirs: &[PathBuf]) -> Result<Option<OsString>> {
    augmented_path(cwd, bin_dirs, env::var_os("PATH"))
}
