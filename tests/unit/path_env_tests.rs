//! Unit tests for `PATH` augmentation.

use std::ffi::OsString;
use std::path::PathBuf;

use handoff::orchestrator::path_env::{augmented_path, local_bin_dirs};

fn bin() -> Vec<PathBuf> {
    vec![PathBuf::from("node_modules").join(".bin")]
}

#[test]
fn nearest_ancestor_comes_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root_bin = dir.path().join("node_modules/.bin");
    let pkg = dir.path().join("packages/web");
    let pkg_bin = pkg.join("node_modules/.bin");
    std::fs::create_dir_all(&root_bin).expect("root bin");
    std::fs::create_dir_all(&pkg_bin).expect("pkg bin");

    let found = local_bin_dirs(&pkg, &bin());

    assert!(found.len() >= 2);
    assert_eq!(found[0], pkg_bin);
    assert_eq!(found[1], root_bin);
}

#[test]
fn missing_directories_are_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let found = local_bin_dirs(dir.path(), &[PathBuf::from("does-not-exist")]);
    assert!(found.is_empty());
}

#[test]
fn local_dirs_are_prepended_to_inherited_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let local = dir.path().join("node_modules/.bin");
    std::fs::create_dir_all(&local).expect("bin");

    let path = augmented_path(dir.path(), &bin(), Some(OsString::from("/usr/bin")))
        .expect("joinable")
        .expect("augmented");

    let entries: Vec<PathBuf> = std::env::split_paths(&path).collect();
    assert_eq!(entries.first(), Some(&local));
    assert_eq!(entries.last(), Some(&PathBuf::from("/usr/bin")));
}

#[test]
fn nothing_to_prepend_inherits_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = augmented_path(dir.path(), &[PathBuf::from("absent")], Some("/usr/bin".into()))
        .expect("joinable");
    assert_eq!(path, None);
}
