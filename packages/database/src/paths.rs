#![allow(clippy::module_name_repetitions)]
//! Canonical file paths inside the data folder.
//!
//! Records are sharded two levels deep on characters of their UUID:
//! `<root>/<domain>_<uuid[7]>/<domain>_<uuid[6]>/<uuid>.json`.

use std::path::{Path, PathBuf};

use metalert_models::{Domain, check_uuid};

/// Length of a canonical record file name (`<uuid>.json`).
pub const RECORD_FILE_NAME_LEN: usize = 41;

/// Returns the shard directory holding the record `uuid`.
///
/// `uuid` is expected in canonical form; shorter strings fall back to
/// `_` as the shard character.
#[must_use]
pub fn record_dir(root: &Path, domain: Domain, uuid: &str) -> PathBuf {
    let prefix = domain.shard_prefix();
    let shard = |i: usize| uuid.chars().nth(i).unwrap_or('_');
    root.join(format!("{prefix}_{}", shard(7)))
        .join(format!("{prefix}_{}", shard(6)))
}

/// Returns the canonical JSON file of the record `uuid`.
#[must_use]
pub fn record_path(root: &Path, domain: Domain, uuid: &str) -> PathBuf {
    record_dir(root, domain, uuid).join(format!("{uuid}.json"))
}

/// Creates the shard directory of `uuid` if needed and returns it.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn prepare_record_dir(root: &Path, domain: Domain, uuid: &str) -> std::io::Result<PathBuf> {
    let dir = record_dir(root, domain, uuid);
    ensure_dir(&dir)?;
    Ok(dir)
}

/// Returns the UUID stem if `file_name` is a canonical record file name:
/// 41 characters, `.json` suffix, canonical UUID stem.
#[must_use]
pub fn record_uuid(file_name: &str) -> Option<&str> {
    if file_name.len() != RECORD_FILE_NAME_LEN {
        return None;
    }
    let stem = file_name.strip_suffix(".json")?;
    check_uuid(stem).ok().map(|_| stem)
}

/// Lists every canonical record file of `domain` under `root`, matching
/// `<domain>_*/<domain>_*/*.json`. Order is sorted by path.
///
/// Files whose names are not canonical are included; callers filter them
/// with [`record_uuid`].
///
/// # Errors
///
/// Returns an I/O error if `root` or a shard directory cannot be read.
pub fn record_files(root: &Path, domain: Domain) -> std::io::Result<Vec<PathBuf>> {
    let prefix = format!("{}_", domain.shard_prefix());
    let mut files = Vec::new();

    for outer in shard_dirs(root, &prefix)? {
        for inner in shard_dirs(&outer, &prefix)? {
            for entry in std::fs::read_dir(&inner)? {
                let path = entry?.path();
                if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                    files.push(path);
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

fn shard_dirs(dir: &Path, prefix: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(prefix));
        if matches && path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
