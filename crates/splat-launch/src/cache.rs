//! Invalidation of derived covisibility caches.
//!
//! Layout: `<result_base>/{combined,filtered}/covisible/`

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{LaunchError, LaunchResult};
use crate::obs;

/// Sub-splits that carry a covisible cache.
pub const CACHE_SPLITS: [&str; 2] = ["combined", "filtered"];

/// Name of the cache directory inside each split.
pub const COVISIBLE_DIR: &str = "covisible";

/// Cache directories owned by `result_base`, whether or not they exist.
pub fn cache_dirs(result_base: &Path) -> Vec<PathBuf> {
    CACHE_SPLITS
        .iter()
        .map(|split| result_base.join(split).join(COVISIBLE_DIR))
        .collect()
}

/// Remove every covisible cache under `result_base`.
///
/// Absent directories are the success case. Returns the directories that
/// were actually removed. Any other I/O failure is returned and the caller
/// must not dispatch the combination.
pub fn invalidate(result_base: &Path) -> LaunchResult<Vec<PathBuf>> {
    let mut removed = Vec::new();

    for dir in cache_dirs(result_base) {
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                obs::emit_cache_removed(&dir);
                removed.push(dir);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(LaunchError::CacheRemoval { path: dir, source }),
        }
    }

    Ok(removed)
}

/// Fail with [`LaunchError::StaleCache`] if any cache directory still exists.
pub fn ensure_cleared(result_base: &Path) -> LaunchResult<()> {
    match cache_dirs(result_base).into_iter().find(|dir| dir.exists()) {
        Some(stale) => Err(LaunchError::StaleCache(stale)),
        None => Ok(()),
    }
}
