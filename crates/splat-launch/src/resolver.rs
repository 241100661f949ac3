//! Train/eval directory resolution with layout fallback.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::matrix::{DEFAULT_TEST_SUBPATH, DEFAULT_TRAIN_SUBPATH};

/// Flat training layout used when `subsets/train` is absent.
pub const FALLBACK_TRAIN_DIR: &str = "train";

/// Flat evaluation layout used when `subsets/test` is absent.
pub const FALLBACK_TEST_DIR: &str = "test";

/// Resolved input directories for one (scene, modality).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSet {
    pub scene: String,
    pub modality: String,
    pub train_dir: PathBuf,
    pub eval_dir: PathBuf,
}

/// Resolve the train and eval directories for a combination.
///
/// The preferred subpath is used unless it is the canonical default *and* is
/// missing on disk, in which case the flat `train`/`test` directory is used if
/// it exists. Custom subpaths are never substituted.
pub fn resolve(
    scene: &str,
    modality: &str,
    train_subpath: &str,
    test_subpath: &str,
    data_root: &Path,
) -> PathSet {
    let base = data_root.join(scene).join(modality);

    let train_dir = pick_dir(
        &base,
        train_subpath,
        DEFAULT_TRAIN_SUBPATH,
        FALLBACK_TRAIN_DIR,
    );
    let eval_dir = pick_dir(&base, test_subpath, DEFAULT_TEST_SUBPATH, FALLBACK_TEST_DIR);

    PathSet {
        scene: scene.to_string(),
        modality: modality.to_string(),
        train_dir,
        eval_dir,
    }
}

fn pick_dir(base: &Path, preferred: &str, canonical: &str, fallback: &str) -> PathBuf {
    let preferred_dir = base.join(preferred);
    if preferred != canonical || preferred_dir.is_dir() {
        return preferred_dir;
    }

    let alternate = base.join(fallback);
    if alternate.is_dir() {
        info!(
            event = "resolve.fallback",
            preferred = %preferred_dir.display(),
            using = %alternate.display(),
        );
        alternate
    } else {
        preferred_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_canonical_train_falls_back_to_flat_layout() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ball/iphone/train")).unwrap();

        let paths = resolve(
            "ball",
            "iphone",
            DEFAULT_TRAIN_SUBPATH,
            DEFAULT_TEST_SUBPATH,
            dir.path(),
        );

        assert_eq!(paths.train_dir, dir.path().join("ball/iphone/train"));
    }

    #[test]
    fn test_preferred_layout_wins_when_present() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ball/iphone/subsets/train")).unwrap();
        fs::create_dir_all(dir.path().join("ball/iphone/train")).unwrap();

        let paths = resolve(
            "ball",
            "iphone",
            DEFAULT_TRAIN_SUBPATH,
            DEFAULT_TEST_SUBPATH,
            dir.path(),
        );

        assert_eq!(paths.train_dir, dir.path().join("ball/iphone/subsets/train"));
    }

    #[test]
    fn test_custom_subpath_never_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ball/iphone/train")).unwrap();
        fs::create_dir_all(dir.path().join("ball/iphone/test")).unwrap();

        let paths = resolve("ball", "iphone", "subsets/train_x4", "holdout", dir.path());

        assert_eq!(
            paths.train_dir,
            dir.path().join("ball/iphone/subsets/train_x4")
        );
        assert_eq!(paths.eval_dir, dir.path().join("ball/iphone/holdout"));
        assert!(!paths.train_dir.exists());
    }

    #[test]
    fn test_missing_everything_keeps_preferred_path() {
        let dir = tempfile::tempdir().unwrap();

        let paths = resolve(
            "dog",
            "stereo",
            DEFAULT_TRAIN_SUBPATH,
            DEFAULT_TEST_SUBPATH,
            dir.path(),
        );

        assert_eq!(paths.train_dir, dir.path().join("dog/stereo/subsets/train"));
        assert_eq!(paths.eval_dir, dir.path().join("dog/stereo/subsets/test"));
    }

    #[test]
    fn test_eval_fallback_is_independent_of_train() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ball/iphone/subsets/train")).unwrap();
        fs::create_dir_all(dir.path().join("ball/iphone/test")).unwrap();

        let paths = resolve(
            "ball",
            "iphone",
            DEFAULT_TRAIN_SUBPATH,
            DEFAULT_TEST_SUBPATH,
            dir.path(),
        );

        assert_eq!(paths.train_dir, dir.path().join("ball/iphone/subsets/train"));
        assert_eq!(paths.eval_dir, dir.path().join("ball/iphone/test"));
    }

    #[test]
    fn test_fallback_ignores_plain_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ball/iphone")).unwrap();
        fs::write(dir.path().join("ball/iphone/train"), b"not a dir").unwrap();

        let paths = resolve(
            "ball",
            "iphone",
            DEFAULT_TRAIN_SUBPATH,
            DEFAULT_TEST_SUBPATH,
            dir.path(),
        );

        assert_eq!(paths.train_dir, dir.path().join("ball/iphone/subsets/train"));
    }
}
