//! Admission gate: a combination runs only if its input tree is complete.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::obs;
use crate::resolver::PathSet;

/// Reason recorded when the training directory is absent.
pub const MISSING_TRAIN_DIR: &str = "missing training dir";

/// Reason recorded when the eval tree lacks `images/` or `sparse/`.
pub const MISSING_EVAL_TREE: &str = "missing images/ or sparse/";

/// Admission verdict for one combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    /// Whether the combination may be dispatched.
    pub admitted: bool,

    /// Failure reason (empty when admitted).
    pub reason: String,

    /// Path that failed the check, if any.
    pub offending_path: Option<PathBuf>,
}

impl Admission {
    fn admitted() -> Self {
        Self {
            admitted: true,
            reason: String::new(),
            offending_path: None,
        }
    }

    fn rejected(reason: &str, path: PathBuf) -> Self {
        Self {
            admitted: false,
            reason: reason.to_string(),
            offending_path: Some(path),
        }
    }
}

/// Admission rules.
pub struct RunGate;

impl RunGate {
    /// Evaluate the rules in order; the first failure wins.
    ///
    /// 1. `train_dir` is a directory.
    /// 2. `eval_dir/images` and `eval_dir/sparse` are both directories.
    pub fn evaluate(paths: &PathSet) -> Admission {
        if !paths.train_dir.is_dir() {
            return Admission::rejected(MISSING_TRAIN_DIR, paths.train_dir.clone());
        }

        for required in ["images", "sparse"] {
            let dir = paths.eval_dir.join(required);
            if !dir.is_dir() {
                return Admission::rejected(MISSING_EVAL_TREE, dir);
            }
        }

        Admission::admitted()
    }

    /// Evaluate and, on rejection, emit a diagnostic naming the combination
    /// and the offending path.
    pub fn admit(paths: &PathSet) -> Admission {
        let admission = Self::evaluate(paths);
        if !admission.admitted {
            let offending = admission
                .offending_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            obs::emit_combination_skipped(
                &paths.scene,
                &paths.modality,
                &admission.reason,
                &offending,
            );
        }
        admission
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn path_set(root: &Path) -> PathSet {
        PathSet {
            scene: "ball".to_string(),
            modality: "iphone".to_string(),
            train_dir: root.join("train"),
            eval_dir: root.join("test"),
        }
    }

    #[test]
    fn test_complete_tree_admitted() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("train")).unwrap();
        fs::create_dir_all(dir.path().join("test/images")).unwrap();
        fs::create_dir_all(dir.path().join("test/sparse")).unwrap();

        let admission = RunGate::admit(&path_set(dir.path()));
        assert!(admission.admitted);
        assert!(admission.reason.is_empty());
        assert!(admission.offending_path.is_none());
    }

    #[test]
    fn test_missing_train_dir_wins() {
        let dir = tempfile::tempdir().unwrap();

        let admission = RunGate::admit(&path_set(dir.path()));
        assert!(!admission.admitted);
        assert_eq!(admission.reason, MISSING_TRAIN_DIR);
        assert_eq!(admission.offending_path, Some(dir.path().join("train")));
    }

    #[test]
    fn test_missing_sparse_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("train")).unwrap();
        fs::create_dir_all(dir.path().join("test/images")).unwrap();

        let admission = RunGate::admit(&path_set(dir.path()));
        assert!(!admission.admitted);
        assert_eq!(admission.reason, MISSING_EVAL_TREE);
        assert_eq!(
            admission.offending_path,
            Some(dir.path().join("test/sparse"))
        );
    }

    #[test]
    fn test_missing_images_rejected_even_without_train() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("test/sparse")).unwrap();

        let admission = RunGate::evaluate(&path_set(dir.path()));
        assert!(!admission.admitted);
    }

    #[test]
    fn test_missing_images_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("train")).unwrap();
        fs::create_dir_all(dir.path().join("test/sparse")).unwrap();

        let admission = RunGate::evaluate(&path_set(dir.path()));
        assert!(!admission.admitted);
        assert_eq!(admission.reason, MISSING_EVAL_TREE);
        assert_eq!(
            admission.offending_path,
            Some(dir.path().join("test/images"))
        );
    }
}
