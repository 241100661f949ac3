//! Regeneration of test-to-train alignment transforms.
//!
//! Existing results are scanned for
//! `<results>/<scene>/<modality>/<variant>/alignments/test_to_train.npz`.
//! Each hit is recomputed by an external script from the dataset's flat
//! `train/` and `test/` trees, optionally keeping a backup of the old file.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{LaunchError, LaunchResult};

/// Relative location of the transform inside a variant directory.
pub const ALIGNMENT_FILE: &str = "alignments/test_to_train.npz";

/// Variant config carrying `test_every`.
pub const VARIANT_CONFIG: &str = "cfg.yml";

/// Cadence assumed when the variant config does not state one.
pub const DEFAULT_TEST_EVERY: u32 = 8;

/// One alignment transform found under the results tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentRecord {
    pub path: PathBuf,
    pub scene: String,
    pub modality: String,
    pub variant: String,
    pub test_every: u32,
}

impl AlignmentRecord {
    pub fn label(&self) -> String {
        format!("{}/{}/{}", self.scene, self.modality, self.variant)
    }

    /// Where the previous transform is kept: `test_to_train.npz.old`.
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".old");
        PathBuf::from(name)
    }
}

/// Scan `results_dir` for alignment transforms of the given modalities.
///
/// Variants without a `cfg.yml` are skipped with a warning. Output is sorted
/// by path.
pub fn find_alignments(
    results_dir: &Path,
    modalities: &[String],
) -> LaunchResult<Vec<AlignmentRecord>> {
    let mut records = Vec::new();

    for scene_dir in sorted_subdirs(results_dir)? {
        let scene = dir_name(&scene_dir);

        for modality in modalities {
            let modality_dir = scene_dir.join(modality);
            if !modality_dir.is_dir() {
                continue;
            }

            for variant_dir in sorted_subdirs(&modality_dir)? {
                let alignment = variant_dir.join(ALIGNMENT_FILE);
                if !alignment.is_file() {
                    continue;
                }

                let cfg = variant_dir.join(VARIANT_CONFIG);
                if !cfg.is_file() {
                    warn!(config = %cfg.display(), "Variant config not found, skipping");
                    continue;
                }
                let test_every = read_test_every(&cfg)?;

                records.push(AlignmentRecord {
                    path: alignment,
                    scene: scene.clone(),
                    modality: modality.clone(),
                    variant: dir_name(&variant_dir),
                    test_every,
                });
            }
        }
    }

    records.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(records)
}

/// Keep only records for `scenes`. An empty list keeps everything.
pub fn filter_scenes(records: Vec<AlignmentRecord>, scenes: &[String]) -> Vec<AlignmentRecord> {
    if scenes.is_empty() {
        return records;
    }
    records
        .into_iter()
        .filter(|r| scenes.iter().any(|s| s == &r.scene))
        .collect()
}

/// Parse `test_every:` from a variant config. Falls back to
/// [`DEFAULT_TEST_EVERY`] when the key is missing or not an integer.
pub fn read_test_every(cfg: &Path) -> LaunchResult<u32> {
    let raw = std::fs::read_to_string(cfg)?;
    Ok(parse_test_every(&raw))
}

fn parse_test_every(raw: &str) -> u32 {
    raw.lines()
        .filter_map(|line| line.trim().strip_prefix("test_every:"))
        .find_map(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(DEFAULT_TEST_EVERY)
}

/// Settings for recomputing transforms.
#[derive(Debug, Clone)]
pub struct AlignmentJob {
    /// Dataset root holding `<scene>/<modality>/{train,test}`.
    pub dataset_dir: PathBuf,
    /// Script computing one transform.
    pub compute_script: PathBuf,
    /// Interpreter used to run the script.
    pub python: String,
    /// Test cadence of the eval dataset parser.
    pub eval_test_every: u32,
    pub backup: bool,
    pub dry_run: bool,
}

/// Counts from a regeneration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<String>,
}

impl AlignmentReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

impl AlignmentJob {
    pub fn new(dataset_dir: impl Into<PathBuf>, compute_script: impl Into<PathBuf>) -> Self {
        Self {
            dataset_dir: dataset_dir.into(),
            compute_script: compute_script.into(),
            python: "python3".to_string(),
            eval_test_every: 1,
            backup: true,
            dry_run: false,
        }
    }

    /// Check the compute script exists before doing any work.
    pub fn validate(&self) -> LaunchResult<()> {
        if !self.compute_script.is_file() {
            return Err(LaunchError::Alignment(format!(
                "compute script not found: {}",
                self.compute_script.display()
            )));
        }
        Ok(())
    }

    /// Script arguments for one record.
    pub fn command_args(&self, record: &AlignmentRecord) -> Vec<String> {
        let (train_dir, test_dir) = self.dataset_dirs(record);
        vec![
            self.compute_script.to_string_lossy().into_owned(),
            "--train-dir".to_string(),
            train_dir.to_string_lossy().into_owned(),
            "--subset-dir".to_string(),
            test_dir.to_string_lossy().into_owned(),
            "--train-test-every".to_string(),
            record.test_every.to_string(),
            "--eval-test-every".to_string(),
            self.eval_test_every.to_string(),
            "--output".to_string(),
            record.path.to_string_lossy().into_owned(),
        ]
    }

    fn dataset_dirs(&self, record: &AlignmentRecord) -> (PathBuf, PathBuf) {
        let base = self.dataset_dir.join(&record.scene).join(&record.modality);
        (base.join("train"), base.join("test"))
    }

    /// Recompute one transform. `Ok(false)` means this record failed but the
    /// pass may continue.
    pub async fn regenerate(&self, record: &AlignmentRecord) -> LaunchResult<bool> {
        let (train_dir, test_dir) = self.dataset_dirs(record);
        if !train_dir.is_dir() {
            warn!(alignment = %record.label(), dir = %train_dir.display(), "Train dir not found");
            return Ok(false);
        }
        if !test_dir.is_dir() {
            warn!(alignment = %record.label(), dir = %test_dir.display(), "Test dir not found");
            return Ok(false);
        }

        if self.backup && !self.dry_run && record.path.exists() {
            let backup = record.backup_path();
            std::fs::copy(&record.path, &backup)?;
            info!(alignment = %record.label(), backup = %backup.display(), "Backed up transform");
        }

        let args = self.command_args(record);
        if self.dry_run {
            info!(alignment = %record.label(), args = ?args, "Dry run, not regenerating");
            return Ok(true);
        }

        let output = Command::new(&self.python)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                LaunchError::Alignment(format!("could not run '{}': {}", self.python, e))
            })?;

        if output.status.success() {
            info!(alignment = %record.label(), "Regenerated transform");
            Ok(true)
        } else {
            warn!(
                alignment = %record.label(),
                exit_code = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Regeneration failed"
            );
            Ok(false)
        }
    }

    /// Regenerate every record in order.
    pub async fn regenerate_all(&self, records: &[AlignmentRecord]) -> LaunchResult<AlignmentReport> {
        let mut report = AlignmentReport::default();
        for record in records {
            if self.regenerate(record).await? {
                report.succeeded += 1;
            } else {
                report.failed += 1;
                report.failures.push(record.label());
            }
        }
        Ok(report)
    }
}

fn sorted_subdirs(dir: &Path) -> LaunchResult<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
