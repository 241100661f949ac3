//! Local supervised backend: one background process per combination.
//!
//! Each unit gets its own environment overlay and its own log file; units
//! share no state, so they run without any coordination beyond a final join.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::cache;
use crate::error::{LaunchError, LaunchResult};
use crate::run_spec::RunSpec;

/// Zero-based scene index of the unit.
pub const ENV_SCENE_IDX: &str = "SCENE_IDX";
/// Modality processed by the unit.
pub const ENV_MODALITY: &str = "MODALITY";
/// `1` to regenerate alignment transforms instead of reusing them.
pub const ENV_FORCE_REGEN_ALIGNMENT: &str = "FORCE_REGEN_ALIGNMENT";
/// `1` to read covisibility from an external cache.
pub const ENV_USE_EXTERNAL_COVISIBLE: &str = "USE_EXTERNAL_COVISIBLE";
/// Search path for auxiliary code.
pub const ENV_PYTHONPATH: &str = "PYTHONPATH";

/// Feature flags forwarded to every unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFlags {
    pub force_regen_alignment: bool,
    pub use_external_covisible: bool,
}

/// Spawns evaluation units.
///
/// Invocation: `<program> [args_prefix..] <data_root> <result_root>`
#[derive(Debug, Clone)]
pub struct UnitLauncher {
    pub program: String,
    pub args_prefix: Vec<String>,
    /// Prepended to the inherited `PYTHONPATH`.
    pub python_path: Option<PathBuf>,
    pub flags: UnitFlags,
}

/// A unit that has been started but not yet joined.
#[derive(Debug)]
pub struct LaunchedUnit {
    pub label: String,
    pub log_path: PathBuf,
    child: Child,
}

/// Final state of a joined unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitExit {
    pub label: String,
    pub log_path: PathBuf,
    /// `None` when the process was killed by a signal or could not be waited on.
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl UnitLauncher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args_prefix: Vec::new(),
            python_path: None,
            flags: UnitFlags::default(),
        }
    }

    /// Log file for a unit: `<log_dir>/<scene>_<modality>.log`.
    pub fn log_path(log_dir: &Path, spec: &RunSpec) -> PathBuf {
        log_dir.join(format!("{}_{}.log", spec.scene, spec.modality))
    }

    /// Environment overlay applied on top of the inherited environment.
    pub fn environment(&self, spec: &RunSpec) -> Vec<(String, OsString)> {
        let mut env = vec![
            (ENV_SCENE_IDX.to_string(), spec.scene_index.to_string().into()),
            (ENV_MODALITY.to_string(), spec.modality.clone().into()),
            (
                ENV_FORCE_REGEN_ALIGNMENT.to_string(),
                flag(self.flags.force_regen_alignment).into(),
            ),
            (
                ENV_USE_EXTERNAL_COVISIBLE.to_string(),
                flag(self.flags.use_external_covisible).into(),
            ),
        ];

        if let Some(extra) = &self.python_path {
            let inherited = std::env::var_os(ENV_PYTHONPATH);
            env.push((
                ENV_PYTHONPATH.to_string(),
                prepend_search_path(extra, inherited.as_deref()),
            ));
        }
        env
    }

    /// Start one unit without waiting for it.
    ///
    /// Re-checks that the combination's covisible cache is gone immediately
    /// before spawning; a leftover directory aborts this unit.
    pub fn launch(
        &self,
        spec: &RunSpec,
        data_root: &Path,
        result_root: &Path,
        log_dir: &Path,
    ) -> LaunchResult<LaunchedUnit> {
        cache::ensure_cleared(&spec.result_base)?;

        let log_path = Self::log_path(log_dir, spec);
        let stdout = open_log(&log_path, spec)?;
        let stderr = stdout.try_clone().map_err(|source| LaunchError::LogFile {
            path: log_path.clone(),
            source,
        })?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args_prefix)
            .arg(data_root)
            .arg(result_root)
            .envs(self.environment(spec))
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        let child = command.spawn().map_err(|source| LaunchError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        debug!(unit = %spec.label(), pid = ?child.id(), log = %log_path.display(), "Unit started");

        Ok(LaunchedUnit {
            label: spec.label(),
            log_path,
            child,
        })
    }
}

impl LaunchedUnit {
    /// Wait for the unit to exit. Never fails: a wait error is reported as
    /// an unsuccessful exit without a code.
    pub async fn wait(mut self) -> UnitExit {
        let status = self.child.wait().await;
        let (exit_code, success) = match status {
            Ok(status) => (status.code(), status.success()),
            Err(e) => {
                tracing::warn!(unit = %self.label, error = %e, "Failed to wait on unit");
                (None, false)
            }
        };

        UnitExit {
            label: self.label,
            log_path: self.log_path,
            exit_code,
            success,
        }
    }
}

fn flag(on: bool) -> &'static str {
    if on {
        "1"
    } else {
        "0"
    }
}

/// `extra` followed by the non-empty entries of `inherited`. An empty entry
/// would put the working directory on the search path.
fn prepend_search_path(extra: &Path, inherited: Option<&OsStr>) -> OsString {
    let mut paths = vec![extra.to_path_buf()];
    if let Some(inherited) = inherited {
        paths.extend(
            std::env::split_paths(inherited).filter(|p| !p.as_os_str().is_empty()),
        );
    }
    std::env::join_paths(paths).unwrap_or_else(|_| extra.as_os_str().to_os_string())
}

fn open_log(path: &Path, spec: &RunSpec) -> LaunchResult<File> {
    let wrap = |source| LaunchError::LogFile {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::create(path).map_err(wrap)?;
    writeln!(
        file,
        "# {} launched at {} (scene index {})",
        spec.label(),
        Utc::now().to_rfc3339(),
        spec.scene_index
    )
    .map_err(wrap)?;
    Ok(file)
}
