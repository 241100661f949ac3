//! The unit of dispatch.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::matrix::LaunchConfig;
use crate::resolver::PathSet;

/// A fully resolved, admitted description of one run.
///
/// Only built by the coordinator for combinations that passed the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    /// Zero-based position of the scene in the configured scene list.
    pub scene_index: usize,
    pub scene: String,
    pub modality: String,
    pub train_dir: PathBuf,
    pub eval_dir: PathBuf,
    pub match_token: String,
    /// `<result_root>/<scene>/<modality>`
    pub result_base: PathBuf,
}

impl RunSpec {
    pub(crate) fn new(
        config: &LaunchConfig,
        scene_index: usize,
        paths: PathSet,
        match_token: &str,
    ) -> Self {
        let result_base = config.result_base(&paths.scene, &paths.modality);
        Self {
            scene_index,
            scene: paths.scene,
            modality: paths.modality,
            train_dir: paths.train_dir,
            eval_dir: paths.eval_dir,
            match_token: match_token.to_string(),
            result_base,
        }
    }

    /// `scene/modality`, used as a label in logs and summaries.
    pub fn label(&self) -> String {
        format!("{}/{}", self.scene, self.modality)
    }
}
