//! Scene x modality matrix configuration.
//!
//! A [`LaunchConfig`] is loaded once at process start (defaults, then an
//! optional JSON file, then CLI overrides) and is immutable once handed to
//! the coordinator.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LaunchError, LaunchResult};

/// Canonical training subpath. Only this value triggers the `train` fallback.
pub const DEFAULT_TRAIN_SUBPATH: &str = "subsets/train";

/// Canonical evaluation subpath. Only this value triggers the `test` fallback.
pub const DEFAULT_TEST_SUBPATH: &str = "subsets/test";

/// Built-in scene list, in dispatch order.
pub const DEFAULT_SCENES: [&str; 8] = [
    "ball", "dog", "plant", "mug", "shoe", "teddy", "book", "chair",
];

/// Built-in modality list, in dispatch order.
pub const DEFAULT_MODALITIES: [&str; 2] = ["iphone", "stereo"];

/// One cell of the matrix, with the scene's zero-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combination {
    pub scene_index: usize,
    pub scene: String,
    pub modality: String,
}

/// Process-wide launch configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LaunchConfig {
    /// Root of the capture dataset (`<data_root>/<scene>/<modality>/...`).
    pub data_root: PathBuf,

    /// Root under which per-combination results are written.
    pub result_root: PathBuf,

    /// Directory receiving per-unit log files.
    pub log_dir: PathBuf,

    /// Ordered scene identifiers.
    pub scenes: Vec<String>,

    /// Ordered modality identifiers.
    pub modalities: Vec<String>,

    /// Match token per modality.
    pub match_tokens: BTreeMap<String, String>,

    /// Preferred training subpath below `<scene>/<modality>`.
    pub train_subpath: String,

    /// Preferred evaluation subpath below `<scene>/<modality>`.
    pub test_subpath: String,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        let match_tokens = BTreeMap::from([
            ("iphone".to_string(), "main".to_string()),
            ("stereo".to_string(), "left".to_string()),
        ]);

        Self {
            data_root: PathBuf::from("dataset"),
            result_root: PathBuf::from("results"),
            log_dir: PathBuf::from("logs"),
            scenes: DEFAULT_SCENES.iter().map(|s| s.to_string()).collect(),
            modalities: DEFAULT_MODALITIES.iter().map(|m| m.to_string()).collect(),
            match_tokens,
            train_subpath: DEFAULT_TRAIN_SUBPATH.to_string(),
            test_subpath: DEFAULT_TEST_SUBPATH.to_string(),
        }
    }
}

impl LaunchConfig {
    /// Load a configuration file. Fields absent from the file keep their defaults.
    pub fn from_json_file(path: &Path) -> LaunchResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: LaunchConfig = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Check the matrix is well formed.
    pub fn validate(&self) -> LaunchResult<()> {
        if self.scenes.is_empty() {
            return Err(LaunchError::InvalidConfig("scene list is empty".into()));
        }
        if self.modalities.is_empty() {
            return Err(LaunchError::InvalidConfig("modality list is empty".into()));
        }
        ensure_unique("scene", &self.scenes)?;
        ensure_unique("modality", &self.modalities)?;

        for modality in &self.modalities {
            self.match_token_for(modality)?;
        }
        Ok(())
    }

    /// Match token configured for `modality`.
    pub fn match_token_for(&self, modality: &str) -> LaunchResult<&str> {
        self.match_tokens
            .get(modality)
            .map(String::as_str)
            .ok_or_else(|| LaunchError::MissingMatchToken(modality.to_string()))
    }

    /// All cells of the matrix: outer scene, inner modality.
    pub fn combinations(&self) -> Vec<Combination> {
        self.scenes
            .iter()
            .enumerate()
            .flat_map(|(scene_index, scene)| {
                self.modalities.iter().map(move |modality| Combination {
                    scene_index,
                    scene: scene.clone(),
                    modality: modality.clone(),
                })
            })
            .collect()
    }

    /// `<result_root>/<scene>/<modality>`
    pub fn result_base(&self, scene: &str, modality: &str) -> PathBuf {
        self.result_root.join(scene).join(modality)
    }
}

fn ensure_unique(kind: &str, ids: &[String]) -> LaunchResult<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.is_empty() {
            return Err(LaunchError::InvalidConfig(format!("empty {kind} identifier")));
        }
        if !seen.insert(id.as_str()) {
            return Err(LaunchError::InvalidConfig(format!(
                "duplicate {kind} identifier '{id}'"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LaunchConfig::default();
        config.validate().expect("default config should validate");
        assert_eq!(config.scenes.len(), 8);
        assert_eq!(config.modalities, vec!["iphone", "stereo"]);
        assert_eq!(config.match_token_for("stereo").unwrap(), "left");
    }

    #[test]
    fn test_combinations_outer_scene_inner_modality() {
        let config = LaunchConfig {
            scenes: vec!["ball".into(), "dog".into()],
            ..Default::default()
        };

        let cells: Vec<(usize, String, String)> = config
            .combinations()
            .into_iter()
            .map(|c| (c.scene_index, c.scene, c.modality))
            .collect();

        assert_eq!(
            cells,
            vec![
                (0, "ball".to_string(), "iphone".to_string()),
                (0, "ball".to_string(), "stereo".to_string()),
                (1, "dog".to_string(), "iphone".to_string()),
                (1, "dog".to_string(), "stereo".to_string()),
            ]
        );
    }

    #[test]
    fn test_missing_match_token_rejected() {
        let mut config = LaunchConfig::default();
        config.match_tokens.remove("iphone");

        let err = config.validate().unwrap_err();
        assert!(matches!(err, LaunchError::MissingMatchToken(m) if m == "iphone"));
    }

    #[test]
    fn test_duplicate_scene_rejected() {
        let config = LaunchConfig {
            scenes: vec!["ball".into(), "ball".into()],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LaunchError::InvalidConfig(msg)) if msg.contains("duplicate scene")
        ));
    }

    #[test]
    fn test_empty_modalities_rejected() {
        let config = LaunchConfig {
            modalities: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launch.json");
        std::fs::write(
            &path,
            r#"{ "scenes": ["ball"], "data_root": "/data/captures" }"#,
        )
        .unwrap();

        let config = LaunchConfig::from_json_file(&path).unwrap();
        assert_eq!(config.scenes, vec!["ball"]);
        assert_eq!(config.data_root, PathBuf::from("/data/captures"));
        assert_eq!(config.train_subpath, DEFAULT_TRAIN_SUBPATH);
        assert_eq!(config.modalities.len(), 2);
    }

    #[test]
    fn test_result_base_layout() {
        let config = LaunchConfig {
            result_root: PathBuf::from("/out"),
            ..Default::default()
        };
        assert_eq!(
            config.result_base("ball", "iphone"),
            PathBuf::from("/out/ball/iphone")
        );
    }
}
