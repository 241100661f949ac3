//! Batch coordination over the scene x modality matrix.
//!
//! For every combination, in order: resolve -> gate -> invalidate -> build
//! [`RunSpec`] -> dispatch. Rejections and per-combination failures are
//! recorded and the batch moves on.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::cache;
use crate::dispatch::{JobId, JobSubmitter, LaunchedUnit, UnitLauncher};
use crate::error::LaunchResult;
use crate::gate::{Admission, RunGate};
use crate::matrix::{Combination, LaunchConfig};
use crate::obs;
use crate::resolver::{self, PathSet};
use crate::run_spec::RunSpec;

/// Which backend drove the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    /// Queued cluster submission.
    Train,
    /// Local supervised units.
    Eval,
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flow::Train => write!(f, "train"),
            Flow::Eval => write!(f, "eval"),
        }
    }
}

/// What happened to one combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Accepted by the queue.
    Submitted { job_id: JobId },
    /// Unit ran to completion (successfully or not).
    Launched {
        exit_code: Option<i32>,
        success: bool,
    },
    /// Rejected by the gate.
    Skipped { reason: String },
    /// Cache invalidation or dispatch failed.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinationOutcome {
    pub scene: String,
    pub modality: String,
    pub outcome: Outcome,
}

/// Aggregated result of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub flow: Flow,
    pub outcomes: Vec<CombinationOutcome>,
    pub log_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchSummary {
    /// Combinations handed to a backend.
    pub fn submitted_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o.outcome,
                    Outcome::Submitted { .. } | Outcome::Launched { .. }
                )
            })
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Skipped { .. }))
            .count()
    }

    /// Combinations that never reached a backend because of an error.
    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Failed { .. }))
            .count()
    }

    /// Supervised units that exited unsuccessfully.
    pub fn unit_failures(&self) -> Vec<&CombinationOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Launched { success: false, .. }))
            .collect()
    }

    /// Pattern under which per-run logs can be found.
    pub fn log_pattern(&self) -> String {
        let file = match self.flow {
            Flow::Train => "slurm-<job_id>.out",
            Flow::Eval => "<scene>_<modality>.log",
        };
        self.log_dir.join(file).display().to_string()
    }

    /// One-line completion message.
    pub fn summary_line(&self) -> String {
        format!(
            "[{}] {} dispatched, {} skipped, {} failed; logs: {}",
            self.flow,
            self.submitted_count(),
            self.skipped_count(),
            self.failed_count(),
            self.log_pattern()
        )
    }
}

/// Side-effect-free admission decision for one combination.
#[derive(Debug, Clone)]
pub struct PlannedCombination {
    pub combination: Combination,
    pub paths: PathSet,
    pub admission: Admission,
}

/// Drives a batch over an immutable [`LaunchConfig`].
pub struct BatchCoordinator {
    config: LaunchConfig,
}

impl BatchCoordinator {
    /// Validate and take ownership of the configuration.
    pub fn new(config: LaunchConfig) -> LaunchResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Resolve and gate every combination without touching the filesystem.
    pub fn plan(&self) -> Vec<PlannedCombination> {
        self.config
            .combinations()
            .into_iter()
            .map(|combination| {
                let paths = self.resolve(&combination);
                let admission = RunGate::evaluate(&paths);
                PlannedCombination {
                    combination,
                    paths,
                    admission,
                }
            })
            .collect()
    }

    /// Submit every admitted combination to a queue, one after another.
    pub async fn run_queued(&self, submitter: &dyn JobSubmitter) -> LaunchResult<BatchSummary> {
        self.queued_batch(submitter)
            .instrument(obs::batch_span("train"))
            .await
    }

    /// Launch every admitted combination as a background unit, then wait for
    /// all of them. A failing unit does not affect its siblings.
    pub async fn run_supervised(&self, launcher: &UnitLauncher) -> LaunchResult<BatchSummary> {
        self.supervised_batch(launcher)
            .instrument(obs::batch_span("eval"))
            .await
    }

    async fn queued_batch(&self, submitter: &dyn JobSubmitter) -> LaunchResult<BatchSummary> {
        let started_at = Utc::now();
        let combinations = self.config.combinations();
        self.create_log_dir()?;
        obs::emit_batch_started("train", combinations.len(), &self.config.log_dir);

        let mut outcomes = Vec::with_capacity(combinations.len());
        for combination in combinations {
            let outcome = match self.prepare(&combination) {
                Ok(spec) => match submitter.submit(&spec).await {
                    Ok(job_id) => {
                        obs::emit_combination_dispatched(&spec.label(), job_id.as_str());
                        Outcome::Submitted { job_id }
                    }
                    Err(e) => {
                        obs::emit_combination_failed(&spec.label(), &e);
                        Outcome::Failed {
                            reason: e.to_string(),
                        }
                    }
                },
                Err(outcome) => outcome,
            };
            outcomes.push(CombinationOutcome {
                scene: combination.scene,
                modality: combination.modality,
                outcome,
            });
        }

        Ok(self.finish(Flow::Train, outcomes, started_at))
    }

    async fn supervised_batch(&self, launcher: &UnitLauncher) -> LaunchResult<BatchSummary> {
        let started_at = Utc::now();
        let combinations = self.config.combinations();
        self.create_log_dir()?;
        obs::emit_batch_started("eval", combinations.len(), &self.config.log_dir);

        let mut slots: Vec<Option<Outcome>> = vec![None; combinations.len()];
        let mut units: Vec<(usize, LaunchedUnit)> = Vec::new();

        for (idx, combination) in combinations.iter().enumerate() {
            let spec = match self.prepare(combination) {
                Ok(spec) => spec,
                Err(outcome) => {
                    slots[idx] = Some(outcome);
                    continue;
                }
            };

            match launcher.launch(
                &spec,
                &self.config.data_root,
                &self.config.result_root,
                &self.config.log_dir,
            ) {
                Ok(unit) => {
                    obs::emit_combination_dispatched(
                        &spec.label(),
                        &unit.log_path.display().to_string(),
                    );
                    units.push((idx, unit));
                }
                Err(e) => {
                    obs::emit_combination_failed(&spec.label(), &e);
                    slots[idx] = Some(Outcome::Failed {
                        reason: e.to_string(),
                    });
                }
            }
        }

        let mut join_set = JoinSet::new();
        for (idx, unit) in units {
            join_set.spawn(async move { (idx, unit.wait().await) });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, exit)) => {
                    obs::emit_unit_finished(&exit.label, exit.exit_code, exit.success);
                    slots[idx] = Some(Outcome::Launched {
                        exit_code: exit.exit_code,
                        success: exit.success,
                    });
                }
                Err(e) => tracing::warn!(error = %e, "Unit wait task did not complete"),
            }
        }

        let outcomes = combinations
            .into_iter()
            .zip(slots)
            .map(|(combination, slot)| CombinationOutcome {
                scene: combination.scene,
                modality: combination.modality,
                outcome: slot.unwrap_or_else(|| Outcome::Failed {
                    reason: "unit wait task aborted".to_string(),
                }),
            })
            .collect();

        Ok(self.finish(Flow::Eval, outcomes, started_at))
    }

    fn resolve(&self, combination: &Combination) -> PathSet {
        resolver::resolve(
            &combination.scene,
            &combination.modality,
            &self.config.train_subpath,
            &self.config.test_subpath,
            &self.config.data_root,
        )
    }

    /// Resolve, gate and invalidate. `Err` carries the terminal outcome for a
    /// combination that must not be dispatched.
    fn prepare(&self, combination: &Combination) -> Result<RunSpec, Outcome> {
        let paths = self.resolve(combination);

        let admission = RunGate::admit(&paths);
        if !admission.admitted {
            return Err(Outcome::Skipped {
                reason: admission.reason,
            });
        }

        let label = format!("{}/{}", combination.scene, combination.modality);
        let match_token = match self.config.match_token_for(&combination.modality) {
            Ok(token) => token,
            Err(e) => return Err(failed_outcome(&label, &e)),
        };
        let spec = RunSpec::new(&self.config, combination.scene_index, paths, match_token);

        if let Err(e) = cache::invalidate(&spec.result_base) {
            return Err(failed_outcome(&label, &e));
        }
        Ok(spec)
    }

    fn create_log_dir(&self) -> LaunchResult<()> {
        std::fs::create_dir_all(&self.config.log_dir)?;
        Ok(())
    }

    fn finish(
        &self,
        flow: Flow,
        outcomes: Vec<CombinationOutcome>,
        started_at: DateTime<Utc>,
    ) -> BatchSummary {
        let summary = BatchSummary {
            flow,
            outcomes,
            log_dir: self.config.log_dir.clone(),
            started_at,
            finished_at: Utc::now(),
        };
        obs::emit_batch_finished(
            &flow.to_string(),
            summary.submitted_count(),
            summary.skipped_count(),
            summary.failed_count(),
        );
        summary
    }
}

fn failed_outcome(label: &str, error: &dyn fmt::Display) -> Outcome {
    obs::emit_combination_failed(label, error);
    Outcome::Failed {
        reason: error.to_string(),
    }
}
