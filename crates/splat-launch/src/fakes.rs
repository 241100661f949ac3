//! In-memory submission backend (testing only).
//!
//! [`RecordingSubmitter`] satisfies the [`JobSubmitter`] contract without a
//! cluster: it records every run and hands out sequential job ids.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cache;
use crate::dispatch::{JobId, JobSubmitter};
use crate::error::SubmitError;
use crate::run_spec::RunSpec;

/// One recorded submission.
#[derive(Debug, Clone)]
pub struct RecordedSubmission {
    pub spec: RunSpec,
    /// Whether any covisible cache directory existed at submission time.
    pub cache_present: bool,
}

#[derive(Debug, Default)]
pub struct RecordingSubmitter {
    submissions: Mutex<Vec<RecordedSubmission>>,
    reject_scenes: HashSet<String>,
}

impl RecordingSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every submission for `scene`.
    pub fn rejecting(mut self, scene: &str) -> Self {
        self.reject_scenes.insert(scene.to_string());
        self
    }

    pub fn submissions(&self) -> Vec<RecordedSubmission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn submitted_labels(&self) -> Vec<String> {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.spec.label())
            .collect()
    }
}

#[async_trait]
impl JobSubmitter for RecordingSubmitter {
    async fn submit(&self, spec: &RunSpec) -> Result<JobId, SubmitError> {
        if self.reject_scenes.contains(&spec.scene) {
            return Err(SubmitError::Other(format!(
                "queue refused {}",
                spec.label()
            )));
        }

        let cache_present = cache::ensure_cleared(&spec.result_base).is_err();
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(RecordedSubmission {
            spec: spec.clone(),
            cache_present,
        });
        Ok(JobId(format!("fake-{}", submissions.len())))
    }
}
