//! Execution backends.
//!
//! - [`queued`]: one fire-and-forget job per combination on a cluster queue.
//! - [`supervised`]: one local background process per combination, joined
//!   by the coordinator.

pub mod queued;
pub mod supervised;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SubmitError;
use crate::run_spec::RunSpec;

pub use queued::SbatchSubmitter;
pub use supervised::{LaunchedUnit, UnitExit, UnitFlags, UnitLauncher};

/// Identifier returned by a queueing backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thin client over an external job queue.
///
/// `submit` returns once the queue has acknowledged the job; it never waits
/// for the job to run. Retry and requeue are the queue's concern.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    /// Enqueue one run.
    async fn submit(&self, spec: &RunSpec) -> Result<JobId, SubmitError>;
}
