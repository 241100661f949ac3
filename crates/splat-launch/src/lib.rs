//! splat-launch - batch orchestration for splatting train/eval runs
//!
//! Drives a fixed scene x modality matrix onto an execution backend:
//! - Resolves each combination's train/eval directories, with layout fallback
//! - Gates combinations whose input tree is incomplete
//! - Clears stale covisible caches before every dispatch
//! - Submits to a cluster queue (`sbatch`) or runs supervised local units
//!
//! Alignment regeneration for existing results lives in [`alignment`].

pub mod alignment;
pub mod cache;
pub mod coordinator;
pub mod dispatch;
mod error;
pub mod fakes;
pub mod gate;
pub mod matrix;
pub mod obs;
pub mod resolver;
pub mod run_spec;
pub mod telemetry;

pub use alignment::{AlignmentJob, AlignmentRecord, AlignmentReport};
pub use coordinator::{
    BatchCoordinator, BatchSummary, CombinationOutcome, Flow, Outcome, PlannedCombination,
};
pub use dispatch::{JobId, JobSubmitter, SbatchSubmitter, UnitExit, UnitFlags, UnitLauncher};
pub use error::{LaunchError, LaunchResult, SubmitError};
pub use gate::{Admission, RunGate};
pub use matrix::{Combination, LaunchConfig};
pub use resolver::{resolve, PathSet};
pub use run_spec::RunSpec;
pub use telemetry::init_tracing;

/// splat-launch version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
