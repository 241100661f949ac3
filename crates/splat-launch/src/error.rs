//! Error types for splat-launch.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while planning or dispatching a batch.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The launch configuration is unusable.
    #[error("invalid launch configuration: {0}")]
    InvalidConfig(String),

    /// A modality has no match token configured.
    #[error("no match token configured for modality '{0}'")]
    MissingMatchToken(String),

    /// Removing a derived cache directory failed for a reason other than absence.
    #[error("failed to remove cache directory {path}: {source}")]
    CacheRemoval {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A covisible cache directory survived invalidation.
    #[error("stale cache directory still present before launch: {0}")]
    StaleCache(PathBuf),

    /// The queued backend rejected or failed a submission.
    #[error("submission failed: {0}")]
    Submit(#[from] SubmitError),

    /// A supervised unit could not be started.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Opening or creating a per-unit log file failed.
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Alignment regeneration could not proceed.
    #[error("alignment regeneration failed: {0}")]
    Alignment(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from the queued submission backend.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The submission command could not be executed at all.
    #[error("could not run '{program}': {reason}")]
    CommandUnavailable { program: String, reason: String },

    /// The scheduler refused the job.
    #[error("scheduler rejected job (exit code {exit_code}): {stderr}")]
    Rejected { exit_code: i32, stderr: String },

    /// The scheduler accepted the call but returned no usable job id.
    #[error("unrecognised scheduler acknowledgement: {0:?}")]
    UnparsedAck(String),

    /// Rejection injected by a test backend.
    #[error("{0}")]
    Other(String),
}

/// Result type for launch operations.
pub type LaunchResult<T> = std::result::Result<T, LaunchError>;
