//! Slurm `sbatch` submission backend.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{JobId, JobSubmitter};
use crate::error::SubmitError;
use crate::run_spec::RunSpec;

const ACK_PREFIX: &str = "Submitted batch job";

/// Submits each run as a requeueable batch job.
///
/// Invocation: `<program> --requeue [extra_args..] <script> <train_dir> <match_token> <eval_dir>`
#[derive(Debug, Clone)]
pub struct SbatchSubmitter {
    /// Submission command (normally `sbatch`).
    pub program: String,

    /// Batch script that runs training + evaluation.
    pub script: PathBuf,

    /// Extra scheduler options placed before the script (partition, gres, ...).
    pub extra_args: Vec<String>,
}

impl SbatchSubmitter {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            program: "sbatch".to_string(),
            script: script.into(),
            extra_args: Vec::new(),
        }
    }

    /// Full argument list for one submission.
    pub fn command_args(&self, spec: &RunSpec) -> Vec<String> {
        let mut args = vec!["--requeue".to_string()];
        args.extend(self.extra_args.iter().cloned());
        args.push(self.script.to_string_lossy().into_owned());
        args.push(spec.train_dir.to_string_lossy().into_owned());
        args.push(spec.match_token.clone());
        args.push(spec.eval_dir.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl JobSubmitter for SbatchSubmitter {
    async fn submit(&self, spec: &RunSpec) -> Result<JobId, SubmitError> {
        let args = self.command_args(spec);
        debug!(program = %self.program, args = ?args, "Submitting batch job");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SubmitError::CommandUnavailable {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            return Err(SubmitError::Rejected {
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_job_id(&stdout)
    }
}

/// Extract the job id from a scheduler acknowledgement.
///
/// Accepts `Submitted batch job <id>` anywhere in the output, or a bare
/// numeric id with an optional `;cluster` suffix (as printed by
/// `sbatch --parsable`).
pub fn parse_job_id(stdout: &str) -> Result<JobId, SubmitError> {
    for line in stdout.lines() {
        if let Some(rest) = line.trim().strip_prefix(ACK_PREFIX) {
            if let Some(id) = rest.split_whitespace().next() {
                return Ok(JobId(id.to_string()));
            }
        }
    }

    let trimmed = stdout.trim();
    match trimmed.split(';').next() {
        Some(id) if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) => {
            Ok(JobId(id.to_string()))
        }
        _ => Err(SubmitError::UnparsedAck(trimmed.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn spec() -> RunSpec {
        RunSpec {
            scene_index: 0,
            scene: "ball".to_string(),
            modality: "iphone".to_string(),
            train_dir: PathBuf::from("/data/ball/iphone/train"),
            eval_dir: PathBuf::from("/data/ball/iphone/test"),
            match_token: "main".to_string(),
            result_base: PathBuf::from("/results/ball/iphone"),
        }
    }

    fn fake_sbatch(dir: &Path, body: &str) -> String {
        let path = dir.join("fake-sbatch");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_command_args_positional_order() {
        let mut submitter = SbatchSubmitter::new("scripts/train_eval.sh");
        submitter.extra_args = vec!["--partition=gpu".to_string()];

        let args = submitter.command_args(&spec());
        assert_eq!(
            args,
            vec![
                "--requeue",
                "--partition=gpu",
                "scripts/train_eval.sh",
                "/data/ball/iphone/train",
                "main",
                "/data/ball/iphone/test",
            ]
        );
    }

    #[test]
    fn test_parse_job_id_variants() {
        assert_eq!(
            parse_job_id("Submitted batch job 4242\n").unwrap(),
            JobId("4242".to_string())
        );
        assert_eq!(
            parse_job_id("4243;cluster\n").unwrap(),
            JobId("4243".to_string())
        );
        assert!(matches!(
            parse_job_id("something went sideways"),
            Err(SubmitError::UnparsedAck(_))
        ));
        assert!(matches!(
            parse_job_id("error\n"),
            Err(SubmitError::UnparsedAck(_))
        ));
        assert!(matches!(
            parse_job_id("queued;cluster"),
            Err(SubmitError::UnparsedAck(_))
        ));
        assert!(parse_job_id("").is_err());
    }

    #[tokio::test]
    async fn test_submit_parses_ack() {
        let dir = tempfile::tempdir().unwrap();
        let mut submitter = SbatchSubmitter::new("train.sh");
        submitter.program = fake_sbatch(dir.path(), r#"echo "Submitted batch job 777""#);

        let job = submitter.submit(&spec()).await.expect("submit failed");
        assert_eq!(job.as_str(), "777");
    }

    #[tokio::test]
    async fn test_submit_receives_requeue_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut submitter = SbatchSubmitter::new("train.sh");
        submitter.program = fake_sbatch(
            dir.path(),
            r#"[ "$1" = "--requeue" ] || exit 3; echo "Submitted batch job 1""#,
        );

        assert!(submitter.submit(&spec()).await.is_ok());
    }

    #[tokio::test]
    async fn test_submit_rejected_on_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut submitter = SbatchSubmitter::new("train.sh");
        submitter.program = fake_sbatch(dir.path(), "echo 'invalid partition' >&2; exit 1");

        match submitter.submit(&spec()).await {
            Err(SubmitError::Rejected { exit_code, stderr }) => {
                assert_eq!(exit_code, 1);
                assert!(stderr.contains("invalid partition"));
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_submit_missing_program() {
        let mut submitter = SbatchSubmitter::new("train.sh");
        submitter.program = "/nonexistent-sbatch-binary".to_string();

        assert!(matches!(
            submitter.submit(&spec()).await,
            Err(SubmitError::CommandUnavailable { .. })
        ));
    }
}
