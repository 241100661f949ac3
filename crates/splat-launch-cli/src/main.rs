//! splat-launch - batch launcher for splatting train/eval runs
//!
//! ## Commands
//!
//! - `train`: submit one requeueable cluster job per admitted scene/modality
//! - `eval`: run one supervised local unit per admitted scene/modality
//! - `plan`: show which combinations would run, without side effects
//! - `regenerate-alignments`: recompute test-to-train alignment transforms

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, Level};

use splat_launch::{
    alignment, AlignmentJob, BatchCoordinator, BatchSummary, LaunchConfig, Outcome,
    SbatchSubmitter, UnitFlags, UnitLauncher,
};

#[derive(Parser)]
#[command(name = "splat-launch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Launch splatting train/eval batches over a scene x modality matrix", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// JSON launch configuration (fields not given keep their defaults)
    #[arg(long, global = true, env = "SPLAT_LAUNCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides applied on top of the configuration file.
#[derive(Args, Debug, Default)]
struct MatrixArgs {
    /// Dataset root (`<root>/<scene>/<modality>/...`)
    #[arg(long, env = "SPLAT_DATA_ROOT")]
    data_root: Option<PathBuf>,

    /// Results root (`<root>/<scene>/<modality>/...`)
    #[arg(long, env = "SPLAT_RESULT_ROOT")]
    result_root: Option<PathBuf>,

    /// Directory for per-run logs
    #[arg(long, env = "SPLAT_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Scenes to run (comma-separated, in order)
    #[arg(long, value_delimiter = ',')]
    scenes: Vec<String>,

    /// Modalities to run (comma-separated, in order)
    #[arg(long, value_delimiter = ',')]
    modalities: Vec<String>,

    /// Match token for a modality, as `modality=token` (repeatable)
    #[arg(long = "match-token", value_parser = parse_match_token)]
    match_tokens: Vec<(String, String)>,

    /// Preferred training subpath below `<scene>/<modality>`
    #[arg(long)]
    train_subpath: Option<String>,

    /// Preferred evaluation subpath below `<scene>/<modality>`
    #[arg(long)]
    test_subpath: Option<String>,
}

impl MatrixArgs {
    fn apply(self, config: &mut LaunchConfig) {
        if let Some(dir) = self.data_root {
            config.data_root = dir;
        }
        if let Some(dir) = self.result_root {
            config.result_root = dir;
        }
        if let Some(dir) = self.log_dir {
            config.log_dir = dir;
        }
        if !self.scenes.is_empty() {
            config.scenes = self.scenes;
        }
        if !self.modalities.is_empty() {
            config.modalities = self.modalities;
        }
        for (modality, token) in self.match_tokens {
            config.match_tokens.insert(modality, token);
        }
        if let Some(subpath) = self.train_subpath {
            config.train_subpath = subpath;
        }
        if let Some(subpath) = self.test_subpath {
            config.test_subpath = subpath;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Submit one requeueable cluster job per admitted combination
    Train {
        #[command(flatten)]
        matrix: MatrixArgs,

        /// Batch script receiving `<train_dir> <match_token> <eval_dir>`
        #[arg(long)]
        script: PathBuf,

        /// Submission command
        #[arg(long, default_value = "sbatch")]
        submit_program: String,

        /// Extra option passed to the submission command (repeatable)
        #[arg(long = "sbatch-arg", allow_hyphen_values = true)]
        sbatch_args: Vec<String>,
    },

    /// Run one supervised local unit per admitted combination and wait for all
    Eval {
        #[command(flatten)]
        matrix: MatrixArgs,

        /// Program started for every unit
        #[arg(long, default_value = "python3")]
        program: String,

        /// Argument placed before `<data_root> <result_root>` (repeatable)
        #[arg(long = "program-arg", allow_hyphen_values = true)]
        program_args: Vec<String>,

        /// Auxiliary code directory prepended to PYTHONPATH
        #[arg(long, env = "SPLAT_AUX_PYTHONPATH")]
        python_path: Option<PathBuf>,

        /// Regenerate alignment transforms instead of reusing them
        #[arg(long)]
        force_regen_alignment: bool,

        /// Read covisibility from the external cache
        #[arg(long)]
        use_external_covisible: bool,

        /// Exit non-zero when any unit fails
        #[arg(long)]
        strict: bool,
    },

    /// Show the admission decision for every combination
    Plan {
        #[command(flatten)]
        matrix: MatrixArgs,
    },

    /// Recompute test-to-train alignment transforms of existing results
    RegenerateAlignments {
        /// Results directory to scan (default: configured result root)
        #[arg(long)]
        results_dir: Option<PathBuf>,

        /// Dataset directory (default: configured data root)
        #[arg(long)]
        dataset_dir: Option<PathBuf>,

        /// Script computing one alignment
        #[arg(long, default_value = "scripts/compute_dataset_alignment.py")]
        compute_script: PathBuf,

        /// Interpreter for the compute script
        #[arg(long, default_value = "python3")]
        python: String,

        /// Modalities to regenerate (comma-separated)
        #[arg(long, value_delimiter = ',', default_value = "iphone")]
        modalities: Vec<String>,

        /// Test cadence for the eval dataset parser
        #[arg(long, default_value = "1")]
        eval_test_every: u32,

        /// Only these scenes (comma-separated; default: all)
        #[arg(long, value_delimiter = ',')]
        scenes: Vec<String>,

        /// Don't back up old alignment files
        #[arg(long)]
        no_backup: bool,

        /// Show what would be done without doing it
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    splat_launch::init_tracing(cli.json, level);

    let config_path = cli.config;
    match cli.command {
        Commands::Train {
            matrix,
            script,
            submit_program,
            sbatch_args,
        } => {
            let config = load_config(config_path.as_deref(), matrix)?;
            cmd_train(config, script, submit_program, sbatch_args).await
        }
        Commands::Eval {
            matrix,
            program,
            program_args,
            python_path,
            force_regen_alignment,
            use_external_covisible,
            strict,
        } => {
            let config = load_config(config_path.as_deref(), matrix)?;
            let launcher = UnitLauncher {
                program,
                args_prefix: program_args,
                python_path,
                flags: UnitFlags {
                    force_regen_alignment,
                    use_external_covisible,
                },
            };
            cmd_eval(config, launcher, strict).await
        }
        Commands::Plan { matrix } => {
            let config = load_config(config_path.as_deref(), matrix)?;
            cmd_plan(config)
        }
        Commands::RegenerateAlignments {
            results_dir,
            dataset_dir,
            compute_script,
            python,
            modalities,
            eval_test_every,
            scenes,
            no_backup,
            dry_run,
        } => {
            let config = load_config(config_path.as_deref(), MatrixArgs::default())?;
            let mut job = AlignmentJob::new(
                dataset_dir.unwrap_or_else(|| config.data_root.clone()),
                compute_script,
            );
            job.python = python;
            job.eval_test_every = eval_test_every;
            job.backup = !no_backup;
            job.dry_run = dry_run;

            let results_dir = results_dir.unwrap_or(config.result_root);
            cmd_regenerate_alignments(&job, &results_dir, &modalities, &scenes).await
        }
    }
}

/// Defaults, then the optional config file, then command-line overrides.
fn load_config(path: Option<&Path>, matrix: MatrixArgs) -> Result<LaunchConfig> {
    let mut config = match path {
        Some(path) => LaunchConfig::from_json_file(path)
            .with_context(|| format!("Failed to load launch config from {:?}", path))?,
        None => LaunchConfig::default(),
    };
    matrix.apply(&mut config);
    config.validate().context("Invalid launch configuration")?;
    Ok(config)
}

fn parse_match_token(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((modality, token)) if !modality.is_empty() && !token.is_empty() => {
            Ok((modality.to_string(), token.to_string()))
        }
        _ => Err(format!("expected modality=token, got '{raw}'")),
    }
}

/// Queued flow: one `sbatch --requeue` per admitted combination.
async fn cmd_train(
    config: LaunchConfig,
    script: PathBuf,
    submit_program: String,
    sbatch_args: Vec<String>,
) -> Result<()> {
    let mut extra_args = vec![format!(
        "--output={}",
        config.log_dir.join("slurm-%j.out").display()
    )];
    extra_args.extend(sbatch_args);

    let submitter = SbatchSubmitter {
        program: submit_program,
        script,
        extra_args,
    };

    info!(
        scenes = config.scenes.len(),
        modalities = config.modalities.len(),
        "Submitting training batch"
    );
    let coordinator = BatchCoordinator::new(config)?;
    let summary = coordinator
        .run_queued(&submitter)
        .await
        .context("Training batch failed to run")?;

    print_summary(&summary);
    Ok(())
}

/// Supervised flow: launch every unit, wait for all, report.
async fn cmd_eval(config: LaunchConfig, launcher: UnitLauncher, strict: bool) -> Result<()> {
    info!(program = %launcher.program, "Launching evaluation units");
    let coordinator = BatchCoordinator::new(config)?;
    let summary = coordinator
        .run_supervised(&launcher)
        .await
        .context("Evaluation batch failed to run")?;

    print_summary(&summary);

    let failures = summary.unit_failures();
    if strict && !failures.is_empty() {
        anyhow::bail!("{} evaluation unit(s) failed", failures.len());
    }
    Ok(())
}

fn cmd_plan(config: LaunchConfig) -> Result<()> {
    let coordinator = BatchCoordinator::new(config)?;
    let plan = coordinator.plan();

    println!("{:<12} {:<10} {:<8} {}", "SCENE", "MODALITY", "STATUS", "DETAIL");
    println!("{}", "-".repeat(80));
    for planned in &plan {
        let (status, detail) = if planned.admission.admitted {
            ("run", planned.paths.train_dir.display().to_string())
        } else {
            let path = planned
                .admission
                .offending_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            ("skip", format!("{} ({})", planned.admission.reason, path))
        };
        println!(
            "{:<12} {:<10} {:<8} {}",
            planned.combination.scene, planned.combination.modality, status, detail
        );
    }

    let admitted = plan.iter().filter(|p| p.admission.admitted).count();
    println!();
    println!("{}/{} combinations would run", admitted, plan.len());
    Ok(())
}

async fn cmd_regenerate_alignments(
    job: &AlignmentJob,
    results_dir: &Path,
    modalities: &[String],
    scenes: &[String],
) -> Result<()> {
    job.validate()?;

    println!("Results dir: {}", results_dir.display());
    println!("Dataset dir: {}", job.dataset_dir.display());
    println!("Modalities: {}", modalities.join(", "));
    println!("Dry run: {}", job.dry_run);
    println!();

    let records = alignment::find_alignments(results_dir, modalities)
        .with_context(|| format!("Failed to scan {:?}", results_dir))?;
    let records = alignment::filter_scenes(records, scenes);

    if records.is_empty() {
        println!("No alignments found!");
        return Ok(());
    }
    println!("Found {} alignments to regenerate", records.len());

    let report = job.regenerate_all(&records).await?;

    println!();
    println!("✓ Successful: {}", report.succeeded);
    println!("✗ Failed: {}", report.failed);
    for label in &report.failures {
        println!("  - {}", label);
    }

    if job.dry_run {
        println!();
        println!("This was a DRY RUN. Run without --dry-run to actually regenerate.");
    }

    if report.all_succeeded() {
        Ok(())
    } else {
        anyhow::bail!("{} alignment(s) failed to regenerate", report.failed)
    }
}

fn print_summary(summary: &BatchSummary) {
    for combination in &summary.outcomes {
        let (mark, detail) = match &combination.outcome {
            Outcome::Submitted { job_id } => ("✓", format!("job {}", job_id)),
            Outcome::Launched { exit_code, success } => (
                if *success { "✓" } else { "✗" },
                match exit_code {
                    Some(code) => format!("exit code {}", code),
                    None => "terminated by signal".to_string(),
                },
            ),
            Outcome::Skipped { reason } => ("-", format!("skipped: {}", reason)),
            Outcome::Failed { reason } => ("✗", format!("failed: {}", reason)),
        };
        println!(
            "  {} {}/{} ({})",
            mark, combination.scene, combination.modality, detail
        );
    }
    println!();
    println!("{}", summary.summary_line());
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_match_token() {
        assert_eq!(
            parse_match_token("stereo=right").unwrap(),
            ("stereo".to_string(), "right".to_string())
        );
        assert!(parse_match_token("stereo").is_err());
        assert!(parse_match_token("=right").is_err());
    }

    #[test]
    fn test_matrix_overrides_apply_over_defaults() {
        let cli = Cli::try_parse_from([
            "splat-launch",
            "plan",
            "--scenes",
            "ball,dog",
            "--modalities",
            "iphone",
            "--match-token",
            "iphone=wide",
            "--data-root",
            "/captures",
        ])
        .unwrap();

        let Commands::Plan { matrix } = cli.command else {
            panic!("expected plan command");
        };
        let mut config = LaunchConfig::default();
        matrix.apply(&mut config);

        assert_eq!(config.scenes, vec!["ball", "dog"]);
        assert_eq!(config.modalities, vec!["iphone"]);
        assert_eq!(config.match_tokens["iphone"], "wide");
        assert_eq!(config.data_root, PathBuf::from("/captures"));
        assert_eq!(config.train_subpath, "subsets/train");
    }

    #[test]
    fn test_config_file_then_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launch.json");
        std::fs::write(&path, r#"{ "scenes": ["mug"], "log_dir": "/var/log/splat" }"#).unwrap();

        let matrix = MatrixArgs {
            log_dir: Some(PathBuf::from("/tmp/logs")),
            ..Default::default()
        };
        let config = load_config(Some(&path), matrix).unwrap();

        assert_eq!(config.scenes, vec!["mug"]);
        assert_eq!(config.log_dir, PathBuf::from("/tmp/logs"));
    }

    #[test]
    fn test_eval_accepts_hyphenated_program_args() {
        let cli = Cli::try_parse_from([
            "splat-launch",
            "eval",
            "--program-arg",
            "scripts/eval_all.py",
            "--program-arg",
            "--fast",
            "--strict",
        ])
        .unwrap();

        let Commands::Eval {
            program_args,
            strict,
            ..
        } = cli.command
        else {
            panic!("expected eval command");
        };
        assert_eq!(program_args, vec!["scripts/eval_all.py", "--fast"]);
        assert!(strict);
    }
}
