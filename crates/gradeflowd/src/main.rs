//! gradeflowd — the continuous autograder daemon.
//!
//! Single binary that assembles the grading pipeline:
//! - Attempt ledger (redb) behind an exclusive process lock
//! - Submission scanner + fairness queue
//! - Bounded worker pool running the grading harness
//! - Docker sandbox (with a startup orphan sweep)
//! - Static queue dashboard
//!
//! # Usage
//!
//! ```text
//! gradeflowd init --config gradeflow.toml
//! gradeflowd watch --config gradeflow.toml
//! gradeflowd compile --image mp1-compile:latest --src ./alice/mp1 --work-dir /tmp/build
//! gradeflowd sweep
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use gradeflow_core::GraderConfig;
use gradeflow_scheduler::{
    CommandHarness, ControlLoop, GradingHarness, NoVcs, ScenarioHarness, SvnClient,
};
use gradeflow_state::{AttemptLedger, ProcessLock, StateError};

#[derive(Parser)]
#[command(name = "gradeflowd", about = "Continuous autograder daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default configuration file.
    Init {
        /// Where to write the configuration.
        #[arg(long, default_value = "gradeflow.toml")]
        config: PathBuf,
    },

    /// Watch the submission tree and grade continuously.
    Watch {
        /// Configuration file.
        #[arg(long, default_value = "gradeflow.toml")]
        config: PathBuf,

        /// Override the watched working-copy root.
        #[arg(long)]
        watch_dir: Option<PathBuf>,

        /// Override the task name.
        #[arg(long)]
        task: Option<String>,

        /// Override the worker-pool size.
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Treat the watch tree as a plain directory: no sync, no
        /// commits of output artifacts.
        #[arg(long)]
        no_vcs: bool,
    },

    /// Compile one submission inside the task's compile image.
    Compile {
        /// Compile image reference (name:tag).
        #[arg(long)]
        image: String,

        /// Submission source directory.
        #[arg(long)]
        src: PathBuf,

        /// Work area; sources are copied to `<work_dir>/compile`.
        #[arg(long)]
        work_dir: PathBuf,

        /// Compile timeout in seconds; expiry counts as a failure.
        #[arg(long, default_value = "300")]
        timeout: u64,
    },

    /// Remove sandbox containers and networks left by a killed daemon.
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    "info,gradeflowd=debug,gradeflow_scheduler=debug,gradeflow_sandbox=debug"
                        .parse()
                        .unwrap()
                }),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Init { config } => init(config),
        Command::Watch {
            config,
            watch_dir,
            task,
            max_concurrency,
            no_vcs,
        } => watch(config, watch_dir, task, max_concurrency, no_vcs).await,
        Command::Compile {
            image,
            src,
            work_dir,
            timeout,
        } => compile(image, src, work_dir, timeout).await,
        Command::Sweep => sweep().await,
    }
}

fn init(path: PathBuf) -> anyhow::Result<()> {
    anyhow::ensure!(!path.exists(), "{} already exists", path.display());
    let config = GraderConfig::default();
    std::fs::write(&path, config.to_toml_string()?)?;
    info!(?path, "default configuration written");
    Ok(())
}

async fn watch(
    config_path: PathBuf,
    watch_dir: Option<PathBuf>,
    task: Option<String>,
    max_concurrency: Option<usize>,
    no_vcs: bool,
) -> anyhow::Result<()> {
    let mut config = GraderConfig::from_file(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    if let Some(watch_dir) = watch_dir {
        config.watch_dir = watch_dir;
    }
    if let Some(task) = task {
        config.task = task;
    }
    if let Some(max_concurrency) = max_concurrency {
        config.max_concurrency = max_concurrency;
    }
    anyhow::ensure!(!config.task.is_empty(), "no task configured");

    std::fs::create_dir_all(&config.data_dir)?;

    // One daemon per ledger; a second instance must fail fast.
    let _lock = match ProcessLock::acquire(&config.data_dir.join("gradeflow.lock")) {
        Ok(lock) => lock,
        Err(StateError::Locked(path)) => {
            anyhow::bail!(
                "another gradeflowd holds {}; is a daemon already running?",
                path.display()
            );
        }
        Err(e) => return Err(e.into()),
    };

    let ledger = AttemptLedger::open(&config.data_dir.join("attempts.redb"))?;

    match config.harness.command.clone() {
        Some(command) => {
            info!(command = ?command, "using external harness command");
            let harness = CommandHarness::new(&command)?;
            run_loop(config, harness, no_vcs, ledger).await
        }
        None => {
            anyhow::ensure!(
                !config.scenarios.is_empty(),
                "no harness command and no scenarios configured"
            );
            let docker = gradeflow_sandbox::connect()?;
            match gradeflow_sandbox::sweep_orphans(&docker).await {
                Ok((containers, networks)) if containers + networks > 0 => {
                    info!(containers, networks, "startup sweep removed orphans");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "startup sweep failed"),
            }
            let harness =
                ScenarioHarness::new(docker, config.scenarios.clone(), config.sandbox.clone());
            run_loop(config, harness, no_vcs, ledger).await
        }
    }
}

async fn run_loop<H: GradingHarness>(
    config: GraderConfig,
    harness: H,
    no_vcs: bool,
    ledger: AttemptLedger,
) -> anyhow::Result<()> {
    if no_vcs {
        ControlLoop::new(config, harness, NoVcs, ledger).run().await
    } else {
        ControlLoop::new(config, harness, SvnClient::new(), ledger)
            .run()
            .await
    }
}

async fn compile(
    image: String,
    src: PathBuf,
    work_dir: PathBuf,
    timeout: u64,
) -> anyhow::Result<()> {
    let docker = gradeflow_sandbox::connect()?;
    let passed = gradeflow_sandbox::compile(
        docker,
        &image,
        &src,
        &work_dir,
        std::time::Duration::from_secs(timeout),
    )
    .await?;
    anyhow::ensure!(passed, "compilation failed");
    Ok(())
}

async fn sweep() -> anyhow::Result<()> {
    let docker = gradeflow_sandbox::connect()?;
    let (containers, networks) = gradeflow_sandbox::sweep_orphans(&docker).await?;
    info!(containers, networks, "sweep finished");
    Ok(())
}
