//! Grading harnesses — how a popped queue entry becomes a report.
//!
//! Two implementations: `CommandHarness` shells out to an external
//! grading program, `ScenarioHarness` runs configured container
//! scenarios in the sandbox. Either way the result is the report bytes
//! written as the output artifact; failing tests must appear as
//! `Test <name> Failed` lines for the scanner's subset derivation.

use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use gradeflow_core::config::{SandboxConfig, ScenarioConfig};
use gradeflow_core::QueueEntry;
use gradeflow_sandbox::{ContainerSpec, Docker, SandboxSession};
use tracing::{debug, info, warn};

/// Produces a grading report for one queue entry.
///
/// An `Err` is a harness crash: nothing is recorded and the entry is
/// re-queued by the next scan. A report that contains failing tests is
/// still `Ok` — failure of the submission is a valid grading outcome.
pub trait GradingHarness: Send + Sync + 'static {
    fn grade(
        &self,
        entry: &QueueEntry,
    ) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send;
}

/// External grading command.
///
/// Invoked as `<program> <args..> <source_dir> <test..>`; its stdout
/// is the report, captured regardless of exit status.
#[derive(Debug, Clone)]
pub struct CommandHarness {
    program: String,
    args: Vec<String>,
}

impl CommandHarness {
    /// Build from the configured command line. Empty commands are a
    /// configuration error.
    pub fn new(command: &[String]) -> anyhow::Result<Self> {
        let (program, args) = command
            .split_first()
            .context("harness command must not be empty")?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl GradingHarness for CommandHarness {
    async fn grade(&self, entry: &QueueEntry) -> anyhow::Result<Vec<u8>> {
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(&entry.source_dir)
            .args(&entry.test_subset)
            .output()
            .await
            .with_context(|| format!("failed to spawn harness {}", self.program))?;

        if !output.stderr.is_empty() {
            debug!(submitter = %entry.submitter,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "harness stderr");
        }
        info!(submitter = %entry.submitter, version = entry.version,
            status = ?output.status.code(), "harness command finished");
        Ok(output.stdout)
    }
}

/// Built-in harness running configured container scenarios.
///
/// Each scenario is one sandbox session; the submission directory is
/// bind-mounted read-only at `/submission` into every container. A
/// scenario passes when all of its awaited containers exit 0.
pub struct ScenarioHarness {
    docker: Docker,
    scenarios: Vec<ScenarioConfig>,
    sandbox: SandboxConfig,
}

/// Mount point the scenario images expect the submission under.
const SUBMISSION_MOUNT: &str = "/submission";

impl ScenarioHarness {
    pub fn new(
        docker: Docker,
        scenarios: Vec<ScenarioConfig>,
        sandbox: SandboxConfig,
    ) -> Self {
        Self {
            docker,
            scenarios,
            sandbox,
        }
    }

    fn selected<'a>(&'a self, subset: &[String]) -> Vec<&'a ScenarioConfig> {
        self.scenarios
            .iter()
            .filter(|s| subset.is_empty() || subset.iter().any(|name| *name == s.name))
            .collect()
    }

    async fn run_scenario(
        &self,
        scenario: &ScenarioConfig,
        entry: &QueueEntry,
        report: &mut String,
    ) -> bool {
        let delay = Duration::from_secs(self.sandbox.inter_start_delay_secs);
        let timeout = self
            .sandbox
            .container_timeout_secs
            .map(Duration::from_secs);
        let submission_bind = format!(
            "{}:{SUBMISSION_MOUNT}:ro",
            entry.source_dir.display()
        );

        let mut session =
            SandboxSession::new(self.docker.clone(), scenario.name.clone(), delay);
        let mut no_wait: Vec<&str> = Vec::new();

        let provisioned: anyhow::Result<()> = async {
            session.create_network(scenario.internal_network).await?;
            for container in &scenario.containers {
                let mut spec = ContainerSpec::new(&container.name, &container.image)
                    .with_command(container.command.clone())
                    .bind(&submission_bind);
                for (host, port) in &container.published_ports {
                    spec = spec.publish_port(*host, *port);
                }
                for bind in &container.volume_binds {
                    spec = spec.bind(bind);
                }
                for cap in &container.capabilities {
                    spec = spec.with_capability(cap);
                }
                session.add_container(spec)?;
                if container.no_wait {
                    no_wait.push(&container.name);
                }
            }
            Ok(())
        }
        .await;

        let passed = match provisioned {
            Ok(()) => match session.run(timeout, &no_wait).await {
                Ok(()) => scenario.containers.iter().all(|c| {
                    c.no_wait
                        || session
                            .outcome(&c.name)
                            .is_some_and(|outcome| outcome.passed())
                }),
                Err(e) => {
                    warn!(scenario = %scenario.name, submitter = %entry.submitter,
                        error = %e, "scenario run failed");
                    false
                }
            },
            Err(e) => {
                warn!(scenario = %scenario.name, submitter = %entry.submitter,
                    error = %e, "scenario provisioning failed");
                false
            }
        };

        for container in &scenario.containers {
            match session.logs(&container.name).await {
                Ok(logs) if !logs.is_empty() => {
                    report.push_str(&format!(
                        "--- {} / {} ---\n{logs}",
                        scenario.name, container.name
                    ));
                    if !logs.ends_with('\n') {
                        report.push('\n');
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(scenario = %scenario.name, container = %container.name,
                        error = %e, "no logs collected");
                }
            }
        }

        if let Err(e) = session.cleanup().await {
            // Leftovers are reaped by the startup sweep.
            warn!(scenario = %scenario.name, error = %e, "scenario cleanup incomplete");
        }
        passed
    }
}

impl GradingHarness for ScenarioHarness {
    async fn grade(&self, entry: &QueueEntry) -> anyhow::Result<Vec<u8>> {
        let selected = self.selected(&entry.test_subset);
        anyhow::ensure!(
            !selected.is_empty(),
            "no scenarios match subset {:?}",
            entry.test_subset
        );

        let mut report = String::new();
        let mut verdicts = String::new();
        for scenario in selected {
            let passed = self.run_scenario(scenario, entry, &mut report).await;
            let verdict = if passed { "Passed" } else { "Failed" };
            verdicts.push_str(&format!("Test {} {verdict}\n", scenario.name));
            info!(submitter = %entry.submitter, version = entry.version,
                scenario = %scenario.name, passed, "scenario graded");
        }

        // Verdict lines lead so graders and the scanner find them first.
        let mut out = verdicts;
        if !report.is_empty() {
            out.push('\n');
            out.push_str(&report);
        }
        Ok(out.into_bytes())
    }
}
