//! gradeflow.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level daemon configuration.
///
/// Every field has a default so a minimal `gradeflow.toml` only needs
/// `watch_dir` and `task`; the CLI can override any of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraderConfig {
    /// Root of the VCS working copy being watched.
    pub watch_dir: PathBuf,
    /// Task name; markers are expected at `<watch_dir>/*/<task>/VERSION`.
    pub task: String,
    /// Prefix for output artifacts written beside each submission.
    pub outfile_prefix: String,
    /// Sentinel file whose presence triggers graceful drain-and-exit.
    pub stop_file: PathBuf,
    /// Directory for the attempt ledger and its lock file.
    pub data_dir: PathBuf,
    /// Where the queue status page is written.
    pub dashboard_path: PathBuf,
    /// Upper bound on concurrently running grading jobs.
    pub max_concurrency: usize,
    /// Control-loop sleep when there is work in flight, in seconds.
    pub tick_interval_secs: u64,
    /// Control-loop sleep when queue and pool are both empty, in seconds.
    pub idle_interval_secs: u64,
    /// Minimum spacing between VCS sync calls, in seconds.
    pub sync_interval_secs: u64,
    /// Commit output artifacts back to the VCS after grading.
    pub publish: bool,
    pub harness: HarnessConfig,
    pub sandbox: SandboxConfig,
    /// Test scenarios for the built-in harness; ignored when an
    /// external harness command is configured.
    #[serde(rename = "scenario")]
    pub scenarios: Vec<ScenarioConfig>,
}

/// One named test scenario: a list of containers run together on an
/// isolated network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub name: String,
    /// Deny the scenario network outbound connectivity.
    pub internal_network: bool,
    #[serde(rename = "container")]
    pub containers: Vec<ContainerConfig>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            internal_network: true,
            containers: Vec::new(),
        }
    }
}

/// One container declaration inside a scenario. Declaration order is
/// start order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub name: String,
    /// Image reference; images are built and tagged elsewhere.
    pub image: String,
    pub command: Vec<String>,
    /// `(host, container)` TCP port publications.
    pub published_ports: Vec<(u16, u16)>,
    /// Bind mounts in `host:container:mode` form.
    pub volume_binds: Vec<String>,
    /// Extra Linux capabilities.
    pub capabilities: Vec<String>,
    /// Long-running service: stop it after the others finish instead
    /// of waiting for it to exit.
    pub no_wait: bool,
}

/// How grading reports are produced for a popped queue entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// External grading command; the submission directory and the test
    /// subset are appended as arguments and stdout becomes the report.
    /// When unset, the built-in scenario harness is used.
    pub command: Option<Vec<String>>,
}

/// Sandbox session tuning shared by every grading job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Pause between container starts so services can bind first.
    pub inter_start_delay_secs: u64,
    /// Per-container wait budget; `None` waits indefinitely.
    pub container_timeout_secs: Option<u64>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            inter_start_delay_secs: 2,
            container_timeout_secs: Some(300),
        }
    }
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from("."),
            task: String::new(),
            outfile_prefix: "GRADING_OUTPUTv1".to_string(),
            stop_file: PathBuf::from("STOP_AUTOGRADER"),
            data_dir: PathBuf::from("."),
            dashboard_path: PathBuf::from("queue.html"),
            max_concurrency: 6,
            tick_interval_secs: 1,
            idle_interval_secs: 15,
            sync_interval_secs: 15,
            publish: true,
            harness: HarnessConfig::default(),
            sandbox: SandboxConfig::default(),
            scenarios: Vec::new(),
        }
    }
}

impl GraderConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GraderConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let cfg = GraderConfig::default();
        assert_eq!(cfg.max_concurrency, 6);
        assert_eq!(cfg.tick_interval_secs, 1);
        assert_eq!(cfg.idle_interval_secs, 15);
        assert_eq!(cfg.sync_interval_secs, 15);
        assert_eq!(cfg.outfile_prefix, "GRADING_OUTPUTv1");
        assert!(cfg.publish);
        assert!(cfg.harness.command.is_none());
    }

    #[test]
    fn minimal_toml_parses() {
        let cfg: GraderConfig = toml::from_str(
            r#"
            watch_dir = "/srv/submissions"
            task = "mp1"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.watch_dir, PathBuf::from("/srv/submissions"));
        assert_eq!(cfg.task, "mp1");
        assert_eq!(cfg.max_concurrency, 6);
    }

    #[test]
    fn sections_override_defaults() {
        let cfg: GraderConfig = toml::from_str(
            r#"
            watch_dir = "/srv/submissions"
            task = "mp2"
            max_concurrency = 2
            publish = false

            [harness]
            command = ["python3", "run_tests.py"]

            [sandbox]
            inter_start_delay_secs = 5
            container_timeout_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(cfg.max_concurrency, 2);
        assert!(!cfg.publish);
        assert_eq!(
            cfg.harness.command.as_deref(),
            Some(["python3".to_string(), "run_tests.py".to_string()].as_slice())
        );
        assert_eq!(cfg.sandbox.inter_start_delay_secs, 5);
        assert_eq!(cfg.sandbox.container_timeout_secs, Some(60));
    }

    #[test]
    fn scenario_tables_parse() {
        let cfg: GraderConfig = toml::from_str(
            r#"
            watch_dir = "/srv/submissions"
            task = "mp4"

            [[scenario]]
            name = "basic"

            [[scenario.container]]
            name = "server"
            image = "mp4-server:latest"
            command = ["./server", "8080"]
            no_wait = true

            [[scenario.container]]
            name = "client"
            image = "mp4-client:latest"
            command = ["./run_tests.sh"]
            volume_binds = ["/tmp/x:/data:ro"]

            [[scenario]]
            name = "stress"
            internal_network = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.scenarios.len(), 2);
        let basic = &cfg.scenarios[0];
        assert_eq!(basic.name, "basic");
        assert!(basic.internal_network);
        assert_eq!(basic.containers.len(), 2);
        assert!(basic.containers[0].no_wait);
        assert_eq!(basic.containers[1].volume_binds, vec!["/tmp/x:/data:ro"]);
        assert!(!cfg.scenarios[1].internal_network);
    }

    #[test]
    fn roundtrip_through_toml() {
        let cfg = GraderConfig::default();
        let s = cfg.to_toml_string().unwrap();
        let back: GraderConfig = toml::from_str(&s).unwrap();
        assert_eq!(back.max_concurrency, cfg.max_concurrency);
        assert_eq!(back.outfile_prefix, cfg.outfile_prefix);
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gradeflow.toml");
        std::fs::write(&path, "watch_dir = \"/x\"\ntask = \"mp3\"\n").unwrap();
        let cfg = GraderConfig::from_file(&path).unwrap();
        assert_eq!(cfg.task, "mp3");
    }
}
