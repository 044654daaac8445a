//! SandboxSession — one isolated network + container group per scenario.

use std::collections::HashMap;
use std::time::Duration;

use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::models::{HostConfig, PortBinding};
use bollard::network::CreateNetworkOptions;
use futures_util::stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SandboxError, SandboxResult};

/// Label attached to every container and network a session provisions,
/// valued with the session id. The startup sweep keys off it.
pub const SESSION_LABEL: &str = "gradeflow.session";

/// Sentinel exit code recorded when an awaited container hits its
/// timeout. Distinct from every real Docker exit status (0–255).
pub const TIMEOUT_EXIT_CODE: i64 = -1;

/// Grace period given to a container when it is stopped rather than
/// waited on.
const STOP_GRACE_SECS: i64 = 2;

/// Connect to the local Docker daemon.
pub fn connect() -> SandboxResult<Docker> {
    Docker::connect_with_local_defaults().map_err(|e| SandboxError::Connect(e.to_string()))
}

/// Declaration of one container in a scenario. Declaration order is
/// start order.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Logical name, unique within the scenario.
    pub name: String,
    /// Image reference (name:tag); images are built elsewhere.
    pub image: String,
    /// Command to run; empty uses the image default.
    pub command: Vec<String>,
    /// `(host_port, container_port)` TCP publications.
    pub published_ports: Vec<(u16, u16)>,
    /// Bind mounts in Docker `host:container:mode` form.
    pub volume_binds: Vec<String>,
    /// Extra Linux capabilities to grant.
    pub capabilities: Vec<String>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command: Vec::new(),
            published_ports: Vec::new(),
            volume_binds: Vec::new(),
            capabilities: Vec::new(),
        }
    }

    pub fn with_command(mut self, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn publish_port(mut self, host: u16, container: u16) -> Self {
        self.published_ports.push((host, container));
        self
    }

    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.volume_binds.push(bind.into());
        self
    }

    pub fn with_capability(mut self, cap: impl Into<String>) -> Self {
        self.capabilities.push(cap.into());
        self
    }
}

/// What happened to one container in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerOutcome {
    /// Not started, or started and not yet waited on.
    Pending,
    /// Exited with this code; `TIMEOUT_EXIT_CODE` means timed out.
    Exited(i64),
    /// Provisioning or wait failed before an exit code existed.
    Error(String),
}

impl ContainerOutcome {
    /// Exit code 0 denotes pass; anything else (sentinel included) is
    /// a fail. The aggregate verdict belongs to the grading harness.
    pub fn passed(&self) -> bool {
        matches!(self, ContainerOutcome::Exited(0))
    }
}

struct SessionContainer {
    spec: ContainerSpec,
    /// Docker id once created.
    id: Option<String>,
    outcome: ContainerOutcome,
}

/// One test-scenario execution: an optional isolated network and an
/// ordered set of containers.
///
/// `cleanup` consumes the session — it can only run once, and the
/// caller keeps ownership through `run` errors so teardown always
/// remains reachable.
pub struct SandboxSession {
    docker: Docker,
    scenario: String,
    session_id: String,
    network: Option<String>,
    containers: Vec<SessionContainer>,
    inter_start_delay: Duration,
}

impl SandboxSession {
    pub fn new(docker: Docker, scenario: impl Into<String>, inter_start_delay: Duration) -> Self {
        Self {
            docker,
            scenario: scenario.into(),
            session_id: Uuid::new_v4().simple().to_string(),
            network: None,
            containers: Vec::new(),
            inter_start_delay,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Name the session's network would have.
    pub fn network_name(&self) -> String {
        let sid = &self.session_id[..8];
        format!("gradeflow-net-{}-{sid}", self.scenario)
    }

    fn container_docker_name(&self, logical: &str) -> String {
        let sid = &self.session_id[..8];
        format!("gradeflow-{sid}-{logical}")
    }

    fn labels(&self) -> HashMap<String, String> {
        HashMap::from([(SESSION_LABEL.to_string(), self.session_id.clone())])
    }

    /// Provision the session's isolated network. `internal` denies the
    /// network outbound connectivity.
    pub async fn create_network(&mut self, internal: bool) -> SandboxResult<()> {
        let name = self.network_name();
        let options = CreateNetworkOptions {
            name: name.clone(),
            internal,
            labels: self.labels(),
            ..Default::default()
        };
        self.docker
            .create_network(options)
            .await
            .map_err(|e| SandboxError::Network(e.to_string()))?;
        debug!(network = %name, internal, "sandbox network created");
        self.network = Some(name);
        Ok(())
    }

    /// Declare a container; it is created and started by `run`, in
    /// declaration order.
    pub fn add_container(&mut self, spec: ContainerSpec) -> SandboxResult<()> {
        if self.containers.iter().any(|c| c.spec.name == spec.name) {
            return Err(SandboxError::DuplicateContainer(spec.name));
        }
        self.containers.push(SessionContainer {
            spec,
            id: None,
            outcome: ContainerOutcome::Pending,
        });
        Ok(())
    }

    /// Logical container names in declaration (= start) order.
    pub fn container_names(&self) -> Vec<&str> {
        self.containers.iter().map(|c| c.spec.name.as_str()).collect()
    }

    /// The recorded outcome for a logical container name.
    pub fn outcome(&self, name: &str) -> Option<&ContainerOutcome> {
        self.containers
            .iter()
            .find(|c| c.spec.name == name)
            .map(|c| &c.outcome)
    }

    /// All `(name, outcome)` pairs in declaration order.
    pub fn outcomes(&self) -> Vec<(&str, &ContainerOutcome)> {
        self.containers
            .iter()
            .map(|c| (c.spec.name.as_str(), &c.outcome))
            .collect()
    }

    /// Start every declared container in order, then wait for each one
    /// not named in `no_wait` to exit (bounded by `timeout`), then stop
    /// the `no_wait` ones.
    ///
    /// A timeout is recorded as `TIMEOUT_EXIT_CODE`, not surfaced as an
    /// error. The caller must still invoke `cleanup` afterwards.
    pub async fn run(
        &mut self,
        timeout: Option<Duration>,
        no_wait: &[&str],
    ) -> SandboxResult<()> {
        // Start phase, with the inter-start delay between containers so
        // network services can bind before dependents come up.
        for i in 0..self.containers.len() {
            if i > 0 && !self.inter_start_delay.is_zero() {
                tokio::time::sleep(self.inter_start_delay).await;
            }
            if let Err(e) = self.start_container(i).await {
                self.containers[i].outcome = ContainerOutcome::Error(e.to_string());
                return Err(e);
            }
        }

        // Wait phase.
        for i in 0..self.containers.len() {
            let name = self.containers[i].spec.name.clone();
            if no_wait.contains(&name.as_str()) {
                continue;
            }
            let code = self.wait_container(i, timeout).await;
            self.containers[i].outcome = ContainerOutcome::Exited(code);
            debug!(scenario = %self.scenario, container = %name, code, "container finished");
        }

        // Long-running services get stopped instead of waited on.
        for i in 0..self.containers.len() {
            let name = self.containers[i].spec.name.clone();
            if !no_wait.contains(&name.as_str()) {
                continue;
            }
            let code = self.stop_and_collect(i).await;
            self.containers[i].outcome = ContainerOutcome::Exited(code);
            debug!(scenario = %self.scenario, container = %name, code, "service stopped");
        }

        Ok(())
    }

    /// Captured stdout/stderr of a named container.
    pub async fn logs(&self, name: &str) -> SandboxResult<String> {
        let container = self
            .containers
            .iter()
            .find(|c| c.spec.name == name)
            .ok_or_else(|| SandboxError::UnknownContainer(name.to_string()))?;
        let id = container
            .id
            .as_deref()
            .ok_or_else(|| SandboxError::Container(format!("{name} was never created")))?;

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(id, Some(options));
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                    out.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(e) => return Err(SandboxError::Container(e.to_string())),
            }
        }
        Ok(out)
    }

    /// Force-remove every created container and the session network.
    ///
    /// Consumes the session; call exactly once, on every path out of a
    /// scenario. Teardown keeps going past individual failures so one
    /// stuck container cannot leak the rest.
    pub async fn cleanup(self) -> SandboxResult<()> {
        let mut failures = Vec::new();

        for container in &self.containers {
            let Some(id) = container.id.as_deref() else {
                continue;
            };
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(e) = self.docker.remove_container(id, Some(options)).await {
                warn!(container = %container.spec.name, error = %e, "failed to remove container");
                failures.push(format!("container {}: {e}", container.spec.name));
            }
        }

        if let Some(ref network) = self.network {
            if let Err(e) = self.docker.remove_network(network).await {
                warn!(network = %network, error = %e, "failed to remove network");
                failures.push(format!("network {network}: {e}"));
            }
        }

        if failures.is_empty() {
            info!(scenario = %self.scenario, session = %self.session_id, "sandbox cleaned up");
            Ok(())
        } else {
            Err(SandboxError::Cleanup(failures.join("; ")))
        }
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn start_container(&mut self, index: usize) -> SandboxResult<()> {
        let spec = self.containers[index].spec.clone();
        let docker_name = self.container_docker_name(&spec.name);

        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
            .published_ports
            .iter()
            .map(|(host, container)| {
                (
                    format!("{container}/tcp"),
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(host.to_string()),
                    }]),
                )
            })
            .collect();

        let host_config = HostConfig {
            binds: (!spec.volume_binds.is_empty()).then(|| spec.volume_binds.clone()),
            cap_add: (!spec.capabilities.is_empty()).then(|| spec.capabilities.clone()),
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            network_mode: self.network.clone(),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: (!spec.command.is_empty()).then(|| spec.command.clone()),
            labels: Some(self.labels()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: docker_name.as_str(),
            platform: None,
        };
        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| SandboxError::Container(format!("create {}: {e}", spec.name)))?;
        self.containers[index].id = Some(created.id.clone());

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::Container(format!("start {}: {e}", spec.name)))?;
        debug!(scenario = %self.scenario, container = %spec.name, image = %spec.image, "container started");
        Ok(())
    }

    /// Wait for a container to exit, enforcing the timeout. Returns the
    /// exit code, with `TIMEOUT_EXIT_CODE` on expiry.
    async fn wait_container(&self, index: usize, timeout: Option<Duration>) -> i64 {
        let name = &self.containers[index].spec.name;
        let Some(id) = self.containers[index].id.as_deref() else {
            return TIMEOUT_EXIT_CODE;
        };

        let wait = self.collect_exit_code(id);
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(code) => code,
                Err(_) => {
                    warn!(container = %name, ?limit, "container timed out, killing");
                    let options = KillContainerOptions { signal: "SIGKILL" };
                    if let Err(e) = self.docker.kill_container(id, Some(options)).await {
                        warn!(container = %name, error = %e, "failed to kill timed-out container");
                    }
                    TIMEOUT_EXIT_CODE
                }
            },
            None => wait.await,
        }
    }

    /// Stop a long-running service container and collect its exit code.
    async fn stop_and_collect(&self, index: usize) -> i64 {
        let name = &self.containers[index].spec.name;
        let Some(id) = self.containers[index].id.as_deref() else {
            return TIMEOUT_EXIT_CODE;
        };
        let options = StopContainerOptions { t: STOP_GRACE_SECS };
        if let Err(e) = self.docker.stop_container(id, Some(options)).await {
            warn!(container = %name, error = %e, "failed to stop service container");
        }
        self.collect_exit_code(id).await
    }

    async fn collect_exit_code(&self, id: &str) -> i64 {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => response.status_code,
            // bollard reports non-zero exits as a typed error.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
            Some(Err(e)) => {
                warn!(container_id = %id, error = %e, "wait failed");
                TIMEOUT_EXIT_CODE
            }
            None => TIMEOUT_EXIT_CODE,
        }
    }
}
