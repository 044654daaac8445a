//! Startup sweep for sandbox resources orphaned by a killed process.

use std::collections::HashMap;

use bollard::Docker;
use bollard::container::{ListContainersOptions, RemoveContainerOptions};
use bollard::network::ListNetworksOptions;
use tracing::{info, warn};

use crate::error::SandboxResult;
use crate::session::SESSION_LABEL;

/// Remove every container and network carrying the session label.
///
/// A process kill mid-scenario leaves its session resources behind;
/// nothing else creates resources with this label, so at daemon
/// startup (before any session exists) everything labelled is an
/// orphan. Returns `(containers_removed, networks_removed)`.
pub async fn sweep_orphans(docker: &Docker) -> SandboxResult<(usize, usize)> {
    let filters = HashMap::from([("label", vec![SESSION_LABEL])]);

    let containers = docker
        .list_containers(Some(ListContainersOptions {
            all: true,
            filters: filters.clone(),
            ..Default::default()
        }))
        .await?;

    let mut containers_removed = 0;
    for container in &containers {
        let Some(id) = container.id.as_deref() else {
            continue;
        };
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match docker.remove_container(id, Some(options)).await {
            Ok(()) => containers_removed += 1,
            Err(e) => warn!(container_id = %id, error = %e, "failed to remove orphaned container"),
        }
    }

    let networks = docker
        .list_networks(Some(ListNetworksOptions { filters }))
        .await?;

    let mut networks_removed = 0;
    for network in &networks {
        let Some(name) = network.name.as_deref() else {
            continue;
        };
        match docker.remove_network(name).await {
            Ok(()) => networks_removed += 1,
            Err(e) => warn!(network = %name, error = %e, "failed to remove orphaned network"),
        }
    }

    if containers_removed > 0 || networks_removed > 0 {
        info!(
            containers = containers_removed,
            networks = networks_removed,
            "swept orphaned sandbox resources"
        );
    }
    Ok((containers_removed, networks_removed))
}
