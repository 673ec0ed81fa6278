use super::Deployment;
use crate::error::{DeployError, Result};
use crate::service::{CONFIG_HASH_LABEL, Service, namespace_volume};
use log::debug;
use std::time::Duration;

/// Formats a duration the way the runtime's `--health-*` flags expect it.
fn runtime_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{millis}ms")
    }
}

/// Arguments for `docker run` starting `service` as `container`, reachable on
/// the project network under an alias equal to the container name.
pub(crate) fn run_args(project: &str, service: &Service, container: &str) -> Vec<String> {
    let mut args: Vec<String> = [
        "run",
        "-d",
        "--name",
        container,
        "--network",
        project,
        "--network-alias",
        container,
    ]
    .into_iter()
    .map(String::from)
    .collect();

    for (key, value) in &service.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }

    for volume in &service.volumes {
        args.push("-v".to_string());
        args.push(namespace_volume(project, volume));
    }

    if let Some(check) = &service.health_check {
        args.extend([
            "--health-cmd".to_string(),
            format!(
                "curl -sf http://localhost:{}{} || exit 1",
                service.port, check.path
            ),
            "--health-interval".to_string(),
            runtime_duration(check.interval),
            "--health-retries".to_string(),
            check.retries.to_string(),
            "--health-timeout".to_string(),
            runtime_duration(check.timeout),
        ]);
    }

    for forward in &service.forwards {
        args.push("-p".to_string());
        args.push(forward.clone());
    }

    args.push("--label".to_string());
    args.push(format!("{CONFIG_HASH_LABEL}={}", service.config_hash()));
    args.push(service.image.clone());
    args
}

impl Deployment {
    pub(super) async fn launch(&self, project: &str, service: &Service, container: &str) -> Result<()> {
        let id = self
            .docker
            .run_container(run_args(project, service, container))
            .await
            .map_err(|source| DeployError::Launch {
                container: container.to_string(),
                source,
            })?;
        debug!("started {container} ({id})");
        Ok(())
    }
}
