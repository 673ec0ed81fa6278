use crate::cancel::CancelToken;
use crate::executor::{ExecError, Executor, command_line};
use bollard::models::{ContainerInspectResponse, HealthStatusEnum};
use log::{debug, trace};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub(crate) type ContainerID = String;

#[derive(Debug, Error)]
pub enum InspectError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("unexpected inspect output")]
    Decode(#[from] serde_json::Error),
    #[error("inspect returned no container")]
    Empty,
}

impl InspectError {
    pub(crate) fn exec_error(&self) -> Option<&ExecError> {
        match self {
            InspectError::Exec(e) => Some(e),
            _ => None,
        }
    }

    fn is_cancelled(&self) -> bool {
        matches!(self, InspectError::Exec(ExecError::Cancelled))
    }
}

/// What the runtime reports about one container, read fresh for every decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerObservation {
    pub id: ContainerID,
    pub name: String,
    /// Id of the image the container was created from.
    pub image: String,
    pub labels: HashMap<String, String>,
    /// Network name to the aliases the container answers to on it.
    pub networks: HashMap<String, Vec<String>>,
    pub binds: Vec<String>,
}

impl ContainerObservation {
    pub fn has_alias(&self, network: &str, alias: &str) -> bool {
        self.networks
            .get(network)
            .is_some_and(|aliases| aliases.iter().any(|a| a == alias))
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// `name (abc123def456)`, for messages an operator has to act on.
    pub fn describe(&self) -> String {
        let short: String = self.id.chars().take(12).collect();
        if self.name.is_empty() {
            short
        } else {
            format!("{} ({short})", self.name)
        }
    }
}

impl From<ContainerInspectResponse> for ContainerObservation {
    fn from(details: ContainerInspectResponse) -> Self {
        let config = details.config.unwrap_or_default();
        let networks = details
            .network_settings
            .and_then(|settings| settings.networks)
            .unwrap_or_default()
            .into_iter()
            .map(|(network, endpoint)| (network, endpoint.aliases.unwrap_or_default()))
            .collect();
        ContainerObservation {
            id: details.id.unwrap_or_default(),
            name: details
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            image: details.image.unwrap_or_default(),
            labels: config.labels.unwrap_or_default(),
            networks,
            binds: details
                .host_config
                .and_then(|host| host.binds)
                .unwrap_or_default(),
        }
    }
}

/// Decodes the JSON array `docker inspect` prints for a single target.
pub fn parse_inspect(output: &str) -> Result<ContainerObservation, InspectError> {
    let details: Vec<ContainerInspectResponse> = serde_json::from_str(output)?;
    details
        .into_iter()
        .next()
        .map(ContainerObservation::from)
        .ok_or(InspectError::Empty)
}

/// The container runtime's CLI, spoken through an [`Executor`].
///
/// Every command is bounded by `timeout`. Commands issued through the
/// cancellable entry points also give up as soon as `cancel` fires; rollback
/// and cleanup use the uncancellable ones so they can run after an abort.
pub(crate) struct DockerCli {
    executor: Arc<dyn Executor>,
    timeout: Duration,
    cancel: CancelToken,
}

impl DockerCli {
    pub(crate) fn new(executor: Arc<dyn Executor>, timeout: Duration, cancel: CancelToken) -> Self {
        Self {
            executor,
            timeout,
            cancel,
        }
    }

    pub(crate) fn set_cancel(&mut self, cancel: CancelToken) {
        self.cancel = cancel;
    }

    pub(crate) fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    async fn exec(&self, command: &str, args: Vec<String>, cancellable: bool) -> Result<String, ExecError> {
        debug!("{}", command_line(command, &args));
        let run = tokio::time::timeout(self.timeout, self.executor.run(command, &args));
        let output = if cancellable {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ExecError::Cancelled),
                output = run => output,
            }
        } else {
            run.await
        };
        let output = output.map_err(|_| ExecError::TimedOut(self.timeout))??;
        let output = String::from_utf8_lossy(&output).trim().to_string();
        trace!("output: {output}");
        Ok(output)
    }

    async fn docker<I, S>(&self, args: I) -> Result<String, ExecError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec("docker", args.into_iter().map(Into::into).collect(), true)
            .await
    }

    async fn docker_uncancellable<I, S>(&self, args: I) -> Result<String, ExecError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec("docker", args.into_iter().map(Into::into).collect(), false)
            .await
    }

    /// Pulls `image` and returns the id of what is now tagged locally.
    pub(crate) async fn pull(&self, image: &str) -> Result<String, ExecError> {
        self.docker(["pull", image]).await?;
        self.docker(["image", "inspect", "--format={{.Id}}", image]).await
    }

    pub(crate) async fn network_names(&self) -> Result<Vec<String>, ExecError> {
        let output = self.docker(["network", "ls", "--format", "{{.Name}}"]).await?;
        Ok(output.lines().map(|l| l.trim().to_string()).collect())
    }

    pub(crate) async fn create_network(&self, network: &str) -> Result<(), ExecError> {
        self.docker(["network", "create", network]).await.map(|_| ())
    }

    /// Inspect succeeding is taken as "exists"; any failure other than
    /// cancellation as "absent".
    pub(crate) async fn volume_exists(&self, volume: &str) -> Result<bool, ExecError> {
        match self.docker(["volume", "inspect", volume]).await {
            Ok(_) => Ok(true),
            Err(ExecError::Cancelled) => Err(ExecError::Cancelled),
            Err(e) => {
                trace!("volume {volume} not found: {e}");
                Ok(false)
            }
        }
    }

    pub(crate) async fn create_volume(&self, volume: &str) -> Result<(), ExecError> {
        self.docker(["volume", "create", volume]).await.map(|_| ())
    }

    pub(crate) async fn inspect(&self, target: &str) -> Result<ContainerObservation, InspectError> {
        let output = self.docker(["inspect", "--type=container", target]).await?;
        parse_inspect(&output)
    }

    async fn inspect_each(&self, ids: String) -> Result<Vec<ContainerObservation>, InspectError> {
        let mut containers = Vec::new();
        for id in ids.split_whitespace() {
            match self.inspect(id).await {
                Ok(container) => containers.push(container),
                Err(e) if e.is_cancelled() => return Err(e),
                // gone between listing and inspecting
                Err(e) => debug!("skipping container {id}: {e}"),
            }
        }
        Ok(containers)
    }

    /// The container answering `alias` on `network`, found by scanning every
    /// container attached to the network rather than by container name.
    pub(crate) async fn find_by_alias(
        &self,
        network: &str,
        alias: &str,
    ) -> Result<Option<ContainerObservation>, InspectError> {
        let ids = self
            .docker(["ps", "-aq", "--filter", format!("network={network}").as_str()])
            .await?;
        let containers = self.inspect_each(ids).await?;
        Ok(containers.into_iter().find(|c| c.has_alias(network, alias)))
    }

    pub(crate) async fn find_by_name(&self, name: &str) -> Result<Option<ContainerObservation>, InspectError> {
        let ids = self
            .docker(["ps", "-aq", "--filter", format!("name=^{name}$").as_str()])
            .await?;
        let containers = self.inspect_each(ids).await?;
        Ok(containers.into_iter().find(|c| c.name == name))
    }

    pub(crate) async fn health_status(&self, container: &str) -> Result<HealthStatusEnum, InspectError> {
        let output = self
            .docker(["inspect", "--format={{json .State.Health.Status}}", container])
            .await?;
        Ok(serde_json::from_str(&output)?)
    }

    pub(crate) async fn run_container(&self, args: Vec<String>) -> Result<ContainerID, ExecError> {
        self.exec("docker", args, true).await
    }

    pub(crate) async fn network_connect(&self, network: &str, container: &str, alias: &str) -> Result<(), ExecError> {
        self.docker(["network", "connect", "--alias", alias, network, container])
            .await
            .map(|_| ())
    }

    pub(crate) async fn network_disconnect(&self, network: &str, container: &str) -> Result<(), ExecError> {
        self.docker(["network", "disconnect", network, container])
            .await
            .map(|_| ())
    }

    /// Like [`Self::network_disconnect`] but never abandoned half way.
    pub(crate) async fn network_disconnect_uncancellable(&self, network: &str, container: &str) -> Result<(), ExecError> {
        self.docker_uncancellable(["network", "disconnect", network, container])
            .await
            .map(|_| ())
    }

    pub(crate) async fn stop(&self, container: &str) -> Result<(), ExecError> {
        self.docker_uncancellable(["stop", container]).await.map(|_| ())
    }

    pub(crate) async fn remove(&self, container: &str) -> Result<(), ExecError> {
        self.docker_uncancellable(["rm", container]).await.map(|_| ())
    }

    pub(crate) async fn force_remove(&self, container: &str) -> Result<(), ExecError> {
        self.docker_uncancellable(["rm", "-f", container]).await.map(|_| ())
    }

    pub(crate) async fn rename(&self, container: &str, name: &str) -> Result<(), ExecError> {
        self.docker_uncancellable(["rename", container, name])
            .await
            .map(|_| ())
    }

    /// Runs `command` inside the running `container`.
    pub(crate) async fn exec_in(&self, container: &str, command: &[&str]) -> Result<String, ExecError> {
        let mut args = vec!["exec".to_string(), container.to_string()];
        args.extend(command.iter().map(|arg| arg.to_string()));
        self.exec("docker", args, true).await
    }

    /// Contents of `path` on the target host, `None` if it cannot be read.
    pub(crate) async fn read_file(&self, path: &str) -> Result<Option<String>, ExecError> {
        match self.exec("cat", vec![path.to_string()], true).await {
            Ok(contents) => Ok(Some(contents)),
            Err(ExecError::Cancelled) => Err(ExecError::Cancelled),
            Err(e) => {
                trace!("cannot read {path}: {e}");
                Ok(None)
            }
        }
    }

    pub(crate) async fn home_dir(&self) -> Result<String, ExecError> {
        self.exec("sh", vec!["-c".to_string(), "echo $HOME".to_string()], true)
            .await
    }

    pub(crate) async fn mkdir_all(&self, path: &str) -> Result<(), ExecError> {
        self.exec("mkdir", vec!["-p".to_string(), path.to_string()], true)
            .await
            .map(|_| ())
    }

    pub(crate) async fn copy_file(&self, local: &Path, remote: &str) -> Result<(), ExecError> {
        debug!("copy {} -> {remote}", local.display());
        let copy = tokio::time::timeout(self.timeout, self.executor.copy_file(local, remote));
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ExecError::Cancelled),
            copied = copy => copied.map_err(|_| ExecError::TimedOut(self.timeout))?,
        }
    }
}
