use super::{DeployOutcome, Deployment};
use crate::error::{DeployError, Result};
use crate::service::{Dependency, Service, namespace_volume};
use log::{debug, info};

impl Deployment {
    /// Creates the project network unless it is already there.
    pub async fn ensure_network(&self, project: &str) -> Result<()> {
        let failed = |source| DeployError::Provision {
            resource: format!("network {project}"),
            source,
        };
        let networks = self.docker.network_names().await.map_err(failed)?;
        if networks.iter().any(|n| n == project) {
            debug!("network {project} already exists");
            return Ok(());
        }
        self.docker.create_network(project).await.map_err(failed)?;
        info!("created network {project}");
        Ok(())
    }

    /// Creates the named volume `<project>-<volume>` unless it is already there.
    pub async fn ensure_volume(&self, project: &str, volume: &str) -> Result<()> {
        let name = namespace_volume(project, volume);
        let failed = |source| DeployError::Provision {
            resource: format!("volume {name}"),
            source,
        };
        if self.docker.volume_exists(&name).await.map_err(failed)? {
            debug!("volume {name} already exists");
            return Ok(());
        }
        self.docker.create_volume(&name).await.map_err(failed)?;
        info!("created volume {name}");
        Ok(())
    }

    /// Starts an auxiliary workload through the regular service path, without
    /// a health gate.
    pub async fn start_dependency(&self, project: &str, dependency: &Dependency) -> Result<DeployOutcome> {
        self.deploy_service(project, &Service::from(dependency)).await
    }
}
