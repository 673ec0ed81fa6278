//! The deployment engine.
//!
//! A deployment provisions the project network and volumes, starts the
//! dependencies, then reconciles each service against what the runtime
//! reports: missing services are installed, drifted ones replaced through a
//! health gated blue-green cutover, and unchanged ones left alone. The proxy
//! goes last and takes the same path as every other service; a routing change
//! alone is applied by reloading it in place.
//!
//! The engine runs strictly sequentially. Two callers deploying the same
//! project at once are not guarded against here.
mod cutover;
mod health;
mod launch;
mod provision;
mod proxy;

use crate::cancel::CancelToken;
use crate::config::{ProjectConfig, Settings};
use crate::docker::{ContainerObservation, DockerCli};
use crate::error::{DeployError, Result};
use crate::executor::Executor;
use crate::progress::{LogProgress, Progress};
use crate::service::{CONFIG_HASH_LABEL, Service};
use log::{debug, info, warn};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Appended to a service name for the replacement container during an update.
pub const SHADOW_SUFFIX: &str = "_new";

pub fn shadow_name(service: &str) -> String {
    format!("{service}{SHADOW_SUFFIX}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateReason {
    ImageChanged,
    ConfigChanged,
}

impl fmt::Display for UpdateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateReason::ImageChanged => f.write_str("image change"),
            UpdateReason::ConfigChanged => f.write_str("config change"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOutcome {
    Installed,
    Updated(UpdateReason),
    Unchanged,
}

pub struct Deployment {
    docker: DockerCli,
    settings: Settings,
    progress: Box<dyn Progress>,
}

impl Deployment {
    pub fn new(executor: Arc<dyn Executor>, settings: Settings) -> Self {
        let docker = DockerCli::new(executor, settings.command_timeout, CancelToken::never());
        Self {
            docker,
            settings,
            progress: Box::new(LogProgress),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.docker.set_cancel(cancel);
        self
    }

    pub fn with_progress(mut self, progress: impl Progress + 'static) -> Self {
        self.progress = Box::new(progress);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Runs the whole pipeline for `config`: network, volumes, dependencies,
    /// services and finally the proxy. Stops at the first failure.
    pub async fn deploy(&self, config: &ProjectConfig) -> Result<()> {
        let project = config.project.name.as_str();

        self.step("Creating network", "Network created", self.ensure_network(project))
            .await?;

        self.step("Creating volumes", "Volumes created", async {
            for volume in &config.volumes {
                self.ensure_volume(project, volume).await?;
            }
            Ok(())
        })
        .await?;

        for dependency in &config.dependencies {
            self.step(
                format!("Creating dependency {}", dependency.name),
                format!("Dependency {} created", dependency.name),
                self.start_dependency(project, dependency),
            )
            .await
            .map_err(|e| e.context("failed to create dependency", &dependency.name))?;
        }

        for service in &config.services {
            self.step(
                format!("Deploying service {}", service.name),
                format!("Service {} deployed", service.name),
                self.deploy_service(project, service),
            )
            .await
            .map_err(|e| e.context("failed to deploy service", &service.name))?;
        }

        self.step("Starting proxy", "Proxy started", self.start_proxy(config))
            .await?;
        Ok(())
    }

    /// Brings `service` to its desired state and reports what that took.
    ///
    /// Image drift and config drift are checked separately: a moving tag can
    /// point at a new image while the definition stays the same, and the
    /// definition can change while the image does not.
    pub async fn deploy_service(&self, project: &str, service: &Service) -> Result<DeployOutcome> {
        let image_id = self.pull(service).await?;
        self.reconcile_shadow(project, service).await?;

        let Some(current) = self.current_container(project, service).await? else {
            info!("{} is not running yet, installing", service.name);
            self.install(project, service)
                .await
                .map_err(|e| e.context("failed to install service", &service.name))?;
            return Ok(DeployOutcome::Installed);
        };

        let reason = if current.image != image_id {
            UpdateReason::ImageChanged
        } else if current.label(CONFIG_HASH_LABEL) != Some(service.config_hash().as_str()) {
            UpdateReason::ConfigChanged
        } else {
            debug!("{} is up to date in {}", service.name, current.describe());
            return Ok(DeployOutcome::Unchanged);
        };

        info!("updating {} due to {reason}", service.name);
        self.update(project, service, &current)
            .await
            .map_err(|e| e.context("failed to update service", &service.name))?;
        Ok(DeployOutcome::Updated(reason))
    }

    /// Pulls the image and starts `service` under its canonical name. A
    /// container that fails its health gate is left in place for inspection.
    pub async fn install_service(&self, project: &str, service: &Service) -> Result<()> {
        self.pull(service).await?;
        self.install(project, service)
            .await
            .map_err(|e| e.context("failed to install service", &service.name))
    }

    /// Pulls the image and replaces the running container of `service`
    /// through a blue-green cutover.
    pub async fn update_service(&self, project: &str, service: &Service) -> Result<()> {
        self.pull(service).await?;
        self.reconcile_shadow(project, service).await?;
        let current = self
            .current_container(project, service)
            .await?
            .ok_or_else(|| DeployError::Reconcile {
                service: service.name.clone(),
                detail: format!("no container answers alias `{}` on {project}", service.name),
            })?;
        self.update(project, service, &current)
            .await
            .map_err(|e| e.context("failed to update service", &service.name))
    }

    async fn pull(&self, service: &Service) -> Result<String> {
        self.docker
            .pull(&service.image)
            .await
            .map_err(|source| DeployError::Pull {
                image: service.image.clone(),
                source,
            })
    }

    async fn current_container(&self, project: &str, service: &Service) -> Result<Option<ContainerObservation>> {
        self.docker
            .find_by_alias(project, &service.name)
            .await
            .map_err(|source| DeployError::Inspect {
                target: format!("containers on network {project}"),
                source,
            })
    }

    /// Removes a shadow container left behind by an interrupted update.
    ///
    /// A leftover that still answers the canonical alias means an earlier
    /// cutover stopped half way; that state is reported, not repaired.
    async fn reconcile_shadow(&self, project: &str, service: &Service) -> Result<()> {
        let shadow = shadow_name(&service.name);
        let stale = self
            .docker
            .find_by_name(&shadow)
            .await
            .map_err(|source| DeployError::Inspect {
                target: shadow.clone(),
                source,
            })?;
        let Some(stale) = stale else {
            return Ok(());
        };

        if stale.has_alias(project, &service.name) {
            return Err(DeployError::Reconcile {
                service: service.name.clone(),
                detail: format!(
                    "{} answers alias `{}` on {project}; finish or revert that cutover by hand",
                    stale.describe(),
                    service.name
                ),
            });
        }

        warn!("removing orphaned shadow container {}", stale.describe());
        self.docker
            .force_remove(&stale.id)
            .await
            .map_err(|source| DeployError::Cleanup {
                service: service.name.clone(),
                step: format!("docker rm -f {}", stale.id),
                state: format!("{} is left over from an earlier update", stale.describe()),
                source,
            })
    }

    async fn install(&self, project: &str, service: &Service) -> Result<()> {
        self.launch(project, service, &service.name).await?;
        self.await_healthy(&service.name, service.health_check.as_ref())
            .await
    }

    async fn update(&self, project: &str, service: &Service, current: &ContainerObservation) -> Result<()> {
        let shadow = shadow_name(&service.name);

        if let Err(e) = self.launch(project, service, &shadow).await {
            // the runtime can leave a created but unstarted container behind
            if let Err(cleanup) = self.docker.force_remove(&shadow).await {
                debug!("nothing to remove for {shadow}: {cleanup}");
            }
            return Err(e);
        }

        if let Err(e) = self
            .await_healthy(&shadow, service.health_check.as_ref())
            .await
        {
            return Err(self.rollback(&shadow, e).await);
        }

        self.switch_traffic(project, service, current, &shadow)
            .await?;
        self.cleanup(service, current, &shadow).await
    }

    /// Force removes the shadow after `cause` aborted an update and returns
    /// the error to surface. The original container was never touched.
    async fn rollback(&self, shadow: &str, cause: DeployError) -> DeployError {
        warn!("rolling back {shadow}: {cause}");
        match self.docker.force_remove(shadow).await {
            Ok(()) => {
                info!("rollback complete, {shadow} removed");
                cause
            }
            Err(source) => DeployError::Rollback {
                container: shadow.to_string(),
                cause: Box::new(cause),
                source,
            },
        }
    }

    async fn step<T, F>(&self, start: impl Into<String>, done: impl Into<String>, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let start = start.into();
        self.progress.start(&start);
        match work.await {
            Ok(value) => {
                self.progress.success(&done.into());
                Ok(value)
            }
            Err(e) => {
                self.progress.failure(&start, &e);
                Err(e)
            }
        }
    }

    /// Waits `duration` unless cancelled first.
    async fn pause(&self, duration: std::time::Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.docker.cancel_token().cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
