use super::Deployment;
use crate::docker::ContainerObservation;
use crate::error::{DeployError, Result};
use crate::executor::ExecError;
use crate::service::Service;
use log::{info, warn};

impl Deployment {
    /// Hands the service alias from `old` to the healthy `shadow`.
    ///
    /// The shadow joins under the canonical alias while `old` still holds it,
    /// both answer for the settling interval, then `old` leaves the network.
    /// Cancellation before `old` is disconnected removes the shadow again; a
    /// failing command is reported with the alias state it left behind.
    pub(super) async fn switch_traffic(
        &self,
        project: &str,
        service: &Service,
        old: &ContainerObservation,
        shadow: &str,
    ) -> Result<()> {
        let name = service.name.as_str();
        let old_desc = old.describe();

        if self.docker.cancel_token().is_cancelled() {
            return self.abort_cutover(shadow, "traffic switch").await;
        }

        let step = format!("docker network disconnect {project} {shadow}");
        if let Err(source) = self.docker.network_disconnect(project, shadow).await {
            let state = format!("alias `{name}` still held by {old_desc}; {shadow} is running but not switched");
            return self.cutover_failed(service, shadow, step, state, source).await;
        }

        let step = format!("docker network connect --alias {name} {project} {shadow}");
        if let Err(source) = self.docker.network_connect(project, shadow, name).await {
            let state = format!("alias `{name}` still held by {old_desc}; {shadow} is disconnected from {project}");
            return self.cutover_failed(service, shadow, step, state, source).await;
        }

        if !self.pause(self.settings.settle_interval).await {
            return self.abort_cutover(shadow, "cutover settling").await;
        }

        // once started, retiring the old container must not be interrupted:
        // a dropped command could leave nobody answering the alias
        let step = format!("docker network disconnect {project} {}", old.id);
        if let Err(source) = self
            .docker
            .network_disconnect_uncancellable(project, &old.id)
            .await
        {
            let state = format!("alias `{name}` held by both {old_desc} and {shadow}");
            return self.cutover_failed(service, shadow, step, state, source).await;
        }

        info!("traffic for {name} switched from {old_desc} to {shadow}");
        Ok(())
    }

    /// Retires `old` and gives the shadow the canonical container name.
    /// Runs to completion even when cancellation was requested meanwhile.
    pub(super) async fn cleanup(&self, service: &Service, old: &ContainerObservation, shadow: &str) -> Result<()> {
        let name = service.name.as_str();
        let old_desc = old.describe();
        let failed = |step: String, state: String, source: ExecError| DeployError::Cleanup {
            service: name.to_string(),
            step,
            state,
            source,
        };

        self.docker.stop(&old.id).await.map_err(|source| {
            failed(
                format!("docker stop {}", old.id),
                format!("{shadow} serves alias `{name}`; {old_desc} is disconnected but still running"),
                source,
            )
        })?;
        self.docker.remove(&old.id).await.map_err(|source| {
            failed(
                format!("docker rm {}", old.id),
                format!("{shadow} serves alias `{name}`; {old_desc} is stopped but not removed"),
                source,
            )
        })?;
        self.docker.rename(shadow, name).await.map_err(|source| {
            failed(
                format!("docker rename {shadow} {name}"),
                format!("{shadow} serves alias `{name}`; {old_desc} is removed"),
                source,
            )
        })?;

        info!("{shadow} renamed to {name}");
        Ok(())
    }

    async fn cutover_failed(
        &self,
        service: &Service,
        shadow: &str,
        step: String,
        state: String,
        source: ExecError,
    ) -> Result<()> {
        if matches!(source, ExecError::Cancelled) {
            return self.abort_cutover(shadow, &step).await;
        }
        Err(DeployError::Cutover {
            service: service.name.clone(),
            step,
            state,
            source,
        })
    }

    /// The old container still answers the alias at every point this is
    /// reachable from, so dropping the shadow restores the pre-update state.
    async fn abort_cutover(&self, shadow: &str, during: &str) -> Result<()> {
        warn!("cancellation requested during {during}");
        let cancelled = DeployError::Cancelled {
            during: during.to_string(),
        };
        Err(self.rollback(shadow, cancelled).await)
    }
}
