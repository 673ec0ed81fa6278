use super::Deployment;
use crate::docker::InspectError;
use crate::error::{DeployError, Result};
use crate::executor::ExecError;
use crate::service::HealthCheck;
use bollard::models::HealthStatusEnum;
use log::debug;

impl Deployment {
    /// Polls the runtime's health status of `container` at a fixed interval,
    /// up to `check.retries` times. No check means nothing to wait for.
    pub(super) async fn await_healthy(&self, container: &str, check: Option<&HealthCheck>) -> Result<()> {
        let Some(check) = check else {
            return Ok(());
        };

        for attempt in 1..=check.retries {
            match self.docker.health_status(container).await {
                Ok(HealthStatusEnum::HEALTHY) => {
                    debug!("{container} is healthy after {attempt} attempts");
                    return Ok(());
                }
                Ok(status) => debug!(
                    "{container} reports {status:?} ({attempt}/{})",
                    check.retries
                ),
                Err(InspectError::Exec(ExecError::Cancelled)) => {
                    return Err(DeployError::Cancelled {
                        during: format!("health check of {container}"),
                    });
                }
                Err(e) => debug!(
                    "health of {container} unknown ({attempt}/{}): {e}",
                    check.retries
                ),
            }

            if attempt < check.retries && !self.pause(check.interval).await {
                return Err(DeployError::Cancelled {
                    during: format!("health check of {container}"),
                });
            }
        }

        Err(DeployError::Unhealthy {
            container: container.to_string(),
            attempts: check.retries,
        })
    }
}
