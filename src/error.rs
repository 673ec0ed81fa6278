//! Errors surfaced by the deployment engine.
//!
//! Every [`DeployError`] carries a [`Phase`] so callers can react to where a
//! deployment stopped without matching on messages.

use crate::docker::InspectError;
use crate::executor::ExecError;
use std::fmt;
use thiserror::Error;

pub type Result<T, E = DeployError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Provision,
    Pull,
    Inspect,
    Launch,
    Health,
    Cutover,
    Cleanup,
    Rollback,
    Reconcile,
    Proxy,
    Cancelled,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Provision => "provision",
            Phase::Pull => "pull",
            Phase::Inspect => "inspect",
            Phase::Launch => "launch",
            Phase::Health => "health",
            Phase::Cutover => "cutover",
            Phase::Cleanup => "cleanup",
            Phase::Rollback => "rollback",
            Phase::Reconcile => "reconcile",
            Phase::Proxy => "proxy",
            Phase::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("failed to provision {resource}")]
    Provision {
        resource: String,
        #[source]
        source: ExecError,
    },
    #[error("failed to pull image {image}")]
    Pull {
        image: String,
        #[source]
        source: ExecError,
    },
    #[error("failed to inspect {target}")]
    Inspect {
        target: String,
        #[source]
        source: InspectError,
    },
    #[error("failed to launch container {container}")]
    Launch {
        container: String,
        #[source]
        source: ExecError,
    },
    #[error("container {container} did not become healthy after {attempts} attempts")]
    Unhealthy { container: String, attempts: u32 },
    /// `state` spells out which container holds the service alias at the
    /// moment the switch stopped.
    #[error("traffic switch for {service} failed at `{step}` ({state})")]
    Cutover {
        service: String,
        step: String,
        state: String,
        #[source]
        source: ExecError,
    },
    #[error("cleanup for {service} failed at `{step}` ({state})")]
    Cleanup {
        service: String,
        step: String,
        state: String,
        #[source]
        source: ExecError,
    },
    /// The shadow could not be removed after `cause` aborted the update. The
    /// original container is still serving, the shadow is left behind.
    #[error("failed to remove shadow container {container} after: {cause}")]
    Rollback {
        container: String,
        cause: Box<DeployError>,
        #[source]
        source: ExecError,
    },
    #[error("{service} is in a partial cutover state: {detail}")]
    Reconcile { service: String, detail: String },
    #[error("failed to stage proxy configuration at {path}")]
    Stage {
        path: String,
        #[source]
        source: ExecError,
    },
    #[error("failed to reload the configuration of {container}")]
    Reload {
        container: String,
        #[source]
        source: ExecError,
    },
    #[error("cancelled during {during}")]
    Cancelled { during: String },
    #[error("{action} {service}")]
    Service {
        action: &'static str,
        service: String,
        #[source]
        source: Box<DeployError>,
    },
}

impl DeployError {
    /// Wraps `self` with the service it happened for, like
    /// `failed to deploy service api`.
    pub(crate) fn context(self, action: &'static str, service: &str) -> Self {
        DeployError::Service {
            action,
            service: service.to_string(),
            source: Box::new(self),
        }
    }

    /// Where the deployment stopped. Cancellation wins over the phase the
    /// cancelled command belonged to.
    pub fn phase(&self) -> Phase {
        if let Some(ExecError::Cancelled) = self.exec_source() {
            return Phase::Cancelled;
        }
        match self {
            DeployError::Provision { .. } => Phase::Provision,
            DeployError::Pull { .. } => Phase::Pull,
            DeployError::Inspect { .. } => Phase::Inspect,
            DeployError::Launch { .. } => Phase::Launch,
            DeployError::Unhealthy { .. } => Phase::Health,
            DeployError::Cutover { .. } => Phase::Cutover,
            DeployError::Cleanup { .. } => Phase::Cleanup,
            DeployError::Rollback { .. } => Phase::Rollback,
            DeployError::Reconcile { .. } => Phase::Reconcile,
            DeployError::Stage { .. } | DeployError::Reload { .. } => Phase::Proxy,
            DeployError::Cancelled { .. } => Phase::Cancelled,
            DeployError::Service { source, .. } => source.phase(),
        }
    }

    /// The failure that made the engine roll a shadow back, when removing the
    /// shadow failed as well.
    pub fn rollback_cause(&self) -> Option<&DeployError> {
        match self {
            DeployError::Rollback { cause, .. } => Some(cause.as_ref()),
            DeployError::Service { source, .. } => source.rollback_cause(),
            _ => None,
        }
    }

    fn exec_source(&self) -> Option<&ExecError> {
        match self {
            DeployError::Provision { source, .. }
            | DeployError::Pull { source, .. }
            | DeployError::Launch { source, .. }
            | DeployError::Cutover { source, .. }
            | DeployError::Cleanup { source, .. }
            | DeployError::Rollback { source, .. }
            | DeployError::Stage { source, .. }
            | DeployError::Reload { source, .. } => Some(source),
            DeployError::Inspect { source, .. } => source.exec_error(),
            DeployError::Service { source, .. } => source.exec_source(),
            DeployError::Unhealthy { .. }
            | DeployError::Reconcile { .. }
            | DeployError::Cancelled { .. } => None,
        }
    }
}
