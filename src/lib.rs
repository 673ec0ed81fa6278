//! Zero-downtime container deployments on a single host.
//!
//! [`Deployment`] drives a container runtime through an [`Executor`]:
//! it provisions the project network and volumes, starts dependencies,
//! installs or blue-green updates each service behind a health gate, and
//! finally deploys the reverse proxy through the same path.
pub mod cancel;
pub mod config;
pub mod deploy;
pub mod docker;
pub mod error;
pub mod executor;
pub mod progress;
pub mod proxy;
pub mod service;

pub use cancel::{CancelHandle, CancelToken, cancellation};
pub use config::{Project, ProjectConfig, Settings, load_config};
pub use deploy::{DeployOutcome, Deployment, SHADOW_SUFFIX, UpdateReason, shadow_name};
pub use error::{DeployError, Phase};
pub use executor::{ExecError, Executor, LocalExecutor, SshExecutor};
pub use service::{Dependency, HealthCheck, Route, Service};
