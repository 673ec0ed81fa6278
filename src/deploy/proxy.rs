use super::{DeployOutcome, Deployment};
use crate::config::ProjectConfig;
use crate::error::{DeployError, Result};
use crate::executor::ExecError;
use crate::proxy::{PROXY_SERVICE, proxy_service, render_config};
use log::{debug, info};
use std::io::Write;

const RELOAD_COMMAND: [&str; 3] = ["nginx", "-s", "reload"];

impl Deployment {
    /// Renders the proxy configuration, stages it on the target host and
    /// deploys the proxy like any other service.
    ///
    /// A fresh proxy picks the staged file up when it starts. A running one
    /// first goes through the service path for image drift, then gets the new
    /// file and reloads in place, so a topology change never replaces the
    /// container holding the host ports.
    pub async fn start_proxy(&self, config: &ProjectConfig) -> Result<DeployOutcome> {
        let project = config.project.name.as_str();
        let project_dir = self.prepare_project_dir(project).await?;
        let config_dir = format!("{project_dir}/nginx");
        let remote = format!("{config_dir}/default.conf");
        let rendered = render_config(config);
        let service = proxy_service(config, &self.settings.proxy_image, &project_dir, &config_dir);

        let running = self.current_container(project, &service).await?.is_some();
        if !running {
            self.stage_proxy_config(&config_dir, &remote, &rendered)
                .await?;
        }

        let outcome = self
            .deploy_service(project, &service)
            .await
            .map_err(|e| e.context("failed to deploy service", PROXY_SERVICE))?;

        if running && self.proxy_config_changed(&remote, &rendered).await? {
            self.stage_proxy_config(&config_dir, &remote, &rendered)
                .await?;
            self.reload_proxy().await?;
        }
        Ok(outcome)
    }

    /// `$HOME/projects/<project>` on the target host, created if missing.
    async fn prepare_project_dir(&self, project: &str) -> Result<String> {
        let home = self
            .docker
            .home_dir()
            .await
            .map_err(|source| DeployError::Stage {
                path: "$HOME".to_string(),
                source,
            })?;
        let project_dir = format!("{}/projects/{project}", home.trim_end_matches('/'));
        self.docker
            .mkdir_all(&project_dir)
            .await
            .map_err(|source| DeployError::Stage {
                path: project_dir.clone(),
                source,
            })?;
        Ok(project_dir)
    }

    async fn proxy_config_changed(&self, remote: &str, rendered: &str) -> Result<bool> {
        let staged = self
            .docker
            .read_file(remote)
            .await
            .map_err(|source| DeployError::Stage {
                path: remote.to_string(),
                source,
            })?;
        Ok(staged.as_deref() != Some(rendered.trim()))
    }

    async fn stage_proxy_config(&self, config_dir: &str, remote: &str, rendered: &str) -> Result<()> {
        let failed = |source| DeployError::Stage {
            path: remote.to_string(),
            source,
        };

        self.docker.mkdir_all(config_dir).await.map_err(failed)?;

        let mut staged = tempfile::Builder::new()
            .prefix("nginx-config-")
            .suffix(".conf")
            .tempfile()
            .map_err(|e| failed(ExecError::Io(e)))?;
        staged
            .write_all(rendered.trim().as_bytes())
            .and_then(|_| staged.flush())
            .map_err(|e| failed(ExecError::Io(e)))?;

        self.docker
            .copy_file(staged.path(), remote)
            .await
            .map_err(failed)?;
        debug!("staged proxy configuration at {remote}");
        Ok(())
    }

    async fn reload_proxy(&self) -> Result<()> {
        self.docker
            .exec_in(PROXY_SERVICE, &RELOAD_COMMAND)
            .await
            .map_err(|source| DeployError::Reload {
                container: PROXY_SERVICE.to_string(),
                source,
            })?;
        info!("{PROXY_SERVICE} reloaded with the new configuration");
        Ok(())
    }
}
