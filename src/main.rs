mod cli;

use crate::cli::configure_cli;
use env_logger::Env;
use gantry::{Deployment, Executor, LocalExecutor, SshExecutor, cancellation, load_config};
use log::{error, info, warn};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error + 'static>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = configure_cli();

    let mut config = load_config(&cli.config_path)?;
    if let Some(project) = cli.project {
        config.project.name = project;
    }

    let executor: Arc<dyn Executor> = match &cli.host {
        Some(host) => {
            info!("deploying {} to {host}", config.project.name);
            Arc::new(SshExecutor::new(host.clone(), cli.port))
        }
        None => {
            info!("deploying {} to the local runtime", config.project.name);
            Arc::new(LocalExecutor::new())
        }
    };

    let (cancel, token) = cancellation();
    ctrlc::set_handler(move || {
        warn!("Received shutdown signal, aborting after the current step...");
        cancel.cancel();
    })?;

    let deployment = Deployment::new(executor, config.settings.clone()).with_cancel(token);
    match deployment.deploy(&config).await {
        Ok(()) => {
            info!("deployment of {} complete", config.project.name);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            // the failing step already logged the cause chain
            error!("deployment of {} stopped in {} phase", config.project.name, e.phase());
            Ok(ExitCode::FAILURE)
        }
    }
}
