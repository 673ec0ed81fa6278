use super::{ExecError, Executor, check_output, command_line};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use log::trace;
use std::path::Path;
use tokio::process::Command;

/// Executes commands on a remote host through the system `ssh` and `scp`
/// binaries. Authentication is whatever the local ssh configuration provides.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    destination: String,
    port: Option<u16>,
}

impl SshExecutor {
    /// `destination` is anything ssh accepts, typically `user@host`.
    pub fn new(destination: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            destination: destination.into(),
            port,
        }
    }

    fn ssh_args(&self, command: &str, args: &[String]) -> Vec<String> {
        let mut ssh_args = vec!["-o".to_string(), "BatchMode=yes".to_string()];
        if let Some(port) = self.port {
            ssh_args.push("-p".to_string());
            ssh_args.push(port.to_string());
        }
        ssh_args.push(self.destination.clone());
        ssh_args.push("--".to_string());

        // the remote side runs the command through a shell, so every
        // argument has to survive one round of word splitting
        let mut remote = shell_quote(command);
        for arg in args {
            remote.push(' ');
            remote.push_str(&shell_quote(arg));
        }
        ssh_args.push(remote);
        ssh_args
    }

    fn scp_args(&self, local: &Path, remote: &str) -> Vec<String> {
        let mut scp_args = vec!["-q".to_string(), "-o".to_string(), "BatchMode=yes".to_string()];
        if let Some(port) = self.port {
            scp_args.push("-P".to_string());
            scp_args.push(port.to_string());
        }
        scp_args.push(local.display().to_string());
        scp_args.push(format!("{}:{}", self.destination, remote));
        scp_args
    }
}

impl Executor for SshExecutor {
    fn run<'a>(
        &'a self,
        command: &'a str,
        args: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<u8>, ExecError>> {
        async move {
            let line = command_line(command, args);
            trace!("ssh {}: {line}", self.destination);
            let output = Command::new("ssh")
                .args(self.ssh_args(command, args))
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|source| ExecError::Spawn {
                    command: line.clone(),
                    source,
                })?;
            check_output(line, output)
        }
        .boxed()
    }

    fn copy_file<'a>(&'a self, local: &'a Path, remote: &'a str) -> BoxFuture<'a, Result<(), ExecError>> {
        async move {
            let args = self.scp_args(local, remote);
            let line = command_line("scp", &args);
            trace!("{line}");
            let output = Command::new("scp")
                .args(&args)
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|source| ExecError::Spawn {
                    command: line.clone(),
                    source,
                })?;
            check_output(line, output).map(|_| ())
        }
        .boxed()
    }
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
