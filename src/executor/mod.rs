//! Command execution against the target host.
//!
//! Everything the engine does to the remote container runtime goes through
//! [`Executor`]. Concrete transports live in [`local`] and [`ssh`]; tests plug
//! in an in-memory runtime.
mod local;
mod ssh;

pub use local::LocalExecutor;
pub use ssh::SshExecutor;

use futures_util::future::BoxFuture;
use std::path::Path;
use std::process::Output;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {}: {stderr}", status.map_or("signal".to_string(), |c| format!("status {c}")))]
    Failed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("cancelled")]
    Cancelled,
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

/// Runs commands and copies files on the host that owns the container runtime.
pub trait Executor: Send + Sync {
    /// Runs `command` with `args` and returns its captured stdout.
    fn run<'a>(&'a self, command: &'a str, args: &'a [String])
    -> BoxFuture<'a, Result<Vec<u8>, ExecError>>;

    fn copy_file<'a>(&'a self, local: &'a Path, remote: &'a str)
    -> BoxFuture<'a, Result<(), ExecError>>;
}

pub(crate) fn command_line(command: &str, args: &[String]) -> String {
    let mut line = command.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Turns a finished process into stdout or a [`ExecError::Failed`].
pub(crate) fn check_output(command: String, output: Output) -> Result<Vec<u8>, ExecError> {
    if output.status.success() {
        return Ok(output.stdout);
    }
    Err(ExecError::Failed {
        command,
        status: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}
