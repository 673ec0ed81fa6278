use super::{ExecError, Executor, check_output, command_line};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use log::trace;
use std::path::Path;
use tokio::process::Command;

/// Executes commands on the machine gantry runs on.
#[derive(Debug, Default, Clone)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for LocalExecutor {
    fn run<'a>(
        &'a self,
        command: &'a str,
        args: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<u8>, ExecError>> {
        async move {
            let line = command_line(command, args);
            trace!("local: {line}");
            let output = Command::new(command)
                .args(args)
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
            tokio::fs::copy(local, remote).await?;
            Ok(())
        }
        .boxed()
    }
}
