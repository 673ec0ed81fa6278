use log::{error, info};
use std::error::Error;

/// Presentation hook around each unit of deployment work. Implementations
/// must not influence control flow.
pub trait Progress: Send + Sync {
    fn start(&self, message: &str);
    fn success(&self, message: &str);
    fn failure(&self, message: &str, error: &dyn Error);
}

/// Reports progress through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl Progress for LogProgress {
    fn start(&self, message: &str) {
        info!("{message}...");
    }

    fn success(&self, message: &str) {
        info!("{message}");
    }

    fn failure(&self, message: &str, error: &dyn Error) {
        error!("{message} failed: {}", report(error));
    }
}

/// Renders an error with all of its causes, `outer: inner: root`.
pub fn report(error: &dyn Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
