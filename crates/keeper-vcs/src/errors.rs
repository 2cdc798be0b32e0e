use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("`git {args}` exited with {status}\nstdout: {stdout}\nstderr: {stderr}")]
    Command {
        args: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("`git {args}` timed out after {timeout:?}")]
    Timeout { args: String, timeout: Duration },

    #[error("working tree is not configured for backups: {0}")]
    NotConfigured(&'static str),

    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl VcsError {
    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}
