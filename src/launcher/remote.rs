//! Remote termination of stale training processes.

use std::{path::PathBuf, process::Stdio, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::{launcher::HostDescriptor, settings::SshSettings};

/// The exit status ssh reports when it failed itself, as opposed to the remote command.
const SSH_FAILURE: i32 = 255;

/// Error that occurs while terminating the processes on a host.
#[derive(Debug, Error)]
pub enum TerminationError {
    #[error("{host} is unreachable: {reason}")]
    Unreachable {
        host: HostDescriptor,
        reason: String,
    },

    #[error("{host} did not respond within {}s", .after.as_secs())]
    Timeout {
        host: HostDescriptor,
        after: Duration,
    },

    #[error("terminating the processes on {host} failed with exit code {code:?}")]
    Failed {
        host: HostDescriptor,
        code: Option<i32>,
    },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
/// A remote shell to the hosts of a training job.
pub trait RemoteShell: Send + Sync {
    /// Kills every process on `host` whose command line contains `process_name`.
    ///
    /// Succeeds if no such process runs on the host.
    async fn terminate(
        &self,
        host: &HostDescriptor,
        process_name: &str,
    ) -> Result<(), TerminationError>;
}

/// Builds the remote command which kills the processes matching `process_name`.
///
/// The first character of the pattern is wrapped in a bracket expression so that the pattern
/// doesn't match the command line of the remote shell running it.
pub fn kill_command(process_name: &str) -> String {
    let mut chars = process_name.chars();
    let pattern = match chars.next() {
        Some(first) => format!("[{}]{}", first, chars.as_str()),
        None => String::new(),
    };
    format!("pkill -9 -f '{}' || true", pattern)
}

/// A [`RemoteShell`] using the `ssh` client.
#[derive(Debug, Clone)]
pub struct SshShell {
    program: PathBuf,
    strict_host_key_checking: bool,
    connect_timeout: u64,
}

impl SshShell {
    pub fn new(strict_host_key_checking: bool, connect_timeout: u64) -> Self {
        Self {
            program: PathBuf::from("ssh"),
            strict_host_key_checking,
            connect_timeout,
        }
    }

    /// Uses `program` instead of the `ssh` client found on the `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn args(&self, host: &HostDescriptor, process_name: &str) -> Vec<String> {
        let checking = if self.strict_host_key_checking {
            "yes"
        } else {
            "no"
        };
        vec![
            "-o".into(),
            format!("StrictHostKeyChecking={}", checking),
            "-o".into(),
            format!("ConnectTimeout={}", self.connect_timeout),
            "-o".into(),
            "BatchMode=yes".into(),
            "-p".into(),
            host.port.to_string(),
            host.host.clone(),
            kill_command(process_name),
        ]
    }
}

impl From<&SshSettings> for SshShell {
    fn from(settings: &SshSettings) -> Self {
        Self::new(settings.strict_host_key_checking, settings.connect_timeout)
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn terminate(
        &self,
        host: &HostDescriptor,
        process_name: &str,
    ) -> Result<(), TerminationError> {
        let args = self.args(host, process_name);
        debug!("{} {}", self.program.display(), args.join(" "));

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| TerminationError::Unreachable {
                host: host.clone(),
                reason: err.to_string(),
            })?;

        match output.status.code() {
            Some(0) => Ok(()),
            Some(SSH_FAILURE) => Err(TerminationError::Unreachable {
                host: host.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            code => Err(TerminationError::Failed {
                host: host.clone(),
                code,
            }),
        }
    }
}
