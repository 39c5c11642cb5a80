//! Submission of distributed training jobs.

use std::{ffi::OsString, io, path::PathBuf, process::Stdio};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::mpsc,
};
use tracing::{debug, info};

/// Error that occurs while submitting a job.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("failed to start {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read the output of {}: {source}", .program.display())]
    Output {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} exited unsuccessfully with exit code {code:?}", .program.display())]
    Exit { program: PathBuf, code: Option<i32> },
}

/// A distributed training job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitJob {
    /// The cluster backend of the submission tool, e.g. `ssh`.
    pub cluster: String,
    /// The number of workers to start.
    pub workers: u32,
    /// The host list to spread the workers across.
    pub host_file: PathBuf,
    /// The memory allocated to each worker, e.g. `4g`.
    pub worker_memory: String,
    pub interpreter: PathBuf,
    pub entry_point: PathBuf,
}

impl SubmitJob {
    /// The arguments of the submission tool.
    pub fn args(&self) -> Vec<OsString> {
        vec![
            "--cluster".into(),
            self.cluster.clone().into(),
            "--num-workers".into(),
            self.workers.to_string().into(),
            "--host-file".into(),
            self.host_file.clone().into(),
            "--worker-memory".into(),
            self.worker_memory.clone().into(),
            self.interpreter.clone().into(),
            self.entry_point.clone().into(),
        ]
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
/// Starts distributed training jobs.
pub trait Submitter: Send + Sync {
    /// Submits `job` and forwards the output of the submission, line by line, to `output`.
    ///
    /// Resolves once the submission finished, which is not necessarily when the training job
    /// finished.
    async fn submit(
        &self,
        job: &SubmitJob,
        output: mpsc::Sender<String>,
    ) -> Result<(), SubmitError>;
}

/// Forwards a raw output line. The tool's output is not necessarily valid UTF-8.
async fn forward(output: &mpsc::Sender<String>, mut line: Vec<u8>) {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    // the caller may stop listening, the submission goes on regardless
    let _ = output
        .send(String::from_utf8_lossy(&line).into_owned())
        .await;
}

/// A [`Submitter`] using the `dmlc-submit` tracker script.
#[derive(Debug, Clone)]
pub struct DmlcSubmitter {
    program: PathBuf,
}

impl DmlcSubmitter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Submitter for DmlcSubmitter {
    async fn submit(
        &self,
        job: &SubmitJob,
        output: mpsc::Sender<String>,
    ) -> Result<(), SubmitError> {
        let program = &self.program;
        info!("starting {} with {} workers", program.display(), job.workers);

        // the child is killed when the submission is dropped, e.g. when it is cancelled
        let mut child = Command::new(program)
            .args(job.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SubmitError::Spawn {
                program: program.clone(),
                source,
            })?;

        let to_output_err = |source: io::Error| SubmitError::Output {
            program: program.clone(),
            source,
        };
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| to_output_err(io::Error::new(io::ErrorKind::Other, "no stdout")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| to_output_err(io::Error::new(io::ErrorKind::Other, "no stderr")))?;

        let mut stdout = BufReader::new(stdout).split(b'\n');
        let mut stderr = BufReader::new(stderr).split(b'\n');
        let (mut stdout_open, mut stderr_open) = (true, true);
        while stdout_open || stderr_open {
            tokio::select! {
                line = stdout.next_segment(), if stdout_open => match line.map_err(to_output_err)? {
                    Some(line) => forward(&output, line).await,
                    None => stdout_open = false,
                },
                line = stderr.next_segment(), if stderr_open => match line.map_err(to_output_err)? {
                    Some(line) => forward(&output, line).await,
                    None => stderr_open = false,
                },
            }
        }

        let status = child.wait().await.map_err(to_output_err)?;
        debug!("{} exited with {}", program.display(), status);
        if status.success() {
            Ok(())
        } else {
            Err(SubmitError::Exit {
                program: program.clone(),
                code: status.code(),
            })
        }
    }
}
