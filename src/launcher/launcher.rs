use std::{future::Future, path::Path, time::Duration};

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::{sync::mpsc, time};
use tracing::{debug, error, info, warn};

use crate::{
    launcher::{
        HostDescriptor,
        HostFile,
        HostList,
        HostListError,
        RemoteShell,
        SubmitError,
        SubmitJob,
        Submitter,
        TerminationError,
    },
    settings::LauncherSettings,
};

/// The outcome of the termination of the stale processes on a host.
pub type Termination = (HostDescriptor, Result<(), TerminationError>);

/// Error that occurs while launching a training job.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("invalid party count {0}: at least one worker is required")]
    InvalidPartyCount(u32),

    #[error(transparent)]
    HostList(#[from] HostListError),

    #[error("submission failed: {0}")]
    SubmissionFailed(#[from] SubmitError),

    #[error("the launch was cancelled")]
    Cancelled,
}

/// The report of a successful launch.
#[derive(Debug)]
pub struct LaunchReport {
    /// The termination outcome of every host, in the order of the host list.
    pub terminations: Vec<Termination>,
}

impl LaunchReport {
    /// The hosts whose stale processes were terminated.
    pub fn terminated(&self) -> impl Iterator<Item = &HostDescriptor> {
        self.terminations
            .iter()
            .filter(|(_, outcome)| outcome.is_ok())
            .map(|(host, _)| host)
    }

    /// The hosts which were skipped, together with the reason.
    pub fn skipped(&self) -> impl Iterator<Item = (&HostDescriptor, &TerminationError)> {
        self.terminations
            .iter()
            .filter_map(|(host, outcome)| outcome.as_ref().err().map(|err| (host, err)))
    }
}

/// Relaunches training jobs across a static set of hosts.
///
/// A launch first sweeps the hosts for processes of a previous run and then submits the new
/// job. The sweep is advisory: a host which can't be cleaned up is skipped with a warning.
pub struct Launcher<R, S> {
    shell: R,
    submitter: S,
    settings: LauncherSettings,
}

impl<R, S> Launcher<R, S>
where
    R: RemoteShell,
    S: Submitter,
{
    pub fn new(shell: R, submitter: S, settings: LauncherSettings) -> Self {
        Self {
            shell,
            submitter,
            settings,
        }
    }

    /// Terminates the stale training processes on every host.
    ///
    /// At most `max_concurrent_terminations` hosts are contacted at once and every host gets
    /// `termination_timeout` to respond. Failures are logged and reported, never returned.
    pub async fn sweep(&self, hosts: &HostList) -> Vec<Termination> {
        let timeout = Duration::from_secs(self.settings.termination_timeout);
        let process_name = self.settings.process_name.as_str();
        let shell = &self.shell;

        stream::iter(hosts.iter().cloned())
            .map(|host| async move {
                let outcome = match time::timeout(timeout, shell.terminate(&host, process_name))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(TerminationError::Timeout {
                        host: host.clone(),
                        after: timeout,
                    }),
                };
                match &outcome {
                    Ok(()) => debug!(host = %host, "terminated stale processes"),
                    Err(err) => warn!(host = %host, "skipping host: {}", err),
                }
                (host, outcome)
            })
            .buffered(self.settings.max_concurrent_terminations.max(1))
            .collect()
            .await
    }

    /// Launches a training job with `party_count` workers spread across `hosts`.
    ///
    /// The output of the submission is forwarded to `output`. The launch resolves once the
    /// submission tool exited, or with [`LaunchError::Cancelled`] as soon as `cancel`
    /// resolves. Cancelling kills the submission tool.
    pub async fn launch<C>(
        &self,
        hosts: &HostFile,
        party_count: u32,
        output: mpsc::Sender<String>,
        cancel: C,
    ) -> Result<LaunchReport, LaunchError>
    where
        C: Future<Output = ()>,
    {
        if party_count == 0 {
            error!("refusing to launch a job without workers");
            return Err(LaunchError::InvalidPartyCount(party_count));
        }
        if hosts.hosts().is_empty() {
            error!("no hosts listed in {}", hosts.path().display());
            return Err(HostListError::Empty {
                path: hosts.path().to_path_buf(),
            }
            .into());
        }

        tokio::pin!(cancel);

        let terminations = tokio::select! {
            terminations = self.sweep(hosts.hosts()) => terminations,
            _ = &mut cancel => return Err(cancelled()),
        };

        let job = self.job(hosts.path(), party_count);
        tokio::select! {
            result = self.submitter.submit(&job, output) => {
                if let Err(err) = result {
                    error!("failed to launch the training job: {}", err);
                    return Err(err.into());
                }
            }
            _ = &mut cancel => return Err(cancelled()),
        }

        info!(
            workers = party_count,
            hosts = hosts.hosts().len(),
            "submitted the training job"
        );
        Ok(LaunchReport { terminations })
    }

    fn job(&self, host_file: &Path, workers: u32) -> SubmitJob {
        SubmitJob {
            cluster: self.settings.cluster.clone(),
            workers,
            host_file: host_file.to_path_buf(),
            worker_memory: self.settings.worker_memory.clone(),
            interpreter: self.settings.interpreter.clone(),
            entry_point: self.settings.entry_point.clone(),
        }
    }
}

fn cancelled() -> LaunchError {
    warn!("launch cancelled");
    LaunchError::Cancelled
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        launcher::{MockRemoteShell, MockSubmitter},
        settings::SshSettings,
    };

    fn settings() -> LauncherSettings {
        LauncherSettings {
            host_file: "hosts.config".into(),
            submit_program: "dmlc-submit".into(),
            cluster: "ssh".into(),
            worker_memory: "4g".into(),
            interpreter: "python3".into(),
            entry_point: "train_model.py".into(),
            process_name: "train_model.py".into(),
            termination_timeout: 1,
            max_concurrent_terminations: 2,
            ssh: SshSettings {
                strict_host_key_checking: true,
                connect_timeout: 1,
            },
        }
    }

    fn host_file(entries: &[&str]) -> HostFile {
        HostFile::new(
            "hosts.config",
            HostList::parse(&entries.join("\n")).unwrap(),
        )
    }

    fn never() -> futures::future::Pending<()> {
        futures::future::pending()
    }

    #[tokio::test]
    async fn test_unreachable_host_does_not_stop_launch() {
        let mut shell = MockRemoteShell::new();
        shell
            .expect_terminate()
            .withf(|host, name| host.host != "10.0.0.2" && name == "train_model.py")
            .times(2)
            .returning(|_, _| Ok(()));
        shell
            .expect_terminate()
            .withf(|host, _| host.host == "10.0.0.2")
            .times(1)
            .returning(|host, _| {
                Err(TerminationError::Unreachable {
                    host: host.clone(),
                    reason: "connection refused".into(),
                })
            });

        let mut submitter = MockSubmitter::new();
        submitter
            .expect_submit()
            .withf(|job, _| job.workers == 3 && job.host_file == Path::new("hosts.config"))
            .times(1)
            .returning(|_, _| Ok(()));

        let launcher = Launcher::new(shell, submitter, settings());
        let (tx, _rx) = mpsc::channel(16);
        let report = launcher
            .launch(
                &host_file(&["10.0.0.1", "10.0.0.2", "10.0.0.3:2222"]),
                3,
                tx,
                never(),
            )
            .await
            .unwrap();

        assert_eq!(
            report.terminated().cloned().collect::<Vec<_>>(),
            vec![
                HostDescriptor::new("10.0.0.1", 22),
                HostDescriptor::new("10.0.0.3", 2222),
            ]
        );
        let skipped: Vec<_> = report.skipped().collect();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].0, &HostDescriptor::new("10.0.0.2", 22));
        assert!(matches!(
            skipped[0].1,
            TerminationError::Unreachable { .. }
        ));
    }

    /// Hangs on one host and counts the hosts it terminated.
    #[derive(Clone, Default)]
    struct HangingShell {
        terminated: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RemoteShell for HangingShell {
        async fn terminate(
            &self,
            host: &HostDescriptor,
            _process_name: &str,
        ) -> Result<(), TerminationError> {
            if host.host == "hanging" {
                futures::future::pending::<()>().await;
            }
            self.terminated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sweep_times_out_per_host() {
        let shell = HangingShell::default();
        let launcher = Launcher::new(shell.clone(), MockSubmitter::new(), settings());

        let hosts = HostList::parse("10.0.0.1\nhanging\n10.0.0.3\n10.0.0.4\n").unwrap();
        let outcomes = launcher.sweep(&hosts).await;

        assert_eq!(outcomes.len(), 4);
        assert_eq!(shell.terminated.load(Ordering::SeqCst), 3);
        assert!(matches!(
            &outcomes[1],
            (host, Err(TerminationError::Timeout { .. })) if host.host == "hanging"
        ));
        assert!(outcomes
            .iter()
            .enumerate()
            .all(|(i, (_, outcome))| i == 1 || outcome.is_ok()));
    }

    #[tokio::test]
    async fn test_submission_failure_is_returned() {
        let mut shell = MockRemoteShell::new();
        shell.expect_terminate().returning(|_, _| Ok(()));
        let mut submitter = MockSubmitter::new();
        submitter.expect_submit().returning(|_, _| {
            Err(SubmitError::Exit {
                program: "dmlc-submit".into(),
                code: Some(2),
            })
        });

        let launcher = Launcher::new(shell, submitter, settings());
        let (tx, _rx) = mpsc::channel(16);
        let err = launcher
            .launch(&host_file(&["10.0.0.1"]), 1, tx, never())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LaunchError::SubmissionFailed(SubmitError::Exit { code: Some(2), .. })
        ));
    }

    /// A submission which never finishes on its own.
    struct EndlessSubmitter;

    #[async_trait]
    impl Submitter for EndlessSubmitter {
        async fn submit(
            &self,
            _job: &SubmitJob,
            output: mpsc::Sender<String>,
        ) -> Result<(), SubmitError> {
            let _ = output.send("tracker started".into()).await;
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_submission() {
        let mut shell = MockRemoteShell::new();
        shell.expect_terminate().returning(|_, _| Ok(()));
        let launcher = Launcher::new(shell, EndlessSubmitter, settings());

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = async {
            let _ = rx.recv().await;
        };
        let err = launcher
            .launch(&host_file(&["10.0.0.1"]), 1, tx, cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Cancelled));
    }

    #[tokio::test]
    async fn test_invalid_launches_are_refused_before_the_sweep() {
        let mut shell = MockRemoteShell::new();
        shell.expect_terminate().times(0);
        let mut submitter = MockSubmitter::new();
        submitter.expect_submit().times(0);
        let launcher = Launcher::new(shell, submitter, settings());

        let (tx, _rx) = mpsc::channel(16);
        let err = launcher
            .launch(&host_file(&["10.0.0.1"]), 0, tx.clone(), never())
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::InvalidPartyCount(0)));

        let err = launcher
            .launch(&host_file(&[]), 2, tx, never())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LaunchError::HostList(HostListError::Empty { .. })
        ));
    }
}
