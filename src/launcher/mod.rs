//! Launching of distributed training jobs across a static set of hosts.
//!
//! A launch sweeps every host listed in the [`HostFile`] for processes of a previous run with
//! a [`RemoteShell`] and then starts the new job with a [`Submitter`].

mod hosts;
#[allow(clippy::module_inception)]
mod launcher;
mod remote;
mod submit;

pub use self::{
    hosts::{
        HostDescriptor,
        HostEntryError,
        HostFile,
        HostList,
        HostListError,
        DEFAULT_SSH_PORT,
    },
    launcher::{LaunchError, LaunchReport, Launcher, Termination},
    remote::{kill_command, RemoteShell, SshShell, TerminationError},
    submit::{DmlcSubmitter, SubmitError, SubmitJob, Submitter},
};

#[cfg(test)]
pub use self::{remote::MockRemoteShell, submit::MockSubmitter};
