use async_trait::async_trait;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::{
    federation::{Coordinator, Party},
    records::{FederationRecord, IdentityRecord, MembershipAssertion},
    storage::{DirectoryService, InMemoryDirectory, StorageResult},
};

pub fn enable_logging() {
    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(true)
        .try_init();
}

pub fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

pub fn as_master(username: &str, directory: &InMemoryDirectory) -> Coordinator<InMemoryDirectory> {
    Coordinator::new(Party::master(username), directory.clone())
}

pub fn as_worker(username: &str, directory: &InMemoryDirectory) -> Coordinator<InMemoryDirectory> {
    Coordinator::new(Party::worker(username), directory.clone())
}

/// A directory whose backend is gone.
#[derive(Clone)]
pub struct UnavailableDirectory;

fn unavailable<T>() -> StorageResult<T> {
    Err(anyhow::anyhow!("connection refused"))
}

#[async_trait]
impl DirectoryService for UnavailableDirectory {
    async fn set_identity(&mut self, _: &IdentityRecord) -> StorageResult<()> {
        unavailable()
    }

    async fn identity(&mut self, _: &str) -> StorageResult<Option<IdentityRecord>> {
        unavailable()
    }

    async fn set_federation(&mut self, _: &FederationRecord) -> StorageResult<()> {
        unavailable()
    }

    async fn federation(&mut self, _: &str) -> StorageResult<Option<FederationRecord>> {
        unavailable()
    }

    async fn federation_with_member(
        &mut self,
        _: &str,
        _: &str,
    ) -> StorageResult<Option<FederationRecord>> {
        unavailable()
    }

    async fn set_membership(&mut self, _: &MembershipAssertion) -> StorageResult<()> {
        unavailable()
    }

    async fn membership(&mut self, _: &str) -> StorageResult<Option<MembershipAssertion>> {
        unavailable()
    }

    async fn is_ready(&mut self) -> StorageResult<()> {
        unavailable()
    }
}
