//! An in-process [`DirectoryService`].
//!
//! All clones of an [`InMemoryDirectory`] share the same records, which makes it possible to
//! simulate several parties working against one directory.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;

use crate::{
    records::{FederationRecord, IdentityRecord, MembershipAssertion},
    storage::{DirectoryService, StorageResult},
};

#[derive(Debug, Default)]
struct Records {
    identities: HashMap<String, IdentityRecord>,
    federations: HashMap<String, FederationRecord>,
    memberships: HashMap<String, MembershipAssertion>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    records: Arc<Mutex<Records>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> StorageResult<MutexGuard<'_, Records>> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("in-memory directory is poisoned"))
    }

    /// Returns the number of membership assertions, including those which no longer count
    /// towards any quorum.
    pub fn membership_count(&self) -> StorageResult<usize> {
        Ok(self.records()?.memberships.len())
    }
}

#[async_trait]
impl DirectoryService for InMemoryDirectory {
    async fn set_identity(&mut self, record: &IdentityRecord) -> StorageResult<()> {
        self.records()?
            .identities
            .insert(record.username.clone(), record.clone());
        Ok(())
    }

    async fn identity(&mut self, username: &str) -> StorageResult<Option<IdentityRecord>> {
        Ok(self.records()?.identities.get(username).cloned())
    }

    async fn set_federation(&mut self, record: &FederationRecord) -> StorageResult<()> {
        self.records()?
            .federations
            .insert(record.master.clone(), record.clone());
        Ok(())
    }

    async fn federation(&mut self, master: &str) -> StorageResult<Option<FederationRecord>> {
        Ok(self.records()?.federations.get(master).cloned())
    }

    async fn federation_with_member(
        &mut self,
        master: &str,
        member: &str,
    ) -> StorageResult<Option<FederationRecord>> {
        Ok(self
            .records()?
            .federations
            .get(master)
            .filter(|record| record.contains(member))
            .cloned())
    }

    async fn set_membership(&mut self, assertion: &MembershipAssertion) -> StorageResult<()> {
        self.records()?
            .memberships
            .insert(assertion.member.clone(), assertion.clone());
        Ok(())
    }

    async fn membership(&mut self, member: &str) -> StorageResult<Option<MembershipAssertion>> {
        Ok(self.records()?.memberships.get(member).cloned())
    }

    async fn is_ready(&mut self) -> StorageResult<()> {
        self.records().map(|_| ())
    }
}
