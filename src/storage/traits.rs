//! Directory service API.

use async_trait::async_trait;

use crate::records::{FederationRecord, IdentityRecord, MembershipAssertion};

/// The error type for storage operations that are not directly related to application domain.
/// These include, for example IO errors like broken pipe, connection refused, etc.
pub type StorageError = anyhow::Error;

/// The result of the storage operation.
pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
/// An abstract directory of identities and federation memberships shared by all parties.
///
/// Every write is an upsert on the unique key of the record: the last writer wins and no fields
/// of the previous record survive. Implementations must not cache records, since other parties
/// write to the same directory concurrently.
pub trait DirectoryService
where
    Self: Clone + Send + Sync + 'static,
{
    /// Sets the [`IdentityRecord`] of `record.username`.
    ///
    /// # Behavior
    ///
    /// - If no record exists for the user yet, set it and return `StorageResult::Ok(())`.
    /// - If a record already exists, replace it and return `StorageResult::Ok(())`.
    async fn set_identity(&mut self, record: &IdentityRecord) -> StorageResult<()>;

    /// Returns the [`IdentityRecord`] of `username`.
    ///
    /// # Behavior
    ///
    /// - If the record does not exist, return `StorageResult::Ok(Option::None)`.
    /// - If the record exists, return `StorageResult::Ok(Option::Some(IdentityRecord))`.
    async fn identity(&mut self, username: &str) -> StorageResult<Option<IdentityRecord>>;

    /// Sets the [`FederationRecord`] of `record.master`, replacing any previous declaration.
    async fn set_federation(&mut self, record: &FederationRecord) -> StorageResult<()>;

    /// Returns the [`FederationRecord`] declared by `master`.
    ///
    /// # Behavior
    ///
    /// - If the record does not exist, return `StorageResult::Ok(Option::None)`.
    /// - If the record exists, return `StorageResult::Ok(Option::Some(FederationRecord))`.
    async fn federation(&mut self, master: &str) -> StorageResult<Option<FederationRecord>>;

    /// Returns the [`FederationRecord`] declared by `master` if its members contain `member`.
    ///
    /// # Behavior
    ///
    /// - If the record does not exist or does not list `member`, return
    ///   `StorageResult::Ok(Option::None)`.
    /// - Otherwise, return `StorageResult::Ok(Option::Some(FederationRecord))`.
    async fn federation_with_member(
        &mut self,
        master: &str,
        member: &str,
    ) -> StorageResult<Option<FederationRecord>>;

    /// Sets the [`MembershipAssertion`] of `assertion.member`, replacing any previous assertion.
    async fn set_membership(&mut self, assertion: &MembershipAssertion) -> StorageResult<()>;

    /// Returns the [`MembershipAssertion`] of `member`.
    ///
    /// # Behavior
    ///
    /// - If the member never asserted a membership, return `StorageResult::Ok(Option::None)`.
    /// - Otherwise, return `StorageResult::Ok(Option::Some(MembershipAssertion))`.
    async fn membership(&mut self, member: &str) -> StorageResult<Option<MembershipAssertion>>;

    /// Checks if the [`DirectoryService`] is ready to process requests.
    ///
    /// # Behavior
    ///
    /// If the [`DirectoryService`] is ready to process requests, return `StorageResult::Ok(())`.
    /// If the [`DirectoryService`] cannot process requests because of a connection error,
    /// for example, return `StorageResult::Err(error)`.
    async fn is_ready(&mut self) -> StorageResult<()>;
}
