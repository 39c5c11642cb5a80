//! The membership coordinator.
//!
//! Joining a federation takes two steps. First, the master declares the intended members by
//! writing the [`FederationRecord`]. Then every member confirms by writing its own
//! [`MembershipAssertion`]. A federation only reaches quorum once both steps agree for every
//! declared member.

use std::time::Duration;

use derive_more::Display;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::{
    records::{FederationRecord, MembershipAssertion, Role},
    storage::{DirectoryService, StorageError},
};

/// Error that occurs while managing a federation.
#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("{member} may not join the federation of {master}: not declared as a member")]
    Unauthorized { member: String, master: String },

    #[error("federation of {master} does not exist")]
    FederationNotFound { master: String },

    #[error("federation of {master} is incomplete, waiting for: {}", .missing.join(", "))]
    IncompleteQuorum { master: String, missing: Vec<String> },

    #[error(
        "federation of {master} did not complete in time, waiting for: {}",
        .missing.join(", ")
    )]
    Timeout { master: String, missing: Vec<String> },

    #[error("{username} must act as {required} to perform this operation")]
    RoleMismatch { username: String, required: Role },

    #[error("directory service failed: {0}")]
    Storage(#[from] StorageError),
}

/// A user acting in a federation.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
#[display(fmt = "{} ({})", username, role)]
pub struct Party {
    pub username: String,
    pub role: Role,
}

impl Party {
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            role,
        }
    }

    /// A party which declares its own federation.
    pub fn master(username: impl Into<String>) -> Self {
        Self::new(username, Role::Master)
    }

    /// A party which joins the federation of a master.
    pub fn worker(username: impl Into<String>) -> Self {
        Self::new(username, Role::Worker)
    }

    fn require(&self, required: Role) -> Result<(), MembershipError> {
        if self.role == required {
            Ok(())
        } else {
            Err(MembershipError::RoleMismatch {
                username: self.username.clone(),
                required,
            })
        }
    }
}

/// The federation a party is bound to, identified by its master.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
#[display(fmt = "{}", master)]
pub struct FederationBinding {
    pub master: String,
}

impl FederationBinding {
    pub fn new(master: impl Into<String>) -> Self {
        Self {
            master: master.into(),
        }
    }
}

/// Why a federation has not reached quorum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incomplete {
    /// The master never declared the federation.
    FederationMissing,
    /// The declared members which did not confirm their membership yet.
    MembersPending(Vec<String>),
}

/// The quorum of a federation, recomputed from the directory on every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuorumState {
    /// No federation is bound.
    NoFederation,
    Incomplete(Incomplete),
    /// Every declared member confirmed its membership.
    Complete { members: Vec<String> },
}

impl QuorumState {
    pub fn is_complete(&self) -> bool {
        matches!(self, QuorumState::Complete { .. })
    }
}

/// Creates, joins and checks federations on behalf of one [`Party`].
#[derive(Debug)]
pub struct Coordinator<D> {
    party: Party,
    directory: D,
}

impl<D> Coordinator<D>
where
    D: DirectoryService,
{
    pub fn new(party: Party, directory: D) -> Self {
        Self { party, directory }
    }

    /// Declares the federation of this party with the given members.
    ///
    /// The master is added to the members if missing. Calling this again replaces the previous
    /// declaration. Assertions of members which are no longer declared are left untouched but
    /// don't count towards the quorum anymore.
    ///
    /// # Errors
    /// Fails if the party is not a [`Role::Master`] or the directory service failed.
    pub async fn create_federation(
        &mut self,
        members: Vec<String>,
    ) -> Result<FederationBinding, MembershipError> {
        self.party.require(Role::Master)?;
        let master = self.party.username.clone();

        let record = FederationRecord::new(master.clone(), members);
        info!(master = %master, members = ?record.members, "declaring federation");
        self.directory.set_federation(&record).await?;

        let assertion = MembershipAssertion {
            member: master.clone(),
            federation: master.clone(),
            role: Role::Master,
        };
        self.directory.set_membership(&assertion).await?;

        Ok(FederationBinding::new(master))
    }

    /// Confirms the membership of this party in the federation of `master`.
    ///
    /// # Errors
    /// Fails with [`MembershipError::Unauthorized`] if the federation does not exist or the
    /// master did not declare this party as a member. No assertion is written in that case.
    pub async fn join_federation(
        &mut self,
        master: &str,
    ) -> Result<FederationBinding, MembershipError> {
        self.party.require(Role::Worker)?;
        let member = self.party.username.clone();

        if self
            .directory
            .federation_with_member(master, &member)
            .await?
            .is_none()
        {
            warn!(
                master = %master,
                member = %member,
                "refusing to join: federation does not exist or does not declare the member"
            );
            return Err(MembershipError::Unauthorized {
                member,
                master: master.to_string(),
            });
        }

        let assertion = MembershipAssertion {
            member: member.clone(),
            federation: master.to_string(),
            role: Role::Worker,
        };
        self.directory.set_membership(&assertion).await?;
        info!(master = %master, member = %member, "joined federation");

        Ok(FederationBinding::new(master))
    }

    /// Computes the quorum of the bound federation.
    ///
    /// Every declared member is looked up in the directory, nothing is cached between checks.
    pub async fn check_federation(
        &mut self,
        binding: Option<&FederationBinding>,
    ) -> Result<QuorumState, MembershipError> {
        let master = match binding {
            Some(binding) => &binding.master,
            None => {
                debug!("no federation bound to {}", self.party);
                return Ok(QuorumState::NoFederation);
            }
        };

        let record = match self.directory.federation(master).await? {
            Some(record) => record,
            None => {
                info!(master = %master, "federation does not exist");
                return Ok(QuorumState::Incomplete(Incomplete::FederationMissing));
            }
        };
        debug!(master = %master, members = ?record.members, "checking federation");

        let mut pending = Vec::new();
        for member in record.members.iter() {
            let joined = self
                .directory
                .membership(member)
                .await?
                .map(|assertion| assertion.confirms(master))
                .unwrap_or(false);
            if !joined {
                pending.push(member.clone());
            }
        }

        if pending.is_empty() {
            info!(master = %master, "all members joined the federation");
            Ok(QuorumState::Complete {
                members: record.members,
            })
        } else {
            info!(master = %master, pending = ?pending, "members have not joined the federation");
            Ok(QuorumState::Incomplete(Incomplete::MembersPending(pending)))
        }
    }

    /// Checks that the bound federation reached quorum and returns its members.
    ///
    /// # Errors
    /// Fails with [`MembershipError::FederationNotFound`] or
    /// [`MembershipError::IncompleteQuorum`] if the federation is not complete.
    pub async fn require_quorum(
        &mut self,
        binding: &FederationBinding,
    ) -> Result<Vec<String>, MembershipError> {
        match self.check_federation(Some(binding)).await? {
            QuorumState::Complete { members } => Ok(members),
            QuorumState::Incomplete(Incomplete::MembersPending(missing)) => {
                Err(MembershipError::IncompleteQuorum {
                    master: binding.master.clone(),
                    missing,
                })
            }
            QuorumState::Incomplete(Incomplete::FederationMissing) | QuorumState::NoFederation => {
                Err(MembershipError::FederationNotFound {
                    master: binding.master.clone(),
                })
            }
        }
    }

    /// Re-checks the bound federation every `interval` until it reached quorum.
    ///
    /// # Errors
    /// Fails with [`MembershipError::Timeout`] if the federation is still incomplete after
    /// `timeout`.
    pub async fn wait_for_quorum(
        &mut self,
        binding: &FederationBinding,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Vec<String>, MembershipError> {
        let deadline = Instant::now() + timeout;
        loop {
            let missing = match self.check_federation(Some(binding)).await? {
                QuorumState::Complete { members } => return Ok(members),
                QuorumState::Incomplete(Incomplete::MembersPending(missing)) => missing,
                QuorumState::Incomplete(Incomplete::FederationMissing)
                | QuorumState::NoFederation => Vec::new(),
            };

            if Instant::now() + interval > deadline {
                warn!(master = %binding.master, missing = ?missing, "gave up waiting for quorum");
                return Err(MembershipError::Timeout {
                    master: binding.master.clone(),
                    missing,
                });
            }
            sleep(interval).await;
        }
    }
}
