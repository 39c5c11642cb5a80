//! Records kept in the directory service.
//!
//! The directory holds three kinds of records, each keyed by a unique username:
//!
//! - [`IdentityRecord`]: where a user can be reached and which public key it uses.
//! - [`FederationRecord`]: the members an aggregator declared for its federation.
//! - [`MembershipAssertion`]: the federation a user confirmed it belongs to.
//!
//! Writing a record always replaces the previous record with the same key wholesale.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// The role a party plays in a federation.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The aggregator which declares the federation.
    #[display(fmt = "master")]
    Master,
    /// A member which confirms its participation.
    #[display(fmt = "worker")]
    Worker,
}

/// How a user can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub username: String,
    pub ip_address: String,
    /// An SSH public key, e.g. `ssh-ed25519 AAAA... alice@host`.
    pub public_key: String,
}

/// The members an aggregator declared for its federation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationRecord {
    /// The username of the aggregator.
    pub master: String,
    /// The declared members, in declaration order. Always contains the master.
    pub members: Vec<String>,
}

impl FederationRecord {
    /// Creates a federation record, appending the master to the members if it is missing.
    pub fn new(master: impl Into<String>, mut members: Vec<String>) -> Self {
        let master = master.into();
        if !members.contains(&master) {
            members.push(master.clone());
        }
        Self { master, members }
    }

    /// Checks whether `username` was declared as a member.
    pub fn contains(&self, username: &str) -> bool {
        self.members.iter().any(|member| member == username)
    }
}

/// The federation a user claims to belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipAssertion {
    pub member: String,
    /// The username of the master of the claimed federation.
    pub federation: String,
    pub role: Role,
}

impl MembershipAssertion {
    /// Checks whether this assertion confirms membership in the federation of `master`.
    pub fn confirms(&self, master: &str) -> bool {
        self.federation == master
    }
}
