//! Federation membership.
//!
//! A federation is declared by its master (the aggregator) and confirmed by each member
//! individually, see [`Coordinator`].

pub mod coordinator;

pub use self::coordinator::{
    Coordinator,
    FederationBinding,
    Incomplete,
    MembershipError,
    Party,
    QuorumState,
};

#[cfg(test)]
pub(crate) mod tests;
