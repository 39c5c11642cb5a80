//! # MC2 federation
//!
//! Federation membership and job launching for federated gradient boosting.
//!
//! A small number of parties train a model together without sharing their data. Before the
//! training starts, the parties agree on a federation:
//!
//! 1. The aggregator (the master of the federation) declares who may join, see
//!    [`Coordinator::create_federation`].
//! 2. Every declared member confirms its membership itself, see
//!    [`Coordinator::join_federation`].
//! 3. The aggregator verifies that every declared member confirmed, see
//!    [`Coordinator::check_federation`].
//!
//! Declarations and confirmations are exchanged through a directory service shared by all
//! parties (see [`storage`]), which also holds the addresses and public keys of the parties
//! (see [`identity`]).
//!
//! Once the federation is complete, the aggregator terminates stale training processes on the
//! hosts of the federation and submits a new training job, see [`Launcher`]. Every worker of the
//! job then trains on its own shard of the data, see [`TrainingSession`].
//!
//! [`Coordinator`]: crate::federation::Coordinator
//! [`Coordinator::create_federation`]: crate::federation::Coordinator::create_federation
//! [`Coordinator::join_federation`]: crate::federation::Coordinator::join_federation
//! [`Coordinator::check_federation`]: crate::federation::Coordinator::check_federation
//! [`Launcher`]: crate::launcher::Launcher
//! [`TrainingSession`]: crate::session::TrainingSession

pub mod federation;
pub mod identity;
pub mod launcher;
pub mod records;
pub mod session;
pub mod settings;
pub mod storage;
