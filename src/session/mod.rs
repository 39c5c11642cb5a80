//! The training session of a worker.
//!
//! A worker of a training job trains on its own shard of the data, selected by its rank. The
//! training itself is left to a [`TrainingEngine`].

mod engine;
#[allow(clippy::module_inception)]
mod session;
pub mod shard;

pub use self::{
    engine::{DataMatrix, EngineError, EngineResult, TrainParams, TrainingEngine},
    session::{Prerequisite, SessionError, TrainingSession},
    shard::{load_shard, shard_path, ShardError},
};

#[cfg(test)]
pub use self::engine::MockTrainingEngine;
