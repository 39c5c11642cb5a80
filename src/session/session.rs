use std::path::Path;

use displaydoc::Display;
use thiserror::Error;
use tracing::{debug, info};

use crate::session::{
    shard::{load_shard, ShardError},
    DataMatrix,
    EngineError,
    TrainParams,
    TrainingEngine,
};

/// State a session operation depends on.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Prerequisite {
    /// training data
    TrainingData,
    /// test data
    TestData,
    /// model
    Model,
}

/// Error that occurs in a training session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no {0} loaded")]
    NotReady(Prerequisite),

    #[error(transparent)]
    Shard(#[from] ShardError),

    #[error("training engine failed: {0}")]
    Engine(#[source] EngineError),
}

/// The training session of one worker.
///
/// Data loaded by the session is the worker's own shard, selected by its rank.
pub struct TrainingSession<E: TrainingEngine> {
    engine: E,
    train: Option<DataMatrix>,
    test: Option<DataMatrix>,
    model: Option<E::Model>,
}

impl<E> TrainingSession<E>
where
    E: TrainingEngine,
{
    /// Joins the training job.
    pub fn init(mut engine: E) -> Result<Self, SessionError> {
        engine.init().map_err(SessionError::Engine)?;
        info!(
            rank = engine.rank(),
            world_size = engine.world_size(),
            "joined the training job"
        );
        Ok(Self {
            engine,
            train: None,
            test: None,
            model: None,
        })
    }

    pub fn rank(&self) -> u32 {
        self.engine.rank()
    }

    /// The number of parties training together.
    pub fn world_size(&self) -> u32 {
        self.engine.world_size()
    }

    /// Loads the shard of this worker of the training data set at `base`.
    pub fn load_training_data(&mut self, base: impl AsRef<Path>) -> Result<(), SessionError> {
        let data = load_shard(base, self.rank())?;
        debug!(rows = data.len(), "loaded training data");
        self.train = Some(data);
        Ok(())
    }

    /// Loads the shard of this worker of the test data set at `base`.
    pub fn load_test_data(&mut self, base: impl AsRef<Path>) -> Result<(), SessionError> {
        let data = load_shard(base, self.rank())?;
        debug!(rows = data.len(), "loaded test data");
        self.test = Some(data);
        Ok(())
    }

    /// Trains a new model on the training data, replacing the current one.
    pub fn train(&mut self, params: &TrainParams, rounds: u32) -> Result<(), SessionError> {
        let data = self
            .train
            .as_ref()
            .ok_or(SessionError::NotReady(Prerequisite::TrainingData))?;
        let model = self
            .engine
            .train(data, params, rounds)
            .map_err(SessionError::Engine)?;
        info!(rounds, "trained model");
        self.model = Some(model);
        Ok(())
    }

    /// Predicts the labels of the test data.
    pub fn predict(&self) -> Result<Vec<f32>, SessionError> {
        let (model, data) = self.model_and_test_data()?;
        self.engine
            .predict(model, data)
            .map_err(SessionError::Engine)
    }

    /// Evaluates the model on the test data.
    pub fn evaluate(&self) -> Result<String, SessionError> {
        let (model, data) = self.model_and_test_data()?;
        self.engine
            .evaluate(model, data)
            .map_err(SessionError::Engine)
    }

    pub fn save_model(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let path = path.as_ref();
        let model = self
            .model
            .as_ref()
            .ok_or(SessionError::NotReady(Prerequisite::Model))?;
        self.engine
            .save_model(model, path)
            .map_err(SessionError::Engine)?;
        info!("saved model to {}", path.display());
        Ok(())
    }

    /// Replaces the current model with the one stored at `path`.
    pub fn load_model(&mut self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let model = self
            .engine
            .load_model(path.as_ref())
            .map_err(SessionError::Engine)?;
        self.model = Some(model);
        Ok(())
    }

    /// Leaves the training job.
    pub fn shutdown(mut self) -> Result<(), SessionError> {
        info!("shutting down the training session");
        self.engine.finalize().map_err(SessionError::Engine)
    }

    fn model_and_test_data(&self) -> Result<(&E::Model, &DataMatrix), SessionError> {
        // missing test data is reported first, it is what the caller forgot most likely
        let data = self
            .test
            .as_ref()
            .ok_or(SessionError::NotReady(Prerequisite::TestData))?;
        let model = self
            .model
            .as_ref()
            .ok_or(SessionError::NotReady(Prerequisite::Model))?;
        Ok((model, data))
    }
}
